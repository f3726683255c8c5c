//! Sensor measurement types.
//!
//! A [`SensorReading`] is one decoded sensor line plus the local time at which the
//! host received it. The device sends no clock of its own, so ingestion latency is
//! folded into the timestamp.

pub mod reading;

pub use reading::{PumpState, SensorField, SensorReading};
