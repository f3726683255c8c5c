//! # Greenhouse DAQ Core Library
//!
//! This crate is the core of the `greenhouse_daq` application. It ingests telemetry from a
//! greenhouse controller over a serial link, persists sensor readings and captured
//! images, tracks plants through their grow cycle, and derives health and harvest
//! alerts. The CLI in `main.rs` is a thin frontend over this library.
//!
//! ## Crate Structure
//!
//! - **`ingest`**: The line/image framing decoder and the reader task that owns the
//!   serial stream.
//! - **`data`**: The append-only telemetry log and the image file sink.
//! - **`registry`**: The plant registry and its derived status views.
//! - **`analysis`**: Pure aggregation, health and harvest-alert functions.
//! - **`broadcast`**: Best-effort fan-out of the latest reading to live subscribers.
//! - **`commands`**: Pump commands published to an MQTT broker.
//! - **`classifier`**: Interface to the leaf disease model and its post-processing.
//! - **`service`**: `GreenhouseService`, the transport-neutral query and command surface.
//! - **`hardware`**: Async serial port opening.
//! - **`config`** / **`tracing_setup`** / **`error`** / **`clock`**: Ambient plumbing.
//!
//! ## Data Flow
//!
//! ```text
//! serial ─→ TelemetryIngestor ─┬─→ TelemetryStore ─┬─→ analysis ─→ GreenhouseService
//!                              └─→ FsImageSink      └─→ broadcaster ─→ subscribers
//!                                  PlantRegistry ─────→ analysis
//! ```

pub mod analysis;
pub mod broadcast;
pub mod classifier;
pub mod clock;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod ingest;
pub mod measurement;
pub mod registry;
pub mod service;
pub mod tracing_setup;

pub use error::{AppResult, GreenhouseError};
