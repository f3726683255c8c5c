//! Telemetry ingestion: stream framing and the reader task.
//!
//! [`frame`] turns raw lines into [`FrameEvent`]s; [`reader`] owns the stream, drives the
//! decoder and hands sensor records to the telemetry store and images to the image sink.

pub mod frame;
pub mod reader;

pub use frame::{decode_line, FrameDecoder, FrameEvent, FrameMode, IMG_END, IMG_START};
pub use reader::{IngestStats, TelemetryIngestor};
