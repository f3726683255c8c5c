//! Flat-file storage for telemetry and captured images.
pub mod image_sink;
pub mod telemetry_store;

pub use image_sink::{FsImageSink, ImageCapture, ImageSink};
pub use telemetry_store::TelemetryStore;
