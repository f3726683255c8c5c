//! The reader task.
//!
//! A single [`TelemetryIngestor`] owns the stream for its whole life. It reads one line at
//! a time, feeds the frame decoder, stamps sensor lines with receipt time and writes them
//! to the telemetry store, and hands finished images to the image sink. Nothing is sent
//! back to the device.
//!
//! Faults never stop the loop: undecodable lines are dropped, and storage errors are
//! logged and counted. The task ends when the stream closes, when a non-transient read
//! error occurs, or when the shutdown token fires. A partially received image is
//! discarded in every case.

use crate::clock::Clock;
use crate::data::{ImageCapture, ImageSink, TelemetryStore};
use crate::error::AppResult;
use crate::ingest::frame::{FrameDecoder, FrameEvent};
use crate::measurement::SensorReading;
use bytes::Bytes;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Counters describing one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Sensor readings written to the store
    pub sensor_records: u64,
    /// Sensor lines dropped because they did not parse
    pub decode_faults: u64,
    /// Images written to the sink
    pub images_saved: u64,
    /// Completed transfers with no payload
    pub empty_images: u64,
    /// Transfers dropped by the idle timeout or at shutdown
    pub images_abandoned: u64,
    /// Store or sink writes that failed
    pub write_faults: u64,
}

/// Owns the telemetry stream and routes decoded frames to storage.
pub struct TelemetryIngestor {
    decoder: FrameDecoder,
    store: Arc<TelemetryStore>,
    images: Arc<dyn ImageSink>,
    clock: Arc<dyn Clock>,
    read_timeout: Duration,
    stats: IngestStats,
}

impl TelemetryIngestor {
    /// Create an ingestor with no image timeout and a one second read timeout.
    pub fn new(
        store: Arc<TelemetryStore>,
        images: Arc<dyn ImageSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            store,
            images,
            clock,
            read_timeout: Duration::from_secs(1),
            stats: IngestStats::default(),
        }
    }

    /// Abandon image transfers idle for longer than `timeout`.
    pub fn with_image_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.decoder = self.decoder.with_image_timeout(timeout);
        self
    }

    /// How long one read may wait before the image timeout is re-checked.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Counters so far.
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Read the stream until it closes or `shutdown` fires.
    ///
    /// # Errors
    /// Returns the read error if the stream fails in a way that retrying cannot fix.
    /// Timeouts and interrupted reads are retried.
    #[instrument(name = "telemetry_reader", skip_all)]
    pub async fn run<R>(mut self, mut stream: R, shutdown: CancellationToken) -> AppResult<IngestStats>
    where
        R: AsyncBufRead + Unpin,
    {
        info!("Telemetry reader started");
        let mut line = Vec::with_capacity(256);

        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.discard_partial_image("shutdown");
                    break;
                }
                read = tokio::time::timeout(self.read_timeout, stream.read_until(b'\n', &mut line)) => read,
            };

            match read {
                // Partial bytes stay in `line`; read_until resumes where it stopped
                Err(_elapsed) => self.check_image_timeout(),
                Ok(Ok(0)) => {
                    if !line.is_empty() {
                        self.process_line(&line);
                        line.clear();
                    }
                    self.discard_partial_image("stream closed");
                    break;
                }
                Ok(Ok(_)) => {
                    self.check_image_timeout();
                    self.process_line(&line);
                    line.clear();
                }
                Ok(Err(e))
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock
                    ) =>
                {
                    debug!(error = %e, "Transient read fault, retrying");
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Telemetry stream failed");
                    self.discard_partial_image("read error");
                    return Err(e.into());
                }
            }
        }

        info!(
            records = self.stats.sensor_records,
            decode_faults = self.stats.decode_faults,
            images = self.stats.images_saved,
            "Telemetry reader stopped"
        );
        Ok(self.stats)
    }

    /// Feed one raw line through the decoder and act on the resulting event.
    pub fn process_line(&mut self, raw: &[u8]) {
        if let Some(event) = self.decoder.feed_at(raw, Instant::now()) {
            self.handle_event(event);
        }
    }

    fn check_image_timeout(&mut self) {
        if let Some(event) = self.decoder.expire(Instant::now()) {
            self.handle_event(event);
        }
    }

    fn discard_partial_image(&mut self, reason: &str) {
        let discarded = self.decoder.reset();
        if discarded > 0 {
            self.stats.images_abandoned += 1;
            warn!(reason, discarded, "Partial image discarded");
        }
    }

    fn handle_event(&mut self, event: FrameEvent) {
        match event {
            FrameEvent::SensorLine(line) => self.record_sensor_line(&line),
            FrameEvent::ImageStart => debug!("Image transfer started"),
            FrameEvent::ImageChunk(chunk) => trace!(len = chunk.len(), "Image chunk"),
            FrameEvent::ImageEnd(payload) => self.save_image(payload),
            FrameEvent::ImageAbandoned { discarded } => {
                self.stats.images_abandoned += 1;
                warn!(discarded, "Image transfer timed out, returning to line mode");
            }
        }
    }

    fn record_sensor_line(&mut self, line: &str) {
        let reading = match SensorReading::from_line(line, self.clock.now()) {
            Ok(reading) => reading,
            Err(e) => {
                self.stats.decode_faults += 1;
                warn!(line, error = %e, "Dropping undecodable sensor line");
                return;
            }
        };

        match self.store.append(&reading) {
            Ok(()) => {
                self.stats.sensor_records += 1;
                debug!(
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    soil_moisture = reading.soil_moisture,
                    lux = reading.lux,
                    pump_on = reading.pump_status.is_on(),
                    "Sensor reading stored"
                );
            }
            Err(e) => {
                self.stats.write_faults += 1;
                error!(error = %e, "Failed to persist sensor reading");
            }
        }
    }

    fn save_image(&mut self, payload: Bytes) {
        if payload.is_empty() {
            self.stats.empty_images += 1;
            debug!("Image transfer completed without data, nothing saved");
            return;
        }

        let capture = ImageCapture {
            captured_at: self.clock.now(),
            bytes: payload,
        };
        match self.images.save(&capture) {
            Ok(_) => self.stats.images_saved += 1,
            Err(e) => {
                self.stats.write_faults += 1;
                error!(error = %e, bytes = capture.bytes.len(), "Failed to save image");
            }
        }
    }
}
