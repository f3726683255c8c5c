//! Sentinel-framed line protocol decoder.
//!
//! The field device multiplexes two kinds of traffic over one newline-delimited stream:
//!
//! ```text
//! 24.1,58.0,40.2,900,0          <- sensor line
//! IMG_START                     <- enter image mode
//! /9j/4AAQSkZJRgABAQ...         <- image chunk lines, concatenated without newlines
//! ...
//! IMG_END                       <- emit the image, back to line mode
//! 24.2,58.1,40.2,905,0
//! ```
//!
//! # Known weakness
//!
//! There is no length prefix and no checksum. If `IMG_END` is lost the decoder stays in
//! image mode and swallows every following sensor line as image data. An optional idle
//! timeout ([`FrameDecoder::with_image_timeout`]) bounds the damage by discarding the
//! partial image and returning to line mode; it is off by default. Robust framing would
//! need a protocol change on the device side.
//!
//! Decoding is deliberately permissive: malformed UTF-8 sequences are dropped rather
//! than failing the line, then surrounding whitespace is trimmed. Image chunks are the
//! bytes of the cleaned text, so binary payloads survive only if the device encodes them
//! as text.

use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};

/// Sentinel line that switches the decoder into image mode.
pub const IMG_START: &str = "IMG_START";

/// Sentinel line that completes an image transfer.
pub const IMG_END: &str = "IMG_END";

/// Decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// Lines are sensor records (initial state)
    Line,
    /// Lines are appended to the image buffer
    Image,
}

/// One demultiplexed unit produced by [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A non-empty line received in line mode
    SensorLine(String),
    /// `IMG_START` was seen
    ImageStart,
    /// A line appended to the image buffer
    ImageChunk(Bytes),
    /// `IMG_END` was seen; carries the whole accumulated payload (possibly empty)
    ImageEnd(Bytes),
    /// The image idle timeout fired; the partial payload was dropped
    ImageAbandoned {
        /// Number of buffered bytes thrown away
        discarded: usize,
    },
}

/// Two-state line/image framing decoder.
///
/// The decoder does no I/O; feed it raw lines (with or without their terminator).
#[derive(Debug)]
pub struct FrameDecoder {
    mode: FrameMode,
    buffer: BytesMut,
    image_timeout: Option<Duration>,
    last_image_activity: Option<Instant>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder in line mode with no image timeout.
    pub fn new() -> Self {
        Self {
            mode: FrameMode::Line,
            buffer: BytesMut::new(),
            image_timeout: None,
            last_image_activity: None,
        }
    }

    /// Abandon an image transfer when no chunk arrives for `timeout`.
    pub fn with_image_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.image_timeout = timeout;
        self
    }

    /// Current state.
    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Bytes accumulated for the image in progress.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one raw line, stamped with the current instant.
    pub fn feed(&mut self, raw: &[u8]) -> Option<FrameEvent> {
        self.feed_at(raw, Instant::now())
    }

    /// Feed one raw line received at `now`.
    ///
    /// Returns `None` for lines that produce no event (blank lines in either mode).
    /// Timeouts are not evaluated here; call [`FrameDecoder::expire`] first.
    pub fn feed_at(&mut self, raw: &[u8], now: Instant) -> Option<FrameEvent> {
        let line = decode_line(raw);

        match self.mode {
            FrameMode::Line => {
                if line == IMG_START {
                    self.mode = FrameMode::Image;
                    self.buffer.clear();
                    self.last_image_activity = Some(now);
                    Some(FrameEvent::ImageStart)
                } else if line.is_empty() {
                    None
                } else {
                    Some(FrameEvent::SensorLine(line))
                }
            }
            FrameMode::Image => {
                if line == IMG_END {
                    self.mode = FrameMode::Line;
                    self.last_image_activity = None;
                    Some(FrameEvent::ImageEnd(self.buffer.split().freeze()))
                } else if line.is_empty() {
                    None
                } else {
                    self.last_image_activity = Some(now);
                    self.buffer.extend_from_slice(line.as_bytes());
                    Some(FrameEvent::ImageChunk(Bytes::from(line.into_bytes())))
                }
            }
        }
    }

    /// Abandon the image in progress if it has been idle longer than the timeout.
    pub fn expire(&mut self, now: Instant) -> Option<FrameEvent> {
        let timeout = self.image_timeout?;
        let last = self.last_image_activity?;
        if self.mode == FrameMode::Image && now.saturating_duration_since(last) > timeout {
            let discarded = self.reset();
            Some(FrameEvent::ImageAbandoned { discarded })
        } else {
            None
        }
    }

    /// Drop any partial image and return to line mode. Returns the discarded byte count.
    pub fn reset(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.mode = FrameMode::Line;
        self.last_image_activity = None;
        discarded
    }
}

/// Decode a raw line permissively: invalid UTF-8 sequences are dropped, whitespace
/// (including the `\r\n` terminator) is trimmed.
pub fn decode_line(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                // Truncated sequence at the end of the line has no error_len
                let skip = e.error_len().unwrap_or(after.len());
                rest = &after[skip..];
            }
        }
    }

    out.trim().to_string()
}
