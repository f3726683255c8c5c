//! Hardware link to the field device.
//!
//! Only the serial transport lives here; framing and persistence are in `ingest`.

pub mod serial;
pub use serial::{open_serial_async, BufferedSerial, DynSerial, SerialPortIO};
