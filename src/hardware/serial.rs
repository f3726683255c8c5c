//! Serial Port Abstractions
//!
//! The ingestion reader only needs an async byte stream with line buffering, so the
//! concrete port type is erased behind [`SerialPortIO`]. Tests substitute
//! `tokio::io::duplex` for real hardware.
//!
//! # Example
//!
//! ```rust,ignore
//! use greenhouse_daq::hardware::{open_serial_async, BufferedSerial};
//!
//! let port = open_serial_async("/dev/ttyUSB0", 115_200, "greenhouse node").await?;
//! let reader: BufferedSerial = BufferedSerial::new(Box::new(port));
//! ```

use crate::error::{AppResult, GreenhouseError};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Line-buffered serial port, owned exclusively by the reader task.
pub type BufferedSerial = BufReader<DynSerial>;

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns `GreenhouseError::Io` if the port cannot be opened.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> AppResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                GreenhouseError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!(
                        "Failed to open {} serial port {}: {}",
                        device_name_owned, port_path_owned, e
                    ),
                ))
            })
    })
    .await
    .map_err(|e| {
        GreenhouseError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("spawn_blocking for serial port opening failed: {e}"),
        ))
    })?
}
