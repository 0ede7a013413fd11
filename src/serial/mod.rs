//! # Serial Communication Module
//!
//! Handles the serial connection to the modem's AT command port.
//!
//! This module handles:
//! - Finding and opening the modem's AT port (8N1, no flow control)
//! - Line-oriented async read/write through [`port_trait::SerialPortIO`]

pub mod port_trait;

use crate::error::{Result, UplinkError};
use port_trait::TokioSerialPort;
use tracing::{debug, info, warn};

/// Baud rate the modem is configured for
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default modem AT port paths to try (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB2", // SIM7000 USB AT interface
    "/dev/ttyS0",   // On-board UART wired to the modem
];

/// `preferred` followed by the default paths, without repeats
fn candidate_paths(preferred: &str) -> Vec<&str> {
    let mut paths = vec![preferred];
    paths.extend(DEFAULT_DEVICE_PATHS.iter().filter(|p| **p != preferred));
    paths
}

/// Modem serial port handler
pub struct ModemSerial {
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Device path (e.g., /dev/ttyUSB2)
    device_path: String,
}

impl std::fmt::Debug for ModemSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl ModemSerial {
    /// Open the modem, trying `preferred` first and then the default paths
    ///
    /// # Errors
    ///
    /// Returns [`UplinkError::SerialPortNotFound`] if no path could be opened
    pub fn open(preferred: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_paths(&candidate_paths(preferred), baud_rate)
    }

    /// Open the first path in `paths` that works
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyUSB2"])
    /// * `baud_rate` - Line speed
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Successfully opened modem at {} ({} baud)", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(UplinkError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| UplinkError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Hand the port over as a line-oriented [`port_trait::SerialPortIO`]
    pub fn into_port(self) -> TokioSerialPort {
        TokioSerialPort::new(self.port)
    }
}
