//! # Modem Module
//!
//! Interface to the LTE/GNSS modem the uplink drives.
//!
//! This module handles:
//! - The [`Modem`] collaborator trait used by the connectivity, transfer and
//!   position components
//! - Raw signal quality to dBm conversion
//! - A SIM7000 AT command driver over the serial port ([`sim7000::Sim7000`])

pub mod sim7000;

use async_trait::async_trait;

use crate::error::Result;
use crate::position::Fix;

/// Supply state of the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

/// Radio functionality level (`AT+CFUN`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Functionality {
    Minimum = 0,
    Full = 1,
    FlightMode = 4,
}

/// FTP server the segments are uploaded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpServer {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Operations the uplink needs from the modem
#[async_trait]
pub trait Modem: Send {
    /// Switch the module on or off
    async fn set_power(&mut self, state: PowerState) -> Result<()>;

    async fn set_functionality(&mut self, level: Functionality) -> Result<()>;

    /// Configure the packet data profile (APN)
    async fn set_network_profile(&mut self, apn: &str) -> Result<()>;

    /// Raw network registration code (0-5)
    async fn registration_status(&mut self) -> Result<u8>;

    /// Raw RSSI code (0-31, 99 = unknown)
    async fn signal_quality(&mut self) -> Result<u8>;

    /// Power the GNSS receiver on or off
    async fn set_gps(&mut self, enabled: bool) -> Result<()>;

    /// Current GNSS reading. Fields are zero while there is no fix.
    async fn position(&mut self) -> Result<Fix>;

    /// Bring the packet data bearer up or down
    async fn set_data(&mut self, enabled: bool) -> Result<()>;

    /// Open the FTP session parameters; `false` if the modem refused
    async fn ftp_connect(&mut self, server: &FtpServer) -> Result<bool>;

    /// Store `payload` as `remote_path` + `remote_name`; `false` if not acknowledged
    async fn ftp_put(
        &mut self,
        remote_name: &str,
        remote_path: &str,
        payload: &[u8],
    ) -> Result<bool>;
}

/// Convert a raw `AT+CSQ` RSSI code to dBm
///
/// Returns `None` for 99 (not known) or any code outside 0-31.
///
/// # Examples
///
/// ```
/// use radiometer_uplink::modem::rssi_to_dbm;
///
/// assert_eq!(rssi_to_dbm(0), Some(-115));
/// assert_eq!(rssi_to_dbm(31), Some(-52));
/// assert_eq!(rssi_to_dbm(99), None);
/// ```
pub fn rssi_to_dbm(raw: u8) -> Option<i16> {
    match raw {
        0 => Some(-115),
        1 => Some(-111),
        31 => Some(-52),
        2..=30 => {
            // Linear from 2 -> -110 to 30 -> -54, in the vendor's integer arithmetic
            let raw = i16::from(raw);
            Some(-110 + (raw - 2) * (110 - 54) / (30 - 2))
        }
        _ => None,
    }
}
