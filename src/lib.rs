//! # Radiometer Uplink Library
//!
//! Record GPS-stamped measurements on a field logger and ship them over an
//! LTE modem to an FTP server.
//!
//! The upload pipeline splits a data file into small named segments, waits
//! for the modem to register (power-cycling it when registration stalls) and
//! retries every segment until the server acknowledges it.

pub mod config;
pub mod delay;
pub mod error;
pub mod modem;
pub mod position;
pub mod serial;
pub mod station;
pub mod storage;
pub mod uplink;
