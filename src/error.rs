//! # Error Types
//!
//! Custom error types for the radiometer uplink using `thiserror`.
//!
//! Link problems (registration, FTP acknowledgement) are retried inside the
//! pipeline and never leave it. Everything that does leave it is either a
//! caller mistake or a local defect.

use thiserror::Error;

/// Main error type for the radiometer uplink
#[derive(Debug, Error)]
pub enum UplinkError {
    /// Registration not yet achieved or transfer not acknowledged.
    /// Only ever logged; the pipeline retries it.
    #[error("Transient link failure: {0}")]
    TransientLinkFailure(String),

    /// Append attempted on a sealed buffer, or a record that cannot fit an empty segment
    #[error("Segment buffer capacity exceeded: {0}")]
    BufferCapacityExceeded(String),

    /// File name does not fit the storage medium's 8.3 naming
    #[error("Unsupported filename '{0}': expected an 8.3 name")]
    UnsupportedFilename(String),

    /// Source stream could not be opened
    #[error("Storage unavailable for '{name}': {source}")]
    StorageUnavailable {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Source line longer than a record may be
    #[error("Record of {len} bytes exceeds the {max} byte limit")]
    RecordTooLong { len: usize, max: usize },

    /// Modem answered with an error or an unparseable response
    #[error("Modem error: {0}")]
    Modem(String),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No modem serial port found (tried: {0})")]
    SerialPortNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the radiometer uplink
pub type Result<T> = std::result::Result<T, UplinkError>;
