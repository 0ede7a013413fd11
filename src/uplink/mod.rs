//! # Uplink Module
//!
//! Segmented, retried upload of recorded data over the cellular link.
//!
//! This module handles:
//! - Accumulating record lines into bounded segments
//! - Naming segments after their source file
//! - Waiting for network registration, power-cycling a stuck modem
//! - Uploading each segment until the server acknowledges it
//! - Driving a whole file through the above

pub mod connectivity;
pub mod orchestrator;
pub mod segment;
pub mod transfer;

pub use connectivity::{ConnectivityState, LinkMonitor, LinkSettings, LinkStep, Registration};
pub use orchestrator::{UploadReport, Uplink, UplinkSettings};
pub use segment::{Append, Record, Segment, SegmentBuffer, SegmentId, SegmentLimits, SegmentNamer};
pub use transfer::{TransferManager, TransferReceipt};
