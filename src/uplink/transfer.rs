//! # Transfer Manager
//!
//! Delivers one sealed segment as one named remote object, retrying with a
//! fixed backoff until the modem acknowledges the upload.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::segment::{Segment, SegmentId};
use crate::delay::Delay;
use crate::error::UplinkError;
use crate::modem::Modem;

/// Wait between failed upload attempts
pub const PUT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Remote directory segments are stored in
pub const DEFAULT_REMOTE_DIR: &str = "/pub/upload/";

/// Outcome of a delivered segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Upload attempts including the acknowledged one
    pub attempts: u32,
    pub bytes: usize,
}

/// Uploads segments with unbounded, fixed-interval retry
#[derive(Debug, Clone)]
pub struct TransferManager {
    remote_dir: String,
    retry_interval: Duration,
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new(DEFAULT_REMOTE_DIR, PUT_RETRY_INTERVAL)
    }
}

impl TransferManager {
    pub fn new(remote_dir: impl Into<String>, retry_interval: Duration) -> Self {
        Self {
            remote_dir: remote_dir.into(),
            retry_interval,
        }
    }

    /// Remote directory for segments of `_id`.
    ///
    /// The directory is shared by every source file; the segment's stem is
    /// not used to build a per-file path.
    pub fn remote_path(&self, _id: &SegmentId) -> &str {
        &self.remote_dir
    }

    /// Upload `segment` as `id`, returning only once it is acknowledged.
    ///
    /// Every attempt sends the identical payload under the identical name,
    /// so a retried upload overwrites rather than duplicates the remote
    /// object.
    pub async fn send<M, D>(
        &self,
        modem: &mut M,
        delay: &mut D,
        segment: &Segment<'_>,
        id: &SegmentId,
    ) -> TransferReceipt
    where
        M: Modem + ?Sized,
        D: Delay + ?Sized,
    {
        let name = id.to_string();
        let path = self.remote_path(id);
        let payload = segment.payload();

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            debug!("Uploading {}{} ({} bytes, attempt {})", path, name, payload.len(), attempts);

            let failure = match modem.ftp_put(&name, path, payload).await {
                Ok(true) => break,
                Ok(false) => {
                    UplinkError::TransientLinkFailure(format!("{} not acknowledged", name))
                }
                Err(e) => UplinkError::TransientLinkFailure(format!("{}: {}", name, e)),
            };

            warn!("{}, retrying in {:?}", failure, self.retry_interval);
            delay.sleep(self.retry_interval).await;
        }

        info!(
            "Uploaded {} ({} records, {} bytes) after {} attempt(s)",
            name,
            segment.len(),
            payload.len(),
            attempts
        );

        TransferReceipt {
            attempts,
            bytes: payload.len(),
        }
    }
}
