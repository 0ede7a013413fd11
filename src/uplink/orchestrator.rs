//! # Upload Orchestrator
//!
//! Drives one upload session: bring the data bearer up, wait for
//! registration, stream the source file through the segment buffer, hand each
//! full segment to the transfer manager, and tear the bearer down again.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::connectivity::{LinkMonitor, LinkSettings};
use super::segment::{Append, Record, SegmentBuffer, SegmentLimits, SegmentNamer};
use super::transfer::{TransferManager, DEFAULT_REMOTE_DIR, PUT_RETRY_INTERVAL};
use crate::config::Config;
use crate::delay::Delay;
use crate::error::{Result, UplinkError};
use crate::modem::{FtpServer, Modem};
use crate::station::Station;
use crate::storage::{FileHandle, OpenMode, Storage};

/// Wait between refused FTP connection attempts
pub const FTP_CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Everything an upload session needs besides the hardware
#[derive(Debug, Clone)]
pub struct UplinkSettings {
    pub link: LinkSettings,
    pub server: FtpServer,
    pub remote_dir: String,
    pub connect_retry: Duration,
    pub put_retry: Duration,
    pub limits: SegmentLimits,
}

impl UplinkSettings {
    /// Default timings and limits for `server`
    pub fn for_server(server: FtpServer) -> Self {
        Self {
            link: LinkSettings::default(),
            server,
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
            connect_retry: FTP_CONNECT_RETRY_INTERVAL,
            put_retry: PUT_RETRY_INTERVAL,
            limits: SegmentLimits::default(),
        }
    }
}

impl From<&Config> for UplinkSettings {
    fn from(config: &Config) -> Self {
        Self {
            link: LinkSettings {
                apn: config.network.apn.clone(),
                poll_interval: Duration::from_millis(config.network.registration_poll_ms),
                reset_threshold: config.network.reset_threshold,
                quiescent: Duration::from_millis(config.network.power_cycle_quiescent_ms),
            },
            server: FtpServer {
                host: config.ftp.host.clone(),
                port: config.ftp.port,
                username: config.ftp.username.clone(),
                password: config.ftp.password.clone(),
            },
            remote_dir: config.ftp.remote_dir.clone(),
            connect_retry: Duration::from_millis(config.ftp.connect_retry_ms),
            put_retry: Duration::from_millis(config.ftp.put_retry_ms),
            limits: SegmentLimits {
                max_records: config.segment.max_records,
                max_record_len: config.segment.max_record_len,
            },
        }
    }
}

/// Totals of one upload session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub segments: u32,
    pub records: usize,
    pub bytes: usize,
    /// Upload attempts over all segments, retries included
    pub attempts: u32,
}

/// Owner of the session's single segment buffer and link monitor
#[derive(Debug)]
pub struct Uplink {
    monitor: LinkMonitor,
    transfer: TransferManager,
    buffer: SegmentBuffer,
    server: FtpServer,
    connect_retry: Duration,
}

impl Uplink {
    pub fn new(settings: UplinkSettings) -> Self {
        Self {
            monitor: LinkMonitor::new(settings.link),
            transfer: TransferManager::new(settings.remote_dir, settings.put_retry),
            buffer: SegmentBuffer::new(settings.limits),
            server: settings.server,
            connect_retry: settings.connect_retry,
        }
    }

    /// The connectivity state machine
    pub fn monitor(&self) -> &LinkMonitor {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut LinkMonitor {
        &mut self.monitor
    }

    /// Upload `filename` from the station's storage.
    ///
    /// Link and transfer failures are retried until they clear, so this only
    /// returns once every record has been acknowledged by the server or a
    /// local problem makes the file unreadable.
    ///
    /// # Errors
    ///
    /// - [`UplinkError::UnsupportedFilename`] if `filename` is not an 8.3 name
    ///   (nothing is touched)
    /// - [`UplinkError::StorageUnavailable`] if the file cannot be opened
    /// - [`UplinkError::RecordTooLong`] if a line does not fit a record
    /// - [`UplinkError::BufferCapacityExceeded`] if a record cannot fit an
    ///   empty segment
    /// - [`UplinkError::Io`] if reading fails part way
    pub async fn upload_file<M, S, D>(
        &mut self,
        station: &mut Station<M, S, D>,
        filename: &str,
    ) -> Result<UploadReport>
    where
        M: Modem,
        S: Storage,
        D: Delay,
    {
        let mut namer = SegmentNamer::for_file(filename)?;
        info!("Uploading {} to {}:{}", filename, self.server.host, self.server.port);

        if let Err(e) = station.modem.set_data(true).await {
            warn!("Failed to enable data: {}", e);
        }

        let registration = self
            .monitor
            .wait_until_registered(&mut station.modem, &mut station.delay)
            .await;
        info!("Registered ({:?})", registration);
        self.monitor.report_signal(&mut station.modem).await;

        self.connect(&mut station.modem, &mut station.delay).await;

        let result = self.stream_file(station, filename, &mut namer).await;

        if let Err(e) = station.modem.set_data(false).await {
            warn!("Failed to disable data: {}", e);
        }

        match &result {
            Ok(report) => info!(
                "Finished {}: {} records in {} segments, {} bytes, {} attempts",
                filename, report.records, report.segments, report.bytes, report.attempts
            ),
            Err(e) => warn!("Upload of {} aborted: {}", filename, e),
        }

        result
    }

    async fn connect<M, D>(&self, modem: &mut M, delay: &mut D)
    where
        M: Modem + ?Sized,
        D: Delay + ?Sized,
    {
        info!("Connecting to FTP server...");
        loop {
            match modem.ftp_connect(&self.server).await {
                Ok(true) => break,
                Ok(false) => warn!("Connection to FTP server failed... retrying"),
                Err(e) => warn!("Connection to FTP server failed ({})... retrying", e),
            }
            delay.sleep(self.connect_retry).await;
        }
    }

    async fn stream_file<M, S, D>(
        &mut self,
        station: &mut Station<M, S, D>,
        filename: &str,
        namer: &mut SegmentNamer,
    ) -> Result<UploadReport>
    where
        M: Modem,
        S: Storage,
        D: Delay,
    {
        let handle = station
            .storage
            .open(filename, OpenMode::Read)
            .await
            .map_err(|source| UplinkError::StorageUnavailable {
                name: filename.to_string(),
                source,
            })?;

        let result = self.stream_records(station, handle, namer).await;

        if let Err(e) = station.storage.close(handle).await {
            warn!("Failed to close {}: {}", filename, e);
        }

        result
    }

    async fn stream_records<M, S, D>(
        &mut self,
        station: &mut Station<M, S, D>,
        handle: FileHandle,
        namer: &mut SegmentNamer,
    ) -> Result<UploadReport>
    where
        M: Modem,
        S: Storage,
        D: Delay,
    {
        let max_record_len = self.buffer.limits().max_record_len;
        // One byte past the record limit is enough for the length check to fire
        let read_limit = max_record_len + 1;
        let mut report = UploadReport::default();
        let mut line = Vec::with_capacity(read_limit);

        self.buffer.clear();

        loop {
            line.clear();
            if station.storage.read_line(handle, &mut line, read_limit).await? == 0 {
                break;
            }

            let Some(record) = Record::parse(&line, max_record_len)? else {
                debug!("Skipping blank line");
                continue;
            };

            if self.buffer.append(record)? == Append::SegmentFull {
                if self.buffer.is_empty() {
                    return Err(UplinkError::BufferCapacityExceeded(format!(
                        "{} byte record does not fit an empty segment",
                        record.encoded_len()
                    )));
                }

                self.flush(&mut station.modem, &mut station.delay, namer, &mut report)
                    .await;

                if self.buffer.append(record)? == Append::SegmentFull {
                    return Err(UplinkError::BufferCapacityExceeded(
                        "record rejected by a freshly cleared segment".to_string(),
                    ));
                }
            }

            report.records += 1;
        }

        if !self.buffer.is_empty() {
            self.flush(&mut station.modem, &mut station.delay, namer, &mut report)
                .await;
        }

        Ok(report)
    }

    /// Seal, send and clear the current segment
    async fn flush<M, D>(
        &mut self,
        modem: &mut M,
        delay: &mut D,
        namer: &mut SegmentNamer,
        report: &mut UploadReport,
    ) where
        M: Modem + ?Sized,
        D: Delay + ?Sized,
    {
        let id = namer.next_id();
        let segment = self.buffer.seal();
        let receipt = self.transfer.send(modem, delay, &segment, &id).await;

        report.segments += 1;
        report.bytes += receipt.bytes;
        report.attempts += receipt.attempts;

        self.buffer.clear();
    }
}
