//! # Storage Module
//!
//! Line-oriented access to the logger's data files.
//!
//! This module handles:
//! - The [`Storage`] collaborator interface the upload pipeline reads through
//! - 8.3 file name validation for the storage medium
//! - Appending measurement lines to a data file with a heading row ([`DataLog`])
//! - A directory-backed implementation ([`dir::DirStorage`])

pub mod dir;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Result, UplinkError};

/// Longest base name the storage medium accepts
pub const MAX_STEM_LEN: usize = 8;

/// Longest extension the storage medium accepts
pub const MAX_EXTENSION_LEN: usize = 3;

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read from the start
    Read,
    /// Write at the end, creating the file if needed
    Append,
}

/// Opaque handle to an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u32);

/// Line-oriented file access
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send {
    /// Whether `name` exists
    async fn exists(&self, name: &str) -> bool;

    /// Open `name` in `mode`
    async fn open(&mut self, name: &str, mode: OpenMode) -> std::io::Result<FileHandle>;

    /// Append the next line, terminator included, to `buf`, reading at most
    /// `limit` bytes. A longer line comes back cut at `limit` with no
    /// terminator and the next call resumes inside it.
    /// Returns the number of bytes read; 0 means end of file.
    async fn read_line(
        &mut self,
        handle: FileHandle,
        buf: &mut Vec<u8>,
        limit: usize,
    ) -> std::io::Result<usize>;

    /// Write `line` followed by CRLF
    async fn write_line(&mut self, handle: FileHandle, line: &[u8]) -> std::io::Result<()>;

    /// Close `handle`, flushing pending writes
    async fn close(&mut self, handle: FileHandle) -> std::io::Result<()>;
}

/// Check `name` against the medium's 8.3 naming
///
/// # Errors
///
/// Returns [`UplinkError::UnsupportedFilename`] if the base name is empty or
/// longer than 8 characters, the extension is longer than 3, there is more
/// than one dot, or a character other than ASCII alphanumerics, `_` and `-`
/// is used.
pub fn validate_filename(name: &str) -> Result<()> {
    let unsupported = || UplinkError::UnsupportedFilename(name.to_string());

    let mut parts = name.split('.');
    let stem = parts.next().unwrap_or_default();
    let extension = parts.next().unwrap_or_default();
    if parts.next().is_some() {
        return Err(unsupported());
    }

    if stem.is_empty() || stem.len() > MAX_STEM_LEN || extension.len() > MAX_EXTENSION_LEN {
        return Err(unsupported());
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    if !stem.chars().all(allowed) || !extension.chars().all(allowed) {
        return Err(unsupported());
    }

    Ok(())
}

/// Appends measurement lines to data files
///
/// A file that does not exist yet is created with the heading row first.
#[derive(Debug, Clone)]
pub struct DataLog {
    heading: String,
}

impl DataLog {
    pub fn new(heading: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
        }
    }

    pub fn heading(&self) -> &str {
        &self.heading
    }

    /// Append `line` to `filename`
    ///
    /// # Errors
    ///
    /// Returns [`UplinkError::UnsupportedFilename`] before touching storage if
    /// the name is invalid, or the storage error if the file cannot be written.
    pub async fn append<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        filename: &str,
        line: &str,
    ) -> Result<()> {
        validate_filename(filename)?;

        let created = !storage.exists(filename).await;
        if created {
            info!("File {} does not exist, creating it", filename);
        }

        let handle = storage.open(filename, OpenMode::Append).await?;
        let written = self.write(storage, handle, created, line).await;
        let closed = storage.close(handle).await;

        written?;
        closed?;
        Ok(())
    }

    async fn write<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        handle: FileHandle,
        created: bool,
        line: &str,
    ) -> std::io::Result<()> {
        if created && !self.heading.is_empty() {
            storage.write_line(handle, self.heading.as_bytes()).await?;
        }
        storage.write_line(handle, line.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn test_valid_filenames() {
        for name in ["DATA.TXT", "RADIOMET.CSV", "A", "log_01.t", "2020-07", "X.ABC"] {
            assert!(validate_filename(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_invalid_filenames() {
        for name in [
            "",
            ".TXT",
            "RADIOMETER.TXT",
            "DATA.TEXT",
            "A.B.C",
            "DATA FILE.TXT",
            "dätä.txt",
            "../etc",
        ] {
            match validate_filename(name) {
                Err(UplinkError::UnsupportedFilename(n)) => assert_eq!(n, name),
                other => panic!("{} should be rejected, got: {:?}", name, other),
            }
        }
    }

    #[tokio::test]
    async fn test_data_log_writes_heading_for_new_file() {
        let mut storage = MockStorage::new();
        let mut seq = Sequence::new();

        storage
            .expect_exists()
            .with(eq("DATA.TXT"))
            .times(1)
            .return_const(false);
        storage
            .expect_open()
            .with(eq("DATA.TXT"), eq(OpenMode::Append))
            .times(1)
            .returning(|_, _| Ok(FileHandle(7)));
        storage
            .expect_write_line()
            .withf(|h, line| *h == FileHandle(7) && line == b"time,lat,lon")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        storage
            .expect_write_line()
            .withf(|h, line| *h == FileHandle(7) && line == b"1,2,3")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        storage
            .expect_close()
            .with(eq(FileHandle(7)))
            .times(1)
            .returning(|_| Ok(()));

        let log = DataLog::new("time,lat,lon");
        tokio_test::assert_ok!(log.append(&mut storage, "DATA.TXT", "1,2,3").await);
    }

    #[tokio::test]
    async fn test_data_log_skips_heading_for_existing_file() {
        let mut storage = MockStorage::new();

        storage.expect_exists().return_const(true);
        storage.expect_open().returning(|_, _| Ok(FileHandle(1)));
        storage
            .expect_write_line()
            .withf(|_, line| line == b"4,5,6")
            .times(1)
            .returning(|_, _| Ok(()));
        storage.expect_close().times(1).returning(|_| Ok(()));

        let log = DataLog::new("time,lat,lon");
        tokio_test::assert_ok!(log.append(&mut storage, "DATA.TXT", "4,5,6").await);
    }

    #[tokio::test]
    async fn test_data_log_closes_file_when_write_fails() {
        let mut storage = MockStorage::new();

        storage.expect_exists().return_const(false);
        storage.expect_open().returning(|_, _| Ok(FileHandle(4)));
        storage
            .expect_write_line()
            .times(1)
            .returning(|_, _| Err(std::io::Error::new(std::io::ErrorKind::Other, "card full")));
        storage
            .expect_close()
            .with(eq(FileHandle(4)))
            .times(1)
            .returning(|_| Ok(()));

        let log = DataLog::new("time,lat,lon");
        let result = log.append(&mut storage, "DATA.TXT", "1,2,3").await;

        match result {
            Err(UplinkError::Io(e)) => assert_eq!(e.to_string(), "card full"),
            other => panic!("Expected Io error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_data_log_reports_close_failure() {
        let mut storage = MockStorage::new();

        storage.expect_exists().return_const(true);
        storage.expect_open().returning(|_, _| Ok(FileHandle(2)));
        storage.expect_write_line().times(1).returning(|_, _| Ok(()));
        storage
            .expect_close()
            .times(1)
            .returning(|_| Err(std::io::Error::new(std::io::ErrorKind::Other, "flush failed")));

        let log = DataLog::new("time,lat,lon");
        let result = log.append(&mut storage, "DATA.TXT", "1,2,3").await;

        assert!(matches!(result, Err(UplinkError::Io(_))));
    }

    #[tokio::test]
    async fn test_data_log_rejects_long_name_without_io() {
        // No expectations: any storage call would panic
        let mut storage = MockStorage::new();
        let log = DataLog::new("heading");

        let result = log.append(&mut storage, "TOOLONGNAME.TXT", "x").await;
        assert!(matches!(result, Err(UplinkError::UnsupportedFilename(_))));
    }
}
