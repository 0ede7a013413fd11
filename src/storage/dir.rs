//! Directory-backed [`Storage`] for data files on a mounted card

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use super::{FileHandle, OpenMode, Storage};

enum OpenFile {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
}

/// Files under a single root directory
pub struct DirStorage {
    root: PathBuf,
    files: HashMap<FileHandle, OpenFile>,
    next_handle: u32,
}

impl std::fmt::Debug for DirStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirStorage")
            .field("root", &self.root)
            .field("open_files", &self.files.len())
            .finish_non_exhaustive()
    }
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: HashMap::new(),
            next_handle: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn file_mut(&mut self, handle: FileHandle) -> io::Result<&mut OpenFile> {
        self.files.get_mut(&handle).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("unknown file handle {}", handle.0))
        })
    }
}

#[async_trait]
impl Storage for DirStorage {
    async fn exists(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.path_of(name)).await.unwrap_or(false)
    }

    async fn open(&mut self, name: &str, mode: OpenMode) -> io::Result<FileHandle> {
        let path = self.path_of(name);
        let file = match mode {
            OpenMode::Read => OpenFile::Reader(BufReader::new(File::open(&path).await?)),
            OpenMode::Append => {
                let file = OpenOptions::new().create(true).append(true).open(&path).await?;
                OpenFile::Writer(BufWriter::new(file))
            }
        };

        let handle = FileHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.files.insert(handle, file);

        debug!("Opened {} ({:?}) as handle {}", path.display(), mode, handle.0);
        Ok(handle)
    }

    async fn read_line(
        &mut self,
        handle: FileHandle,
        buf: &mut Vec<u8>,
        limit: usize,
    ) -> io::Result<usize> {
        match self.file_mut(handle)? {
            OpenFile::Reader(reader) => {
                reader.take(limit as u64).read_until(b'\n', buf).await
            }
            OpenFile::Writer(_) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file opened for append",
            )),
        }
    }

    async fn write_line(&mut self, handle: FileHandle, line: &[u8]) -> io::Result<()> {
        match self.file_mut(handle)? {
            OpenFile::Writer(writer) => {
                writer.write_all(line).await?;
                writer.write_all(b"\r\n").await
            }
            OpenFile::Reader(_) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file opened for reading",
            )),
        }
    }

    async fn close(&mut self, handle: FileHandle) -> io::Result<()> {
        match self.files.remove(&handle) {
            Some(OpenFile::Writer(mut writer)) => writer.flush().await,
            Some(OpenFile::Reader(_)) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown file handle {}", handle.0),
            )),
        }
    }
}
