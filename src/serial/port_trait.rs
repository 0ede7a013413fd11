//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Next non-empty line with surrounding whitespace removed.
    /// Fails with `TimedOut` if nothing arrives within `timeout`.
    async fn read_line(&mut self, timeout: Duration) -> io::Result<String>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: BufReader<tokio_serial::SerialStream>,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self {
            port: BufReader::new(port),
        }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.get_mut().write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port.get_mut().flush().await
    }

    async fn read_line(&mut self, timeout: Duration) -> io::Result<String> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = tokio::time::timeout(timeout, self.port.read_line(&mut line))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no response from modem"))??;

            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed"));
            }

            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Mock serial port for testing
    ///
    /// Lines queued with [`MockSerialPort::respond`] are handed out one per
    /// `read_line` regardless of what was written; an empty queue times out.
    #[derive(Clone)]
    pub struct MockSerialPort {
        pub written_data: Arc<Mutex<Vec<Vec<u8>>>>,
        pub responses: Arc<Mutex<VecDeque<String>>>,
        pub write_error: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            Self {
                written_data: Arc::new(Mutex::new(Vec::new())),
                responses: Arc::new(Mutex::new(VecDeque::new())),
                write_error: Arc::new(Mutex::new(None)),
            }
        }

        pub fn respond(&self, lines: &[&str]) {
            let mut responses = self.responses.lock().unwrap();
            responses.extend(lines.iter().map(|l| l.to_string()));
        }

        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.written_data.lock().unwrap().clone()
        }

        /// Everything written, joined as text
        pub fn written_text(&self) -> String {
            self.get_written_data()
                .iter()
                .map(|d| String::from_utf8_lossy(d).into_owned())
                .collect()
        }

        pub fn pending_responses(&self) -> usize {
            self.responses.lock().unwrap().len()
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            *self.write_error.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl SerialPortIO for MockSerialPort {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            if let Some(error) = *self.write_error.lock().unwrap() {
                return Err(io::Error::new(error, "Mock write error"));
            }
            self.written_data.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        async fn read_line(&mut self, _timeout: Duration) -> io::Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "Mock read timeout"))
        }
    }
}
