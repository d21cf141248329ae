//! I/O seam between the rangefinder link and the physical port
//!
//! The link only needs whole writes, flushes and byte reads, so tests can
//! swap the port for an in-memory line.

use async_trait::async_trait;
use std::io;

/// Byte-level access to a serial line
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read available bytes into `buf`, returning how many were read
    ///
    /// `Ok(0)` means nothing more will arrive (stream closed).
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// [`SerialPortIO`] over a native `tokio_serial` stream
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read(buf).await
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};

    #[derive(Default)]
    struct Wire {
        sent: Vec<Vec<u8>>,
        inbound: VecDeque<u8>,
        fail_write: Option<io::ErrorKind>,
        fail_flush: Option<io::ErrorKind>,
        fail_read: Option<io::ErrorKind>,
    }

    /// In-memory rangefinder line
    ///
    /// Clones share one wire, so a test can keep a handle after moving the
    /// port into a link. Reads drain scripted bytes; an empty script reads as
    /// end of stream.
    #[derive(Clone, Default)]
    pub struct MockSerialPort {
        wire: Arc<Mutex<Wire>>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            Self::default()
        }

        fn wire(&self) -> MutexGuard<'_, Wire> {
            self.wire.lock().unwrap()
        }

        /// Every `write_all` call so far, one entry per call
        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.wire().sent.clone()
        }

        /// Queue bytes for the device to "send"
        pub fn push_read_data(&self, data: &[u8]) {
            self.wire().inbound.extend(data);
        }

        pub fn set_write_error(&self, kind: io::ErrorKind) {
            self.wire().fail_write = Some(kind);
        }

        pub fn set_flush_error(&self, kind: io::ErrorKind) {
            self.wire().fail_flush = Some(kind);
        }

        pub fn set_read_error(&self, kind: io::ErrorKind) {
            self.wire().fail_read = Some(kind);
        }
    }

    #[async_trait]
    impl SerialPortIO for MockSerialPort {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut wire = self.wire();
            match wire.fail_write {
                Some(kind) => Err(io::Error::new(kind, "line write failed")),
                None => {
                    wire.sent.push(data.to_vec());
                    Ok(())
                }
            }
        }

        async fn flush(&mut self) -> io::Result<()> {
            match self.wire().fail_flush {
                Some(kind) => Err(io::Error::new(kind, "line flush failed")),
                None => Ok(()),
            }
        }

        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut wire = self.wire();
            if let Some(kind) = wire.fail_read {
                return Err(io::Error::new(kind, "line read failed"));
            }
            let n = buf.len().min(wire.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }
}
