//! In-memory channel pair
//!
//! Connects two channel endpoints back to back. Used by the test harnesses
//! that script the adapter side of the protocol in-process.

use crate::channel::ByteChannel;
use async_trait::async_trait;
use mpi_core::{MpiError, MpiResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// One endpoint of an in-memory byte channel
#[derive(Debug)]
pub struct LoopbackChannel {
    stream: DuplexStream,
    closed: bool,
}

impl LoopbackChannel {
    /// Create a connected channel pair with the given buffer capacity
    pub fn pair(capacity: usize) -> (LoopbackChannel, DuplexStream) {
        let (near, far) = tokio::io::duplex(capacity);
        (
            LoopbackChannel {
                stream: near,
                closed: false,
            },
            far,
        )
    }
}

#[async_trait]
impl ByteChannel for LoopbackChannel {
    async fn read(&mut self, buf: &mut [u8]) -> MpiResult<usize> {
        match self.stream.read(buf).await {
            Ok(0) => {
                self.closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.closed = true;
                Err(MpiError::Channel(e))
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> MpiResult<usize> {
        self.stream.write(buf).await.map_err(MpiError::Channel)
    }

    async fn flush(&mut self) -> MpiResult<()> {
        self.stream.flush().await.map_err(MpiError::Channel)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> MpiResult<()> {
        self.closed = true;
        self.stream.shutdown().await.map_err(MpiError::Channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_round_trip() {
        let (mut near, mut far) = LoopbackChannel::pair(64);

        near.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        far.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        let n = near.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn test_loopback_eof_after_peer_drop() {
        let (mut near, far) = LoopbackChannel::pair(64);
        drop(far);

        let mut buf = [0u8; 8];
        assert_eq!(near.read(&mut buf).await.unwrap(), 0);
        assert!(near.is_closed());
    }
}
