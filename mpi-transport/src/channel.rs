//! Byte channel trait for transport implementations

use async_trait::async_trait;
use mpi_core::{MpiError, MpiResult};

/// Byte channel interface to an already-opened physical link.
///
/// The link layer consumes this abstraction only; USB and serial transports
/// differ solely in how raw bytes enter and leave.
#[async_trait]
pub trait ByteChannel: Send {
    /// Read data from the channel
    ///
    /// # Returns
    ///
    /// Number of bytes read, or 0 if the channel reached end-of-stream
    async fn read(&mut self, buf: &mut [u8]) -> MpiResult<usize>;

    /// Write data to the channel
    ///
    /// # Returns
    ///
    /// Number of bytes written
    async fn write(&mut self, buf: &[u8]) -> MpiResult<usize>;

    /// Write all data to the channel
    async fn write_all(&mut self, buf: &[u8]) -> MpiResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..]).await?;
            if n == 0 {
                return Err(MpiError::Channel(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "Failed to write all data",
                )));
            }
            written += n;
        }
        Ok(())
    }

    /// Flush any buffered data
    async fn flush(&mut self) -> MpiResult<()>;

    /// Check if the channel is closed
    fn is_closed(&self) -> bool;

    /// Close the channel
    async fn close(&mut self) -> MpiResult<()>;
}
