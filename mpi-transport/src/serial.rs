//! Serial port channel implementation

use crate::channel::ByteChannel;
use async_trait::async_trait;
use mpi_core::{MpiError, MpiResult};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Wrapper for SerialStream that implements Debug
struct DebugSerialStream(SerialStream);

impl fmt::Debug for DebugSerialStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialStream").finish()
    }
}

impl Deref for DebugSerialStream {
    type Target = SerialStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugSerialStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Serial channel settings
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
    pub flow_control: tokio_serial::FlowControl,
    pub write_timeout: Option<Duration>,
}

impl SerialSettings {
    /// Create new serial settings with default parameters (8N1, no flow control)
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
            flow_control: tokio_serial::FlowControl::None,
            write_timeout: Some(Duration::from_millis(500)),
        }
    }
}

/// Serial channel implementation
///
/// The serial transport variant of the bus adapter speaks the same link
/// protocol as the USB one; only the byte source differs.
#[derive(Debug)]
pub struct SerialChannel {
    stream: Option<DebugSerialStream>,
    settings: SerialSettings,
    closed: bool,
}

impl SerialChannel {
    /// Open a serial channel with the given settings
    pub fn open(settings: SerialSettings) -> MpiResult<Self> {
        let builder = tokio_serial::new(&settings.port_name, settings.baud_rate)
            .data_bits(settings.data_bits)
            .stop_bits(settings.stop_bits)
            .parity(settings.parity)
            .flow_control(settings.flow_control);

        let stream = SerialStream::open(&builder).map_err(|e| {
            MpiError::Channel(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open serial port: {}", e),
            ))
        })?;

        Ok(Self {
            stream: Some(DebugSerialStream(stream)),
            settings,
            closed: false,
        })
    }

    fn stream(&mut self) -> MpiResult<&mut DebugSerialStream> {
        self.stream.as_mut().ok_or_else(|| {
            MpiError::Channel(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "Serial stream not connected",
            ))
        })
    }
}

#[async_trait]
impl ByteChannel for SerialChannel {
    async fn read(&mut self, buf: &mut [u8]) -> MpiResult<usize> {
        let stream = self.stream()?;

        match stream.read(buf).await {
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
        let timeout = self.settings.write_timeout;
        let stream = self.stream()?;

        if let Some(timeout) = timeout {
            tokio::time::timeout(timeout, stream.write(buf))
                .await
                .map_err(|_| MpiError::Timeout)?
                .map_err(MpiError::Channel)
        } else {
            stream.write(buf).await.map_err(MpiError::Channel)
        }
    }

    async fn flush(&mut self) -> MpiResult<()> {
        self.stream()?.flush().await.map_err(MpiError::Channel)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> MpiResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush().await;
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_settings() {
        let settings = SerialSettings::new("/dev/ttyUSB0".to_string(), 38400);
        assert_eq!(settings.port_name, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 38400);
        assert_eq!(settings.data_bits, tokio_serial::DataBits::Eight);
    }
}
