//! MPI - Rust implementation of the MPI/PPI fieldbus adapter protocol
//!
//! This library lets a host talk to Siemens-style programmable controllers
//! through a USB-attached or serial bus adapter: a proprietary HDLC-flavored
//! link protocol with CRC16 and alternating sequence numbers, and on top of
//! it the MPI telegram protocol managing adapter identity, per-peer bus
//! connections and multiplexed data streams.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `mpi-core`: Core types and error handling
//! - `mpi-transport`: Byte-channel transports (USB, Serial) and adapter
//!   discovery
//! - `mpi-link`: Link layer (framing, CRC16, ack/retry session)
//! - `mpi-adapter`: Application layer (telegram codec, bus session, data
//!   streams)
//!
//! # Usage
//!
//! ```no_run
//! use mpi::transport::{SerialChannel, SerialSettings};
//! use mpi::{AdapterConfig, MpiAdapter};
//!
//! # async fn run() -> mpi::MpiResult<()> {
//! let settings = SerialSettings::new("/dev/ttyUSB0".to_string(), 38400);
//! let channel = SerialChannel::open(settings)?;
//!
//! let adapter = MpiAdapter::open(channel, AdapterConfig::default()).await?;
//! let stations = adapter.scan_bus().await?;
//!
//! let mut stream = adapter.create_stream(stations.stations[0]).await?;
//! stream.write(vec![0x32, 0x01, 0x00]).await?;
//! let reply = stream.read().await;
//!
//! stream.close().await?;
//! adapter.close().await?;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use mpi_core::{MpiError, MpiResult};

// Re-export the bus session API
pub use mpi_adapter::{
    AdapterConfig, BusScanReport, ConnectionParams, ControllerFamily, MpiAdapter, MpiStream,
};

// Re-export the transport layer
pub mod transport {
    pub use mpi_transport::*;
}

// Re-export the link layer
pub mod link {
    pub use mpi_link::*;
}

// Re-export the telegram codec
pub mod telegram {
    pub use mpi_adapter::telegram::*;
}
