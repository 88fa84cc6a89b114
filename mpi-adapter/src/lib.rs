//! Application layer for the MPI adapter protocol stack
//!
//! Speaks the MPI telegram protocol over an open link session: adapter
//! identification and connection with built-in parameter profiles, bus
//! scanning, the per-peer connection handshake, and the multiplexed data
//! streams riding on an established bus session.

pub mod adapter;
pub mod params;
pub mod stream;
pub mod telegram;

pub use adapter::{AdapterConfig, MpiAdapter};
pub use params::{ConnectionParams, ControllerFamily};
pub use stream::MpiStream;
pub use telegram::{BusScanReport, Telegram};
