//! Link layer for the MPI adapter protocol stack
//!
//! Implements the HDLC-flavored framing the bus adapters speak over their
//! byte channel: delimited frames with a two-pass CRC16, an alternating-bit
//! acknowledgment scheme with keepalive echoes, and a session driver that
//! keeps exactly one request in flight per channel.

pub mod crc;
pub mod frame;
pub mod session;
pub mod state;

pub use crc::crc16;
pub use frame::{FrameDecoder, LinkFrame, DELIMITER};
pub use session::{control, InboundMessage, LinkConfig, LinkSession};
pub use state::LinkState;
