//! Multiplexed data stream
//!
//! One `MpiStream` is one logical data channel to a connected bus station,
//! bound to the `(mpi_address, local_id, remote_id)` triple negotiated by the
//! connection handshake. Writes run the sequenced data-exchange/acknowledge
//! round trip; reads deliver whole telegram payloads in arrival order.

use crate::adapter::{AdapterInner, StreamShared};
use crate::telegram::{BusTelegram, BusTelegramKind};
use bytes::Bytes;
use mpi_core::{MpiError, MpiResult};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Advance a write sequence counter: 1..=255, wrapping back to 1.
///
/// 0 is reserved as "no previous sequence" and never used live.
fn advance(sequence: u8) -> u8 {
    if sequence == 0xFF {
        1
    } else {
        sequence + 1
    }
}

/// A logical data channel to one bus station
pub struct MpiStream {
    inner: Arc<AdapterInner>,
    shared: Arc<StreamShared>,
    inbox: mpsc::Receiver<Bytes>,
    mpi_address: u8,
    local_id: u8,
    remote_id: u8,
    sequence: u8,
}

impl MpiStream {
    pub(crate) fn new(
        inner: Arc<AdapterInner>,
        shared: Arc<StreamShared>,
        inbox: mpsc::Receiver<Bytes>,
        mpi_address: u8,
        local_id: u8,
        remote_id: u8,
    ) -> Self {
        Self {
            inner,
            shared,
            inbox,
            mpi_address,
            local_id,
            remote_id,
            sequence: 1,
        }
    }

    /// Bus address of the connected station
    pub fn mpi_address(&self) -> u8 {
        self.mpi_address
    }

    /// Our connection identifier, the demultiplexing key
    pub fn local_id(&self) -> u8 {
        self.local_id
    }

    /// The station's connection identifier
    pub fn remote_id(&self) -> u8 {
        self.remote_id
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::SeqCst)
    }

    /// Send one payload and wait for the station's acknowledgment.
    ///
    /// The acknowledgment must echo the telegram's sequence number with a
    /// positive status; anything else fails the write. Writes on the same
    /// stream are serialized by the caller holding `&mut self`.
    pub async fn write(&mut self, payload: impl Into<Bytes>) -> MpiResult<()> {
        if self.is_disconnected() {
            return Err(MpiError::Closed);
        }

        let sequence = self.sequence;
        self.sequence = advance(sequence);

        let telegram = BusTelegram {
            mpi_address: self.mpi_address,
            remote_id: self.remote_id,
            local_id: self.local_id,
            kind: BusTelegramKind::DataExchange {
                sequence,
                payload: payload.into(),
            },
        };
        let response = self.inner.bus_request(&telegram).await?;

        match response.kind {
            BusTelegramKind::DataAck {
                status,
                sequence: acked,
            } => {
                if acked != sequence {
                    Err(MpiError::Protocol(format!(
                        "Data acknowledge sequence [{}] != [{}] sent sequence",
                        acked, sequence
                    )))
                } else if !status {
                    Err(MpiError::Protocol(
                        "Data exchange refused by the station".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            other => Err(MpiError::Protocol(format!(
                "Unexpected command [0x{:02X}] acknowledging data exchange",
                other.command().as_byte()
            ))),
        }
    }

    /// Next payload pushed by the station, in arrival order.
    ///
    /// Returns `None` once the stream is disconnected, by either side or by
    /// the physical channel going away.
    pub async fn read(&mut self) -> Option<Bytes> {
        self.inbox.recv().await
    }

    /// Orderly disconnect: request, await the confirmation, unregister.
    ///
    /// A stream that is already disconnected (a second call, a peer-initiated
    /// close, a detach) resolves without sending anything.
    pub async fn close(&mut self) -> MpiResult<()> {
        if self.shared.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self
            .inner
            .disconnect_peer(self.mpi_address, self.local_id, self.remote_id)
            .await;
        self.inner.unregister(self.local_id).await;
        log::debug!("stream {} disconnected", self.local_id);
        result
    }
}

impl std::fmt::Debug for MpiStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiStream")
            .field("mpi_address", &self.mpi_address)
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote_id)
            .field("sequence", &self.sequence)
            .finish()
    }
}
