//! Bus session
//!
//! `MpiAdapter` owns one link session and implements the adapter lifecycle:
//! identify, connect with profile fallback, bus scan, the three-step
//! per-peer connection handshake, and demultiplexing of inbound bus
//! telegrams onto the registered data streams.

use crate::params::{
    describe_rejection, rejection_code, ConnectionParams, ControllerFamily, MPI_FLAGS,
};
use crate::stream::MpiStream;
use crate::telegram::{
    self, AdapterCommand, AdapterPayload, AdapterTelegram, BusScanReport, BusTelegram,
    BusTelegramKind, CommType, Telegram,
};
use bytes::Bytes;
use mpi_core::{MpiError, MpiResult};
use mpi_link::{InboundMessage, LinkConfig, LinkSession};
use mpi_transport::ByteChannel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// Grace period for the adapter DISCONNECT round trip during close
const DISCONNECT_GRACE: Duration = Duration::from_secs(3);

const DEFAULT_MAX_ADDRESS: u8 = 0x1F;
const MAX_LOCAL_ID: u8 = 0x7F;
const STREAM_INBOX_DEPTH: usize = 8;

/// Bus session options
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Our own bus address
    pub self_address: u8,
    /// Highest peer address accepted for streams, 1..=0x7F
    pub max_address: u8,
    /// Skip the IDENTIFY request during open
    pub skip_identify: bool,
    /// Controller family selecting the built-in connection profile
    pub family: ControllerFamily,
    /// Explicit connection parameters, overriding the profile
    pub params: Option<ConnectionParams>,
    pub link: LinkConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            self_address: 0,
            max_address: DEFAULT_MAX_ADDRESS,
            skip_identify: false,
            family: ControllerFamily::default(),
            params: None,
            link: LinkConfig::default(),
        }
    }
}

pub(crate) struct StreamShared {
    pub(crate) disconnected: AtomicBool,
}

struct StreamEntry {
    mpi_address: u8,
    remote_id: u8,
    shared: Arc<StreamShared>,
    /// Only sender for the stream's inbox; dropping the entry ends the reader
    inbox: mpsc::Sender<Bytes>,
}

struct StreamTable {
    streams: HashMap<u8, StreamEntry>,
    next_local_id: u8,
}

impl StreamTable {
    fn new() -> Self {
        Self {
            streams: HashMap::new(),
            next_local_id: 1,
        }
    }

    /// Take the next free local connection id from the rolling counter
    fn allocate(&mut self) -> MpiResult<u8> {
        if self.streams.len() >= MAX_LOCAL_ID as usize {
            return Err(MpiError::Protocol(
                "No free local connection identifiers".to_string(),
            ));
        }
        loop {
            let id = self.next_local_id;
            self.next_local_id = if id >= MAX_LOCAL_ID { 1 } else { id + 1 };
            if !self.streams.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    /// Hand an id back after a failed handshake so it is reused next
    fn release(&mut self, id: u8) {
        let expected_next = if id >= MAX_LOCAL_ID { 1 } else { id + 1 };
        if self.next_local_id == expected_next {
            self.next_local_id = id;
        }
    }
}

pub(crate) struct AdapterInner {
    link: LinkSession,
    self_address: u8,
    max_address: u8,
    ident: Option<String>,
    version: String,
    table: Mutex<StreamTable>,
    connected: AtomicBool,
    detach_rx: watch::Receiver<bool>,
    detach_tx: watch::Sender<bool>,
}

impl AdapterInner {
    /// One bus telegram round trip through the link
    pub(crate) async fn bus_request(&self, telegram: &BusTelegram) -> MpiResult<BusTelegram> {
        let payload = telegram::encode_bus(telegram)?;
        let response = self.link.request(payload).await?;
        match telegram::decode(&response)? {
            Telegram::Bus(bus) => Ok(bus),
            Telegram::Adapter(adapter) => Err(MpiError::Protocol(format!(
                "Expected a bus telegram response, got adapter command {:?}",
                adapter.command
            ))),
        }
    }

    /// Orderly per-peer disconnect: request, then expect the confirmation
    pub(crate) async fn disconnect_peer(
        &self,
        mpi_address: u8,
        local_id: u8,
        remote_id: u8,
    ) -> MpiResult<()> {
        let request = BusTelegram {
            mpi_address,
            remote_id,
            local_id,
            kind: BusTelegramKind::DisconnectionRequest,
        };
        let response = self.bus_request(&request).await?;
        match response.kind {
            BusTelegramKind::DisconnectionConfirm => Ok(()),
            other => Err(MpiError::Protocol(format!(
                "Unexpected command [0x{:02X}] confirming disconnection",
                other.command().as_byte()
            ))),
        }
    }

    pub(crate) async fn unregister(&self, local_id: u8) {
        self.table.lock().await.streams.remove(&local_id);
    }

    fn mark_detached(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.detach_tx.send(true);
    }

    async fn terminate_streams(&self) {
        let mut table = self.table.lock().await;
        for entry in table.streams.values() {
            entry.shared.disconnected.store(true, Ordering::SeqCst);
        }
        // dropping the entries drops their inbox senders, ending the readers
        table.streams.clear();
    }
}

/// Handle to an open bus session
#[derive(Clone)]
pub struct MpiAdapter {
    inner: Arc<AdapterInner>,
}

impl std::fmt::Debug for MpiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiAdapter").finish_non_exhaustive()
    }
}

impl MpiAdapter {
    /// Open the adapter over an already-established byte channel.
    ///
    /// Runs the link handshake, identifies the adapter (unless skipped) and
    /// issues the CONNECT request built from explicit parameters or the
    /// family profile. Any failure unwinds the link before returning.
    pub async fn open(
        channel: impl ByteChannel + 'static,
        config: AdapterConfig,
    ) -> MpiResult<MpiAdapter> {
        if config.max_address < 1 || config.max_address > 0x7F {
            return Err(MpiError::InvalidData(format!(
                "Invalid max bus address [{}]",
                config.max_address
            )));
        }
        if config.self_address > config.max_address {
            return Err(MpiError::InvalidData(format!(
                "Invalid self bus address [{}]",
                config.self_address
            )));
        }

        let (link, messages) = LinkSession::open(channel, config.link.clone()).await?;

        let (ident, version) = match Self::connect_sequence(&link, &config).await {
            Ok(result) => result,
            Err(e) => {
                let _ = link.close().await;
                return Err(e);
            }
        };
        log::info!("adapter connected, firmware {}", version);

        let (detach_tx, detach_rx) = watch::channel(false);
        let inner = Arc::new(AdapterInner {
            link,
            self_address: config.self_address,
            max_address: config.max_address,
            ident,
            version,
            table: Mutex::new(StreamTable::new()),
            connected: AtomicBool::new(true),
            detach_rx,
            detach_tx,
        });
        tokio::spawn(dispatch_loop(Arc::downgrade(&inner), messages));

        Ok(MpiAdapter { inner })
    }

    async fn connect_sequence(
        link: &LinkSession,
        config: &AdapterConfig,
    ) -> MpiResult<(Option<String>, String)> {
        let ident = if config.skip_identify {
            None
        } else {
            let response = Self::adapter_request(link, AdapterCommand::Identify).await?;
            match response.payload {
                AdapterPayload::Text(text) => Some(text),
                other => {
                    return Err(MpiError::Protocol(format!(
                        "Unexpected IDENTIFY response payload: {:?}",
                        other
                    )))
                }
            }
        };

        let params = config
            .params
            .clone()
            .unwrap_or_else(|| ConnectionParams::for_family(config.family, config.self_address));

        let version = match Self::adapter_connect(link, &params).await {
            Ok(version) => version,
            // narrow hardware quirk: a rejected PPI profile gets one retry
            // with the MPI flag byte
            Err(MpiError::AdapterRejected { code, .. })
                if config.family == ControllerFamily::S7_200 && config.params.is_none() =>
            {
                log::warn!("adapter rejected connect with E={}, retrying with adjusted flags", code);
                Self::adapter_connect(link, &params.with_flags(MPI_FLAGS)).await?
            }
            Err(e) => return Err(e),
        };

        Ok((ident, version))
    }

    async fn adapter_request(
        link: &LinkSession,
        command: AdapterCommand,
    ) -> MpiResult<AdapterTelegram> {
        let response = link.request(telegram::encode_adapter_request(command)).await?;
        match telegram::decode(&response)? {
            Telegram::Adapter(adapter) => Ok(adapter),
            Telegram::Bus(_) => Err(MpiError::Protocol(
                "Expected an adapter telegram response".to_string(),
            )),
        }
    }

    async fn adapter_connect(link: &LinkSession, params: &ConnectionParams) -> MpiResult<String> {
        let response = link.request(params.encode()).await?;
        let adapter = match telegram::decode(&response)? {
            Telegram::Adapter(adapter) => adapter,
            Telegram::Bus(_) => {
                return Err(MpiError::Protocol(
                    "Expected an adapter telegram response".to_string(),
                ))
            }
        };
        match adapter.payload {
            AdapterPayload::Text(text) => match rejection_code(&text) {
                Some(code) => Err(MpiError::AdapterRejected {
                    description: describe_rejection(&code),
                    code,
                }),
                None => Ok(text),
            },
            other => Err(MpiError::Protocol(format!(
                "Unexpected CONNECT response payload: {:?}",
                other
            ))),
        }
    }

    /// Identify string obtained during open, if any
    pub fn ident(&self) -> Option<&str> {
        self.inner.ident.as_deref()
    }

    /// Firmware version reported by the CONNECT response
    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Wait until the underlying link is gone, through close or a physical
    /// detach
    pub async fn wait_detached(&self) {
        let mut detach_rx = self.inner.detach_rx.clone();
        while !*detach_rx.borrow() {
            if detach_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Query the adapter identify string
    pub async fn request_ident(&self) -> MpiResult<String> {
        let response = Self::adapter_request(&self.inner.link, AdapterCommand::Identify).await?;
        match response.payload {
            AdapterPayload::Text(text) => Ok(text),
            other => Err(MpiError::Protocol(format!(
                "Unexpected IDENTIFY response payload: {:?}",
                other
            ))),
        }
    }

    /// Query the adapter configuration block
    pub async fn request_config(&self) -> MpiResult<Bytes> {
        let response =
            Self::adapter_request(&self.inner.link, AdapterCommand::ConfigRequest).await?;
        match response.payload {
            AdapterPayload::Raw(bytes) => Ok(bytes),
            other => Err(MpiError::Protocol(format!(
                "Unexpected CONFIG response payload: {:?}",
                other
            ))),
        }
    }

    /// Scan the bus for occupied station addresses
    pub async fn scan_bus(&self) -> MpiResult<BusScanReport> {
        if !self.is_connected() {
            return Err(MpiError::NotConnected);
        }
        let response = Self::adapter_request(&self.inner.link, AdapterCommand::BusScan).await?;
        match response.payload {
            AdapterPayload::BusScan(report) => Ok(report),
            other => Err(MpiError::Protocol(format!(
                "Unexpected BUS_SCAN response payload: {:?}",
                other
            ))),
        }
    }

    /// Open a multiplexed data stream to the peer at `mpi_address`.
    ///
    /// Runs the three-step handshake; a refused step releases the local
    /// connection id and leaves nothing registered.
    pub async fn create_stream(&self, mpi_address: u8) -> MpiResult<MpiStream> {
        let inner = &self.inner;
        if !self.is_connected() {
            return Err(MpiError::NotConnected);
        }
        if mpi_address > inner.max_address || mpi_address == inner.self_address {
            return Err(MpiError::InvalidData(format!(
                "Invalid MPI address [{}]",
                mpi_address
            )));
        }

        let local_id = inner.table.lock().await.allocate()?;
        match Self::peer_handshake(inner, mpi_address, local_id).await {
            Ok(remote_id) => {
                let (inbox_tx, inbox_rx) = mpsc::channel(STREAM_INBOX_DEPTH);
                let shared = Arc::new(StreamShared {
                    disconnected: AtomicBool::new(false),
                });
                inner.table.lock().await.streams.insert(
                    local_id,
                    StreamEntry {
                        mpi_address,
                        remote_id,
                        shared: shared.clone(),
                        inbox: inbox_tx,
                    },
                );
                log::debug!(
                    "stream {} connected to station {} (remote id {})",
                    local_id,
                    mpi_address,
                    remote_id
                );
                Ok(MpiStream::new(
                    inner.clone(),
                    shared,
                    inbox_rx,
                    mpi_address,
                    local_id,
                    remote_id,
                ))
            }
            Err(e) => {
                inner.table.lock().await.release(local_id);
                Err(e)
            }
        }
    }

    async fn peer_handshake(
        inner: &Arc<AdapterInner>,
        mpi_address: u8,
        local_id: u8,
    ) -> MpiResult<u8> {
        // step 1: request, expect the peer's connection response
        let request = BusTelegram {
            mpi_address,
            remote_id: 0,
            local_id,
            kind: BusTelegramKind::ConnectionRequest {
                comm_type: CommType::Pg,
            },
        };
        let response = inner.bus_request(&request).await?;
        if !matches!(response.kind, BusTelegramKind::ConnectionResponse) {
            return Err(MpiError::Protocol(format!(
                "Connection step 1 refused with command [0x{:02X}]",
                response.kind.command().as_byte()
            )));
        }
        // the responder's local id is our remote id from here on
        let remote_id = response.local_id;

        // step 2: confirm, expect the confirmation echoed back
        let confirm = BusTelegram {
            mpi_address,
            remote_id,
            local_id,
            kind: BusTelegramKind::ConnectionConfirm { status: true },
        };
        let reply = inner.bus_request(&confirm).await?;
        if !matches!(reply.kind, BusTelegramKind::ConnectionConfirm { .. }) {
            return Err(MpiError::Protocol(format!(
                "Connection step 2 refused with command [0x{:02X}]",
                reply.kind.command().as_byte()
            )));
        }

        Ok(remote_id)
    }

    /// Close every stream, tell the adapter goodbye and tear down the link.
    ///
    /// Stream disconnects and the adapter DISCONNECT are best-effort; a
    /// silent peer cannot hang shutdown.
    pub async fn close(&self) -> MpiResult<()> {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let entries: Vec<(u8, StreamEntry)> = {
            let mut table = self.inner.table.lock().await;
            table.streams.drain().collect()
        };
        let mut disconnects = tokio::task::JoinSet::new();
        for (local_id, entry) in entries {
            entry.shared.disconnected.store(true, Ordering::SeqCst);
            let inner = self.inner.clone();
            disconnects.spawn(async move {
                if let Err(e) = inner
                    .disconnect_peer(entry.mpi_address, local_id, entry.remote_id)
                    .await
                {
                    log::warn!("stream {} disconnect failed: {}", local_id, e);
                }
            });
        }
        while disconnects.join_next().await.is_some() {}

        let disconnect = telegram::encode_adapter_request(AdapterCommand::Disconnect);
        match tokio::time::timeout(DISCONNECT_GRACE, self.inner.link.request(disconnect)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::debug!("adapter disconnect request failed: {}", e),
            Err(_) => log::debug!("adapter disconnect request unanswered"),
        }

        self.inner.link.close().await
    }
}

/// Routes inbound bus telegrams to their streams and answers them.
async fn dispatch_loop(inner: Weak<AdapterInner>, mut messages: mpsc::Receiver<InboundMessage>) {
    while let Some(message) = messages.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if let Err(e) = handle_message(&inner, message).await {
            log::warn!("inbound telegram dropped: {}", e);
        }
    }

    // the link is gone, physically or through close
    if let Some(inner) = inner.upgrade() {
        log::debug!("link ended, marking adapter session defunct");
        inner.terminate_streams().await;
        inner.mark_detached();
    }
}

async fn handle_message(inner: &Arc<AdapterInner>, message: InboundMessage) -> MpiResult<()> {
    let telegram = telegram::decode(&message.payload)?;
    let bus = match telegram {
        Telegram::Bus(bus) => bus,
        Telegram::Adapter(adapter) => {
            return Err(MpiError::Protocol(format!(
                "Unsolicited adapter telegram {:?}",
                adapter.command
            )))
        }
    };

    match bus.kind {
        BusTelegramKind::DataExchange { sequence, payload } => {
            // incoming telegrams carry our local id in their remote field
            let inbox = {
                let table = inner.table.lock().await;
                table.streams.get(&bus.remote_id).map(|e| e.inbox.clone())
            };

            let ack = BusTelegram {
                mpi_address: bus.mpi_address,
                remote_id: bus.local_id,
                local_id: bus.remote_id,
                kind: BusTelegramKind::DataAck {
                    status: inbox.is_some(),
                    sequence,
                },
            };
            message.respond(telegram::encode_bus(&ack)?).await?;

            match inbox {
                Some(inbox) => {
                    if inbox.send(payload).await.is_err() {
                        log::debug!("stream {} reader is gone", bus.remote_id);
                    }
                }
                None => log::warn!(
                    "data exchange for unknown connection id [{}]",
                    bus.remote_id
                ),
            }
        }
        BusTelegramKind::DisconnectionRequest => {
            let confirm = BusTelegram {
                mpi_address: bus.mpi_address,
                remote_id: bus.local_id,
                local_id: bus.remote_id,
                kind: BusTelegramKind::DisconnectionConfirm,
            };
            message.respond(telegram::encode_bus(&confirm)?).await?;

            // peer-initiated close: the stream ends without sending anything
            let removed = inner.table.lock().await.streams.remove(&bus.remote_id);
            match removed {
                Some(entry) => {
                    entry.shared.disconnected.store(true, Ordering::SeqCst);
                    log::debug!("stream {} closed by peer", bus.remote_id);
                }
                None => log::debug!(
                    "disconnection request for unknown connection id [{}]",
                    bus.remote_id
                ),
            }
        }
        other => {
            return Err(MpiError::Protocol(format!(
                "Unexpected inbound bus command [0x{:02X}]",
                other.command().as_byte()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_allocation_wraps_and_skips() {
        let mut table = StreamTable::new();
        assert_eq!(table.allocate().unwrap(), 1);
        assert_eq!(table.allocate().unwrap(), 2);

        table.next_local_id = MAX_LOCAL_ID;
        assert_eq!(table.allocate().unwrap(), MAX_LOCAL_ID);
        // wrapped around, ids are drawn from 1 again
        assert_eq!(table.allocate().unwrap(), 1);
    }

    #[test]
    fn test_released_id_is_reused() {
        let mut table = StreamTable::new();
        let id = table.allocate().unwrap();
        table.release(id);
        assert_eq!(table.allocate().unwrap(), id);
    }
}
