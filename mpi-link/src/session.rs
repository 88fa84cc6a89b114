//! Link session
//!
//! Owns one physical byte channel and runs the link protocol on top of it:
//! the open/close control handshake, the alternating-bit acknowledgment
//! scheme, keepalive echoes, and a FIFO request queue that keeps at most one
//! request in flight. All protocol state lives in a single driver task; the
//! `LinkSession` handle talks to it over a command channel.

use crate::frame::{FrameDecoder, LinkFrame};
use crate::state::LinkState;
use bytes::Bytes;
use mpi_core::{MpiError, MpiResult};
use mpi_transport::ByteChannel;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Link control codes
pub mod control {
    /// Open the link
    pub const OPEN: u8 = 0xFC;
    /// Close the link; received while opening it means "try again"
    pub const CLOSE: u8 = 0xCA;
    /// Positive handshake reply, answers both open and close
    pub const OK: u8 = 0xCE;
    /// Link busy: run a close handshake first, then retry the open
    pub const CLOSE_FIRST: u8 = 0xF8;
    /// Base code of the acknowledgment/keepalive family
    pub const ACK: u8 = 0x88;
}

/// Link session tuning knobs
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Retry budget for the open handshake
    pub max_retries: u8,
    /// Deadline for the whole open handshake
    pub open_timeout: Duration,
    /// Deadline for each outstanding request
    pub request_timeout: Duration,
    /// Grace period before close tears the channel down regardless
    pub close_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            open_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(2),
        }
    }
}

enum Command {
    Request {
        payload: Bytes,
        reply: oneshot::Sender<MpiResult<Bytes>>,
    },
    Respond {
        payload: Bytes,
    },
    ReleaseInbound,
    Close {
        done: oneshot::Sender<MpiResult<()>>,
    },
}

/// An application message pushed by the peer.
///
/// The link protocol allows a single unanswered inbound message at a time;
/// calling [`InboundMessage::respond`] transmits the reply and frees that
/// slot. Dropping the message unreplied frees the local slot without
/// sending anything.
pub struct InboundMessage {
    pub payload: Bytes,
    cmd_tx: Option<mpsc::Sender<Command>>,
}

impl InboundMessage {
    /// Send the application-level reply for this message
    pub async fn respond(mut self, payload: impl Into<Bytes>) -> MpiResult<()> {
        let cmd_tx = self.cmd_tx.take().ok_or(MpiError::Closed)?;
        cmd_tx
            .send(Command::Respond {
                payload: payload.into(),
            })
            .await
            .map_err(|_| MpiError::Closed)
    }
}

impl Drop for InboundMessage {
    fn drop(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.try_send(Command::ReleaseInbound);
        }
    }
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("payload", &self.payload)
            .finish()
    }
}

/// Handle to an open link session
#[derive(Clone)]
pub struct LinkSession {
    cmd_tx: mpsc::Sender<Command>,
}

impl LinkSession {
    /// Run the open handshake on `channel` and spawn the driver task.
    ///
    /// Returns the session handle together with the stream of inbound
    /// application messages. A failed handshake closes the channel before
    /// returning the error.
    pub async fn open(
        channel: impl ByteChannel + 'static,
        config: LinkConfig,
    ) -> MpiResult<(LinkSession, mpsc::Receiver<InboundMessage>)> {
        let mut channel: Box<dyn ByteChannel> = Box::new(channel);
        let mut decoder = FrameDecoder::new();

        let leftover = match handshake(&mut channel, &mut decoder, &config).await {
            Ok(frames) => frames,
            Err(e) => {
                let _ = channel.close().await;
                return Err(e);
            }
        };
        log::debug!("link open handshake completed");

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (msg_tx, msg_rx) = mpsc::channel(8);

        let driver = LinkDriver {
            channel,
            decoder,
            config,
            cmd_rx,
            cmd_tx: cmd_tx.clone(),
            msg_tx,
            state: LinkState::Open,
            sequence: 0,
            queue: VecDeque::new(),
            outstanding: None,
            inbound_seq: None,
            last_ack: None,
            closing: None,
        };
        tokio::spawn(driver.run(leftover));

        Ok((LinkSession { cmd_tx }, msg_rx))
    }

    /// Send a request payload and wait for the matching response payload.
    ///
    /// Requests are serviced strictly in submission order, one at a time.
    pub async fn request(&self, payload: impl Into<Bytes>) -> MpiResult<Bytes> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request {
                payload: payload.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| MpiError::Closed)?;
        reply_rx.await.map_err(|_| MpiError::Closed)?
    }

    /// Run the close handshake and tear the channel down.
    ///
    /// Best effort: a non-responsive peer only delays teardown by the
    /// configured close timeout.
    pub async fn close(&self) -> MpiResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close { done: done_tx })
            .await
            .map_err(|_| MpiError::Closed)?;
        done_rx.await.map_err(|_| MpiError::Closed)?
    }
}

/// Open handshake, run before the driver task exists.
///
/// Returns any frames decoded past the final handshake reply so the driver
/// can process them.
async fn handshake(
    channel: &mut Box<dyn ByteChannel>,
    decoder: &mut FrameDecoder,
    config: &LinkConfig,
) -> MpiResult<Vec<LinkFrame>> {
    let deadline = Instant::now() + config.open_timeout;
    let mut pending: VecDeque<LinkFrame> = VecDeque::new();
    let mut retries = 0u8;
    let mut closing_first = false;

    send_control(channel, control::OPEN).await?;

    loop {
        let frame = match pending.pop_front() {
            Some(frame) => frame,
            None => {
                let mut buf = [0u8; 256];
                loop {
                    let n = tokio::time::timeout_at(deadline, channel.read(&mut buf))
                        .await
                        .map_err(|_| MpiError::Timeout)??;
                    if n == 0 {
                        return Err(MpiError::Closed);
                    }
                    let mut frames = decoder.feed(&buf[..n])?.into_iter();
                    if let Some(first) = frames.next() {
                        pending.extend(frames);
                        break first;
                    }
                }
            }
        };

        if !frame.is_control() {
            log::warn!("ignoring data frame during open handshake");
            continue;
        }

        match frame.seq_id() {
            control::OK if closing_first => {
                closing_first = false;
                send_control(channel, control::OPEN).await?;
            }
            control::OK => return Ok(pending.into()),
            control::CLOSE => {
                retries += 1;
                if retries > config.max_retries {
                    return Err(MpiError::RetriesExceeded);
                }
                log::debug!("open retry {} of {}", retries, config.max_retries);
                send_control(channel, control::OPEN).await?;
            }
            control::CLOSE_FIRST => {
                retries += 1;
                if retries > config.max_retries {
                    return Err(MpiError::RetriesExceeded);
                }
                log::debug!("peer busy, closing before open retry {}", retries);
                closing_first = true;
                send_control(channel, control::CLOSE).await?;
            }
            code => return Err(MpiError::LinkRejected { code }),
        }
    }
}

async fn send_control(channel: &mut Box<dyn ByteChannel>, code: u8) -> MpiResult<()> {
    let encoded = LinkFrame::control(code).encode()?;
    channel.write_all(&encoded).await?;
    channel.flush().await
}

struct Outstanding {
    seq: u8,
    reply: oneshot::Sender<MpiResult<Bytes>>,
    deadline: Instant,
}

struct PendingRequest {
    payload: Bytes,
    reply: oneshot::Sender<MpiResult<Bytes>>,
}

struct Closing {
    done: oneshot::Sender<MpiResult<()>>,
    deadline: Instant,
}

enum Flow {
    Continue,
    Stop,
}

struct LinkDriver {
    channel: Box<dyn ByteChannel>,
    decoder: FrameDecoder,
    config: LinkConfig,
    cmd_rx: mpsc::Receiver<Command>,
    cmd_tx: mpsc::Sender<Command>,
    msg_tx: mpsc::Sender<InboundMessage>,
    state: LinkState,
    sequence: u8,
    queue: VecDeque<PendingRequest>,
    outstanding: Option<Outstanding>,
    /// Send sequence of the one received-but-unanswered inbound message
    inbound_seq: Option<u8>,
    last_ack: Option<u8>,
    closing: Option<Closing>,
}

impl LinkDriver {
    async fn run(mut self, leftover: Vec<LinkFrame>) {
        match self.drive(leftover).await {
            Ok(()) => log::debug!("link driver finished"),
            Err(e) => log::debug!("link driver stopped: {}", e),
        }
        self.shutdown().await;
    }

    async fn drive(&mut self, leftover: Vec<LinkFrame>) -> MpiResult<()> {
        for frame in leftover {
            if let Flow::Stop = self.handle_frame(frame).await? {
                return Ok(());
            }
        }

        let mut buf = [0u8; 512];
        loop {
            let deadline = self.next_deadline();
            let has_deadline = deadline.is_some();
            let deadline = deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if let Flow::Stop = self.handle_command(cmd).await? {
                            return Ok(());
                        }
                    }
                    // every handle is gone, tear the link down
                    None => return Ok(()),
                },
                read = self.channel.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Err(MpiError::Closed);
                    }
                    let frames = match self.decoder.feed(&buf[..n]) {
                        Ok(frames) => frames,
                        Err(e) => {
                            // the decoder dropped its buffer, parsing
                            // resumes with the next chunk
                            log::warn!("framing error: {}", e);
                            continue;
                        }
                    };
                    for frame in frames {
                        if let Flow::Stop = self.handle_frame(frame).await? {
                            return Ok(());
                        }
                    }
                },
                _ = tokio::time::sleep_until(deadline), if has_deadline => {
                    if let Flow::Stop = self.handle_timeout().await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let request = self.outstanding.as_ref().map(|o| o.deadline);
        let closing = self.closing.as_ref().map(|c| c.deadline);
        match (request, closing) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn next_sequence(&mut self) -> u8 {
        let seq = self.sequence;
        self.sequence = (self.sequence + 1) % 8;
        seq
    }

    async fn handle_command(&mut self, cmd: Command) -> MpiResult<Flow> {
        match cmd {
            Command::Request { payload, reply } => {
                if !self.state.can_send() || self.closing.is_some() {
                    let _ = reply.send(Err(MpiError::Closed));
                    return Ok(Flow::Continue);
                }
                self.queue.push_back(PendingRequest { payload, reply });
                self.process_queue().await?;
            }
            Command::Respond { payload } => match self.inbound_seq.take() {
                Some(inbound_seq) => {
                    let seq = self.next_sequence();
                    let frame = LinkFrame::data(seq, (inbound_seq + 1) & 0x07, payload);
                    self.send_frame(&frame).await?;
                    self.process_queue().await?;
                }
                None => log::warn!("reply with no inbound message pending"),
            },
            Command::ReleaseInbound => {
                if self.inbound_seq.take().is_some() {
                    log::debug!("inbound message dropped without a reply");
                    self.process_queue().await?;
                }
            }
            Command::Close { done } => {
                if self.closing.is_some() {
                    let _ = done.send(Err(MpiError::Protocol(
                        "Close already called".to_string(),
                    )));
                    return Ok(Flow::Continue);
                }
                self.state.validate_transition(LinkState::Closing)?;
                self.state = LinkState::Closing;
                self.closing = Some(Closing {
                    done,
                    deadline: Instant::now() + self.config.close_timeout,
                });
                self.send_control(control::CLOSE).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_frame(&mut self, frame: LinkFrame) -> MpiResult<Flow> {
        if frame.is_control() {
            return self.handle_control(frame).await;
        }

        // every data frame is acknowledged immediately
        let seq_b = frame.seq_b();
        let ack = if frame.seq_a() == seq_b {
            seq_b + 1
        } else {
            seq_b
        };
        self.send_control(control::ACK | ack).await?;

        // a frame acknowledging the outstanding request resolves it
        let acknowledges = self
            .outstanding
            .as_ref()
            .is_some_and(|out| frame.seq_a() == (out.seq + 1) % 8);
        if acknowledges {
            if let Some(out) = self.outstanding.take() {
                let payload = frame.into_payload().unwrap_or_default();
                let _ = out.reply.send(Ok(payload));
            }
            self.process_queue().await?;
            return Ok(Flow::Continue);
        }

        // a new inbound message while a request is in flight consumes one
        // send sequence, keeping the counters aligned with the peer's
        if self.outstanding.is_some() {
            let skipped = self.next_sequence();
            log::debug!("inbound message during request, skipping sequence {}", skipped);
        }

        if self.inbound_seq.is_some() {
            log::warn!("second inbound message before the first was answered");
        }
        self.inbound_seq = Some(seq_b);

        let message = InboundMessage {
            payload: frame.into_payload().unwrap_or_default(),
            cmd_tx: Some(self.cmd_tx.clone()),
        };
        if self.msg_tx.send(message).await.is_err() {
            log::warn!("no consumer for inbound message, dropping it");
        }
        Ok(Flow::Continue)
    }

    async fn handle_control(&mut self, frame: LinkFrame) -> MpiResult<Flow> {
        let code = frame.seq_id();

        if let Some(closing) = self.closing.take() {
            let result = if code == control::OK {
                Ok(())
            } else {
                Err(MpiError::LinkRejected { code })
            };
            let _ = closing.done.send(result);
            return Ok(Flow::Stop);
        }

        if frame.seq_a() == 0 {
            // acknowledgment family: the same code twice in a row is a
            // keepalive that must be echoed back unchanged
            if self.last_ack == Some(code) {
                log::trace!("keepalive echo 0x{:02X}", code);
                self.send_control(code).await?;
            }
            self.last_ack = Some(code);
        } else {
            log::warn!("unexpected control code 0x{:02X}", code);
        }
        Ok(Flow::Continue)
    }

    async fn handle_timeout(&mut self) -> MpiResult<Flow> {
        let now = Instant::now();

        if self.closing.as_ref().is_some_and(|c| c.deadline <= now) {
            // best-effort close: tear down regardless of a reply
            if let Some(closing) = self.closing.take() {
                let _ = closing.done.send(Ok(()));
            }
            return Ok(Flow::Stop);
        }

        if self.outstanding.as_ref().is_some_and(|o| o.deadline <= now) {
            if let Some(out) = self.outstanding.take() {
                log::debug!("request {} timed out", out.seq);
                let _ = out.reply.send(Err(MpiError::Timeout));
            }
            self.process_queue().await?;
        }
        Ok(Flow::Continue)
    }

    async fn process_queue(&mut self) -> MpiResult<()> {
        if !self.state.can_send()
            || self.closing.is_some()
            || self.outstanding.is_some()
            || self.inbound_seq.is_some()
        {
            return Ok(());
        }
        let Some(request) = self.queue.pop_front() else {
            return Ok(());
        };

        let seq = self.next_sequence();
        let frame = LinkFrame::data(seq, seq, request.payload);
        self.send_frame(&frame).await?;
        self.outstanding = Some(Outstanding {
            seq,
            reply: request.reply,
            deadline: Instant::now() + self.config.request_timeout,
        });
        Ok(())
    }

    async fn send_frame(&mut self, frame: &LinkFrame) -> MpiResult<()> {
        let encoded = frame.encode()?;
        self.channel.write_all(&encoded).await?;
        self.channel.flush().await
    }

    async fn send_control(&mut self, code: u8) -> MpiResult<()> {
        let frame = LinkFrame::control(code);
        self.send_frame(&frame).await
    }

    async fn shutdown(&mut self) {
        if let Some(out) = self.outstanding.take() {
            let _ = out.reply.send(Err(MpiError::Closed));
        }
        while let Some(request) = self.queue.pop_front() {
            let _ = request.reply.send(Err(MpiError::Closed));
        }
        if let Some(closing) = self.closing.take() {
            let _ = closing.done.send(Ok(()));
        }
        let _ = self.channel.close().await;
        self.state = LinkState::Closed;
    }
}
