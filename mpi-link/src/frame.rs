//! Link frame structure and codec
//!
//! Frames are delimited by `0x7E`. The sequence byte carries a control flag
//! in bit 7; data frames add a length byte, its one's complement, the
//! payload and a little-endian CRC16. Control frames are a fixed 5 bytes.

use crate::crc::crc16;
use bytes::{BufMut, Bytes, BytesMut};
use mpi_core::{MpiError, MpiResult};

/// Frame delimiter
pub const DELIMITER: u8 = 0x7E;

const CONTROL_FLAG: u8 = 0x80;
const SEQ_A_MASK: u8 = 0x70;
const SEQ_B_MASK: u8 = 0x07;

/// A single link-layer frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    seq_id: u8,
    payload: Option<Bytes>,
}

impl LinkFrame {
    /// Create a control frame carrying the given code
    pub fn control(code: u8) -> Self {
        debug_assert!(code & CONTROL_FLAG != 0, "control codes have bit 7 set");
        Self {
            seq_id: code,
            payload: None,
        }
    }

    /// Create a data frame with the given acknowledge and send sequences
    pub fn data(seq_a: u8, seq_b: u8, payload: Bytes) -> Self {
        Self {
            seq_id: ((seq_a & 0x07) << 4) | (seq_b & 0x07),
            payload: Some(payload),
        }
    }

    /// Raw sequence byte
    pub fn seq_id(&self) -> u8 {
        self.seq_id
    }

    /// Acknowledge sequence (bits 6-4)
    pub fn seq_a(&self) -> u8 {
        (self.seq_id & SEQ_A_MASK) >> 4
    }

    /// Send sequence (bits 2-0)
    pub fn seq_b(&self) -> u8 {
        self.seq_id & SEQ_B_MASK
    }

    /// True for zero-payload control frames
    pub fn is_control(&self) -> bool {
        self.seq_id & CONTROL_FLAG != 0
    }

    /// Payload of a data frame
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Consume the frame, returning the payload of a data frame
    pub fn into_payload(self) -> Option<Bytes> {
        self.payload
    }

    /// Encode the frame for the wire
    pub fn encode(&self) -> MpiResult<Bytes> {
        let mut buf = match &self.payload {
            Some(payload) => {
                if payload.len() > 0xFF {
                    return Err(MpiError::InvalidData(format!(
                        "Payload bigger than allowed [{}] > 255",
                        payload.len()
                    )));
                }
                let mut buf = BytesMut::with_capacity(payload.len() + 7);
                buf.put_u8(DELIMITER);
                buf.put_u8(self.seq_id);
                buf.put_u8(payload.len() as u8);
                buf.put_u8(0xFF - payload.len() as u8);
                buf.put_slice(payload);
                buf
            }
            None => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u8(DELIMITER);
                buf.put_u8(self.seq_id);
                buf
            }
        };

        let checksum = crc16(&buf);
        buf.put_u16_le(checksum);
        buf.put_u8(DELIMITER);
        Ok(buf.freeze())
    }
}

/// Incremental frame decoder
///
/// Buffers raw channel bytes and emits every complete frame in order. A
/// frame may arrive split across arbitrary read boundaries; a single read
/// may also carry several back-to-back frames. Framing errors clear the
/// buffer, so parsing restarts cleanly with the next chunk.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feed raw bytes, returning all frames completed by this chunk
    pub fn feed(&mut self, chunk: &[u8]) -> MpiResult<Vec<LinkFrame>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_decode()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn fail(&mut self, message: String) -> MpiError {
        self.buffer.clear();
        MpiError::FrameInvalid(message)
    }

    fn try_decode(&mut self) -> MpiResult<Option<LinkFrame>> {
        // minimum complete frame is a 5-byte control frame
        if self.buffer.len() < 5 {
            return Ok(None);
        }

        let start = self.buffer[0];
        if start != DELIMITER {
            return Err(self.fail(format!(
                "Start of frame must be 0x7E <> [0x{:02X}]",
                start
            )));
        }

        let seq_id = self.buffer[1];
        let is_control = seq_id & CONTROL_FLAG != 0;
        let mut ptr = 2;

        let payload_range = if is_control {
            None
        } else {
            let size = self.buffer[2] as usize;
            let complement = self.buffer[3] as usize;
            if size + complement != 0xFF {
                return Err(self.fail(format!(
                    "Complementary size fields mismatch [{}] + [{}] != 0xFF",
                    size, complement
                )));
            }
            ptr = 4;
            if ptr + size + 3 > self.buffer.len() {
                // not enough data yet, wait for the rest of the frame
                return Ok(None);
            }
            let range = ptr..ptr + size;
            ptr += size;
            Some(range)
        };

        let declared = u16::from_le_bytes([self.buffer[ptr], self.buffer[ptr + 1]]);
        let calculated = crc16(&self.buffer[..ptr]);
        if declared != calculated {
            return Err(self.fail(format!(
                "Frame checksum [0x{:04X}] != [0x{:04X}] calculated checksum",
                declared, calculated
            )));
        }
        ptr += 2;

        let end = self.buffer[ptr];
        if end != DELIMITER {
            return Err(self.fail(format!(
                "End of frame must be 0x7E <> [0x{:02X}]",
                end
            )));
        }
        ptr += 1;

        let consumed = self.buffer.split_to(ptr).freeze();
        let payload = payload_range.map(|range| consumed.slice(range));
        Ok(Some(LinkFrame { seq_id, payload }))
    }
}
