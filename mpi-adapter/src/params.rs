//! Adapter connection parameters
//!
//! The CONNECT request carries bus timing and topology parameters at fixed
//! byte offsets. Two built-in profiles cover the supported controller
//! families; explicit parameters override both. Rejections come back as an
//! `E=XXXX` code embedded in the response text.

use crate::telegram::{direction, AdapterCommand, TYPE_ADAPTER};
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;

/// Flag byte of the MPI profile, also used by the PPI fallback retry
pub const MPI_FLAGS: u8 = 0x85;

/// Fixed trailer of the extended (35-byte) CONNECT payload
const CONNECT_EXTENSION: [u8; 11] = [
    0x00, 0x01, 0x00, 0x0C, 0x00, 0x14, 0x00, 0x3C, 0x00, 0x00, 0x00,
];

static REJECTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"E=([0-9A-Fa-f]{4})").unwrap());

/// Coarse controller-family hint selecting a parameter profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerFamily {
    /// S7-300/400 on an MPI network
    #[default]
    S7_300_400,
    /// S7-200 on a PPI network
    S7_200,
}

/// Bus timing and topology parameters of an adapter CONNECT request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub ttr: u16,
    pub tslot: u16,
    pub tid1: u16,
    pub tid2: u16,
    pub trdy: u16,
    pub tqui: u8,
    pub gap_factor: u8,
    pub bus_speed: u8,
    pub local_bus_addr: u8,
    pub max_bus_addr: u8,
    pub retry_limit: u8,
    pub bus_type: u8,
    pub flags: u8,
    /// Present in the extended 35-byte form only
    pub profile: Option<u8>,
}

impl ConnectionParams {
    /// MPI profile for S7-300/400 controllers
    pub fn mpi(local_bus_addr: u8) -> Self {
        Self {
            ttr: 0x0017,
            tslot: 0x019F,
            tid1: 0x003C,
            tid2: 0x0190,
            trdy: 0x0014,
            tqui: 0x00,
            gap_factor: 0x05,
            bus_speed: 0x00,
            local_bus_addr,
            max_bus_addr: 0x0F,
            retry_limit: 0x02,
            bus_type: 0x01,
            flags: MPI_FLAGS,
            profile: Some(0xFF),
        }
    }

    /// PPI profile for S7-200 controllers
    pub fn ppi(local_bus_addr: u8) -> Self {
        Self {
            bus_speed: 0x02,
            bus_type: 0x02,
            flags: 0x81,
            ..Self::mpi(local_bus_addr)
        }
    }

    /// Profile for the given controller family
    pub fn for_family(family: ControllerFamily, local_bus_addr: u8) -> Self {
        match family {
            ControllerFamily::S7_300_400 => Self::mpi(local_bus_addr),
            ControllerFamily::S7_200 => Self::ppi(local_bus_addr),
        }
    }

    /// Same parameters with a different flag byte
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Encode as a complete CONNECT request telegram
    pub fn encode(&self) -> Bytes {
        let len = if self.profile.is_some() { 35 } else { 23 };
        let mut buf = vec![0u8; len];

        buf[0] = TYPE_ADAPTER;
        buf[1] = AdapterCommand::Connect.as_byte();
        buf[2] = direction::REQUEST;

        buf[3..5].copy_from_slice(&self.ttr.to_le_bytes());
        buf[5..7].copy_from_slice(&self.tslot.to_le_bytes());
        buf[7..9].copy_from_slice(&self.tid1.to_le_bytes());
        buf[9..11].copy_from_slice(&self.tid2.to_le_bytes());
        buf[11..13].copy_from_slice(&self.trdy.to_le_bytes());
        buf[13] = self.tqui;
        buf[14] = self.gap_factor;
        buf[15] = self.bus_speed;
        buf[16] = self.local_bus_addr;
        buf[17] = self.max_bus_addr;
        buf[18] = self.retry_limit;
        buf[19] = 0x01;
        buf[20] = self.bus_type;
        buf[21] = 0x03;
        buf[22] = self.flags;

        if let Some(profile) = self.profile {
            buf[23] = profile;
            buf[24..35].copy_from_slice(&CONNECT_EXTENSION);
        }

        Bytes::from(buf)
    }
}

/// Extract the `E=XXXX` rejection code from a CONNECT response text
pub fn rejection_code(text: &str) -> Option<String> {
    REJECTION_PATTERN
        .captures(text)
        .map(|captures| captures[1].to_uppercase())
}

/// Map a rejection code to a human-readable description
pub fn describe_rejection(code: &str) -> &'static str {
    match code {
        "0313" => "no station answered on the bus, check wiring and bus parameters",
        "0314" => "bus parameter mismatch with an already configured master",
        "0315" => "local bus address already in use",
        _ => "unrecognized adapter error",
    }
}
