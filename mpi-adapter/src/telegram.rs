//! MPI telegram codec
//!
//! Telegrams are the application-level messages carried inside link frames.
//! Adapter telegrams (`type 0x01`) configure and query the bus adapter
//! itself; bus telegrams (`type 0x04`) address a peer station and carry the
//! per-connection handshake, data exchange and disconnection commands.

use bytes::{BufMut, Bytes, BytesMut};
use mpi_core::{MpiError, MpiResult};

/// Telegram type byte for adapter-directed telegrams
pub const TYPE_ADAPTER: u8 = 0x01;
/// Telegram type byte for bus-directed telegrams
pub const TYPE_BUS: u8 = 0x04;

/// Adapter telegram direction bytes
pub mod direction {
    pub const REQUEST: u8 = 0x02;
    pub const RESPONSE: u8 = 0x20;
}

/// Subtype for the unconnected connection-request telegram
pub const SUBTYPE_UNCONNECTED_DATA: u8 = 0x0D;
/// Subtype for every telegram on an established connection
pub const SUBTYPE_CONNECTED_DATA: u8 = 0x0C;

/// Adapter telegram commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterCommand {
    Connect,
    Disconnect,
    BusScan,
    Unknown08,
    Identify,
    ConfigRequest,
    Other(u8),
}

impl AdapterCommand {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x03 => AdapterCommand::Connect,
            0x04 => AdapterCommand::Disconnect,
            0x07 => AdapterCommand::BusScan,
            0x08 => AdapterCommand::Unknown08,
            0x0D => AdapterCommand::Identify,
            0x0E => AdapterCommand::ConfigRequest,
            other => AdapterCommand::Other(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            AdapterCommand::Connect => 0x03,
            AdapterCommand::Disconnect => 0x04,
            AdapterCommand::BusScan => 0x07,
            AdapterCommand::Unknown08 => 0x08,
            AdapterCommand::Identify => 0x0D,
            AdapterCommand::ConfigRequest => 0x0E,
            AdapterCommand::Other(byte) => *byte,
        }
    }
}

/// Bus telegram commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusCommand {
    ConnectionRequest,
    ConnectionResponse,
    ConnectionConfirm,
    DataExchange,
    DataAck,
    DisconnectionRequest,
    DisconnectionConfirm,
}

impl BusCommand {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0xE0 => Some(BusCommand::ConnectionRequest),
            0xD0 => Some(BusCommand::ConnectionResponse),
            0x05 => Some(BusCommand::ConnectionConfirm),
            0xF1 => Some(BusCommand::DataExchange),
            0xB0 => Some(BusCommand::DataAck),
            0x80 => Some(BusCommand::DisconnectionRequest),
            0xC0 => Some(BusCommand::DisconnectionConfirm),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            BusCommand::ConnectionRequest => 0xE0,
            BusCommand::ConnectionResponse => 0xD0,
            BusCommand::ConnectionConfirm => 0x05,
            BusCommand::DataExchange => 0xF1,
            BusCommand::DataAck => 0xB0,
            BusCommand::DisconnectionRequest => 0x80,
            BusCommand::DisconnectionConfirm => 0xC0,
        }
    }
}

/// Communication type negotiated in a connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommType {
    /// Programming device
    #[default]
    Pg,
    /// Operator panel
    Op,
    /// S7 basic communication
    S7Basic,
}

impl CommType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(CommType::Pg),
            2 => Some(CommType::Op),
            3 => Some(CommType::S7Basic),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            CommType::Pg => 1,
            CommType::Op => 2,
            CommType::S7Basic => 3,
        }
    }
}

/// Payload of a decoded adapter telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterPayload {
    Empty,
    /// ASCII text, carried by IDENTIFY and CONNECT responses
    Text(String),
    /// Occupied-station report from a bus scan
    BusScan(BusScanReport),
    /// Opaque bytes of commands without a known payload shape
    Raw(Bytes),
}

/// Result of a bus scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusScanReport {
    /// Highest address the adapter scanned
    pub max_scanned: u8,
    /// Occupied bus addresses, in ascending order
    pub stations: Vec<u8>,
}

/// A decoded adapter telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterTelegram {
    pub command: AdapterCommand,
    pub direction: u8,
    pub payload: AdapterPayload,
}

/// A bus telegram, outgoing or decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusTelegram {
    pub mpi_address: u8,
    pub remote_id: u8,
    pub local_id: u8,
    pub kind: BusTelegramKind,
}

/// Command-specific part of a bus telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusTelegramKind {
    ConnectionRequest { comm_type: CommType },
    ConnectionResponse,
    ConnectionConfirm { status: bool },
    DataExchange { sequence: u8, payload: Bytes },
    DataAck { status: bool, sequence: u8 },
    DisconnectionRequest,
    DisconnectionConfirm,
}

impl BusTelegramKind {
    pub fn command(&self) -> BusCommand {
        match self {
            BusTelegramKind::ConnectionRequest { .. } => BusCommand::ConnectionRequest,
            BusTelegramKind::ConnectionResponse => BusCommand::ConnectionResponse,
            BusTelegramKind::ConnectionConfirm { .. } => BusCommand::ConnectionConfirm,
            BusTelegramKind::DataExchange { .. } => BusCommand::DataExchange,
            BusTelegramKind::DataAck { .. } => BusCommand::DataAck,
            BusTelegramKind::DisconnectionRequest => BusCommand::DisconnectionRequest,
            BusTelegramKind::DisconnectionConfirm => BusCommand::DisconnectionConfirm,
        }
    }
}

/// A decoded telegram of either type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Telegram {
    Adapter(AdapterTelegram),
    Bus(BusTelegram),
}

/// Encode an adapter request that carries no payload
pub fn encode_adapter_request(command: AdapterCommand) -> Bytes {
    Bytes::from(vec![TYPE_ADAPTER, command.as_byte(), direction::REQUEST])
}

/// Encode a CONNECT request around a caller-supplied raw parameter block
pub fn encode_adapter_connect_raw(raw: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(3 + raw.len());
    buf.put_u8(TYPE_ADAPTER);
    buf.put_u8(AdapterCommand::Connect.as_byte());
    buf.put_u8(direction::REQUEST);
    buf.put_slice(raw);
    buf.freeze()
}

/// Encode a bus telegram
pub fn encode_bus(telegram: &BusTelegram) -> MpiResult<Bytes> {
    if telegram.mpi_address > 0x7F {
        return Err(MpiError::InvalidData(format!(
            "Invalid MPI Address [{}]",
            telegram.mpi_address
        )));
    }

    let subtype = match telegram.kind {
        BusTelegramKind::ConnectionRequest { .. } => SUBTYPE_UNCONNECTED_DATA,
        _ => SUBTYPE_CONNECTED_DATA,
    };

    let mut buf = BytesMut::with_capacity(32);
    buf.put_u8(TYPE_BUS);
    buf.put_u8(0x80 | telegram.mpi_address);
    buf.put_u8(0x00);
    buf.put_u8(subtype);
    buf.put_u8(telegram.remote_id);
    buf.put_u8(telegram.local_id);
    buf.put_u8(telegram.kind.command().as_byte());

    match &telegram.kind {
        BusTelegramKind::ConnectionRequest { comm_type } => {
            // fixed unconnected-data negotiation block, only the
            // communication type varies
            buf.put_u8(0x04);
            buf.put_u16(0x0080);
            buf.put_u16(0x0002);
            buf.put_u8(0x00);
            buf.put_u8(0x02);
            buf.put_u16(0x0100);
            buf.put_u8(comm_type.as_byte());
            buf.put_u8(0x00);
        }
        BusTelegramKind::ConnectionResponse => {}
        BusTelegramKind::ConnectionConfirm { status } => {
            buf.put_u8(if *status { 0x01 } else { 0xFF });
        }
        BusTelegramKind::DataExchange { sequence, payload } => {
            if payload.is_empty() {
                return Err(MpiError::InvalidData(
                    "Data exchange without payload".to_string(),
                ));
            }
            buf.put_u8(*sequence);
            buf.put_slice(payload);
        }
        BusTelegramKind::DataAck { status, sequence } => {
            buf.put_u8(if *status { 0x01 } else { 0xFF });
            buf.put_u8(*sequence);
        }
        BusTelegramKind::DisconnectionRequest | BusTelegramKind::DisconnectionConfirm => {}
    }

    Ok(buf.freeze())
}

/// Decode a telegram of either type
pub fn decode(bytes: &[u8]) -> MpiResult<Telegram> {
    let Some(&telegram_type) = bytes.first() else {
        return Err(MpiError::InvalidData("Empty telegram".to_string()));
    };

    match telegram_type {
        TYPE_ADAPTER => decode_adapter(bytes).map(Telegram::Adapter),
        TYPE_BUS => decode_bus(bytes).map(Telegram::Bus),
        other => Err(MpiError::Protocol(format!(
            "Unknown telegram type [0x{:02X}]",
            other
        ))),
    }
}

fn decode_adapter(bytes: &[u8]) -> MpiResult<AdapterTelegram> {
    if bytes.len() < 3 {
        return Err(MpiError::InvalidData(format!(
            "Incoming data too small for an adapter telegram [{}]",
            bytes.len()
        )));
    }

    let command = AdapterCommand::from_byte(bytes[1]);
    let direction = bytes[2];
    if direction != direction::RESPONSE {
        return Err(MpiError::Protocol(format!(
            "Unsupported adapter telegram direction 0x20 != [0x{:02X}]",
            direction
        )));
    }

    let payload = match command {
        AdapterCommand::BusScan => {
            // two unknown bytes, the scan ceiling, then one byte per
            // address where 0x30 marks an occupied station
            if bytes.len() < 6 {
                return Err(MpiError::InvalidData(
                    "Bus scan response too small".to_string(),
                ));
            }
            let max_scanned = bytes[5];
            let stations = bytes[6..]
                .iter()
                .enumerate()
                .filter(|&(_, &byte)| byte == 0x30)
                .map(|(i, _)| i as u8)
                .collect();
            AdapterPayload::BusScan(BusScanReport {
                max_scanned,
                stations,
            })
        }
        AdapterCommand::Connect | AdapterCommand::Identify => {
            AdapterPayload::Text(String::from_utf8_lossy(&bytes[3..]).into_owned())
        }
        AdapterCommand::Disconnect => AdapterPayload::Empty,
        // unknown commands keep their bytes opaque
        _ => AdapterPayload::Raw(Bytes::copy_from_slice(&bytes[3..])),
    };

    Ok(AdapterTelegram {
        command,
        direction,
        payload,
    })
}

fn decode_bus(bytes: &[u8]) -> MpiResult<BusTelegram> {
    if bytes.len() < 7 {
        return Err(MpiError::InvalidData(format!(
            "Incoming data too small for a bus telegram [{}]",
            bytes.len()
        )));
    }

    let mpi_address = bytes[1] & 0x7F;
    // bytes 2 and 3 (direction, subtype) are not interpreted
    let remote_id = bytes[4];
    let local_id = bytes[5];
    let command = BusCommand::from_byte(bytes[6]).ok_or_else(|| {
        MpiError::Protocol(format!("Unknown bus command [0x{:02X}]", bytes[6]))
    })?;

    let trailer = &bytes[7..];
    let kind = match command {
        BusCommand::ConnectionRequest => BusTelegramKind::ConnectionRequest {
            comm_type: trailer
                .get(9)
                .and_then(|&byte| CommType::from_byte(byte))
                .unwrap_or_default(),
        },
        BusCommand::ConnectionResponse => BusTelegramKind::ConnectionResponse,
        BusCommand::ConnectionConfirm => BusTelegramKind::ConnectionConfirm {
            status: *trailer.first().ok_or_else(|| {
                MpiError::InvalidData("Connection confirm without status".to_string())
            })? == 0x01,
        },
        BusCommand::DataExchange => {
            let (&sequence, payload) = trailer.split_first().ok_or_else(|| {
                MpiError::InvalidData("Data exchange without sequence".to_string())
            })?;
            BusTelegramKind::DataExchange {
                sequence,
                payload: Bytes::copy_from_slice(payload),
            }
        }
        BusCommand::DataAck => {
            if trailer.len() < 2 {
                return Err(MpiError::InvalidData(
                    "Data acknowledge too small".to_string(),
                ));
            }
            BusTelegramKind::DataAck {
                status: trailer[0] == 0x01,
                sequence: trailer[1],
            }
        }
        BusCommand::DisconnectionRequest => BusTelegramKind::DisconnectionRequest,
        BusCommand::DisconnectionConfirm => BusTelegramKind::DisconnectionConfirm,
    };

    Ok(BusTelegram {
        mpi_address,
        remote_id,
        local_id,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_decode_identify_response() {
        let telegram = decode(&hex("010d205630302e3835")).unwrap();
        assert_eq!(
            telegram,
            Telegram::Adapter(AdapterTelegram {
                command: AdapterCommand::Identify,
                direction: direction::RESPONSE,
                payload: AdapterPayload::Text("V00.85".to_string()),
            })
        );
    }

    #[test]
    fn test_decode_connect_response() {
        let telegram = decode(&hex("0103205630302e3835")).unwrap();
        assert_eq!(
            telegram,
            Telegram::Adapter(AdapterTelegram {
                command: AdapterCommand::Connect,
                direction: direction::RESPONSE,
                payload: AdapterPayload::Text("V00.85".to_string()),
            })
        );
    }

    #[test]
    fn test_decode_config_response_as_raw() {
        let body = "0200011e010001ffff0003019f00140190000c00002700051f0202003501\
                    0901091c000000ffffffffffffffffffffffffffffffffffffffffffffffff";
        let telegram = decode(&hex(&format!("010e20{}", body))).unwrap();
        assert_eq!(
            telegram,
            Telegram::Adapter(AdapterTelegram {
                command: AdapterCommand::ConfigRequest,
                direction: direction::RESPONSE,
                payload: AdapterPayload::Raw(Bytes::from(hex(body))),
            })
        );
    }

    #[test]
    fn test_decode_bus_scan_response() {
        let mut bytes = hex("01072000001f");
        bytes.push(0x30); // address 0 occupied
        bytes.push(0x10);
        bytes.push(0x30); // address 2 occupied
        bytes.extend(std::iter::repeat(0x10).take(29));

        let telegram = decode(&bytes).unwrap();
        let Telegram::Adapter(adapter) = telegram else {
            panic!("expected adapter telegram");
        };
        assert_eq!(adapter.command, AdapterCommand::BusScan);
        assert_eq!(
            adapter.payload,
            AdapterPayload::BusScan(BusScanReport {
                max_scanned: 0x1F,
                stations: vec![0, 2],
            })
        );
    }

    #[test]
    fn test_decode_disconnect_response() {
        let telegram = decode(&hex("010420")).unwrap();
        assert_eq!(
            telegram,
            Telegram::Adapter(AdapterTelegram {
                command: AdapterCommand::Disconnect,
                direction: direction::RESPONSE,
                payload: AdapterPayload::Empty,
            })
        );
    }

    #[test]
    fn test_decode_rejects_request_direction() {
        assert!(matches!(
            decode(&hex("010d02")),
            Err(MpiError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_connection_response() {
        let telegram = decode(&hex("0482800c1412d00400800002000201000100")).unwrap();
        assert_eq!(
            telegram,
            Telegram::Bus(BusTelegram {
                mpi_address: 2,
                remote_id: 0x14,
                local_id: 0x12,
                kind: BusTelegramKind::ConnectionResponse,
            })
        );
    }

    #[test]
    fn test_decode_connection_confirm() {
        let telegram = decode(&hex("0482800c14120501")).unwrap();
        assert_eq!(
            telegram,
            Telegram::Bus(BusTelegram {
                mpi_address: 2,
                remote_id: 0x14,
                local_id: 0x12,
                kind: BusTelegramKind::ConnectionConfirm { status: true },
            })
        );
    }

    #[test]
    fn test_decode_data_exchange() {
        let payload = "320300000200000800000000f0000001000100f0";
        let telegram = decode(&hex(&format!("0482800c1412f100{}", payload))).unwrap();
        assert_eq!(
            telegram,
            Telegram::Bus(BusTelegram {
                mpi_address: 2,
                remote_id: 0x14,
                local_id: 0x12,
                kind: BusTelegramKind::DataExchange {
                    sequence: 0,
                    payload: Bytes::from(hex(payload)),
                },
            })
        );
    }

    #[test]
    fn test_decode_data_ack() {
        let telegram = decode(&hex("0482800c1412b00100")).unwrap();
        assert_eq!(
            telegram,
            Telegram::Bus(BusTelegram {
                mpi_address: 2,
                remote_id: 0x14,
                local_id: 0x12,
                kind: BusTelegramKind::DataAck {
                    status: true,
                    sequence: 0,
                },
            })
        );
    }

    #[test]
    fn test_decode_disconnection_request() {
        let telegram = decode(&hex("0482000c121480")).unwrap();
        assert_eq!(
            telegram,
            Telegram::Bus(BusTelegram {
                mpi_address: 2,
                remote_id: 0x12,
                local_id: 0x14,
                kind: BusTelegramKind::DisconnectionRequest,
            })
        );
    }

    #[test]
    fn test_decode_disconnection_confirm() {
        let telegram = decode(&hex("0482800c1412c0")).unwrap();
        assert_eq!(
            telegram,
            Telegram::Bus(BusTelegram {
                mpi_address: 2,
                remote_id: 0x14,
                local_id: 0x12,
                kind: BusTelegramKind::DisconnectionConfirm,
            })
        );
    }

    #[test]
    fn test_decode_unknown_bus_command_is_an_error() {
        assert!(matches!(
            decode(&hex("0482800c1412ff")),
            Err(MpiError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_unknown_telegram_type_is_an_error() {
        assert!(matches!(
            decode(&hex("05000000000000")),
            Err(MpiError::Protocol(_))
        ));
    }

    #[test]
    fn test_encode_empty_adapter_requests() {
        assert_eq!(
            encode_adapter_request(AdapterCommand::Identify)[..],
            hex("010d02")
        );
        assert_eq!(
            encode_adapter_request(AdapterCommand::Disconnect)[..],
            hex("010402")
        );
        assert_eq!(
            encode_adapter_request(AdapterCommand::BusScan)[..],
            hex("010702")
        );
        assert_eq!(
            encode_adapter_request(AdapterCommand::Unknown08)[..],
            hex("010802")
        );
        assert_eq!(
            encode_adapter_request(AdapterCommand::ConfigRequest)[..],
            hex("010e02")
        );
    }

    #[test]
    fn test_decode_unknown_adapter_command_keeps_raw_payload() {
        let telegram = decode(&hex("01f520010203")).unwrap();
        assert_eq!(
            telegram,
            Telegram::Adapter(AdapterTelegram {
                command: AdapterCommand::Other(0xF5),
                direction: direction::RESPONSE,
                payload: AdapterPayload::Raw(Bytes::from(hex("010203"))),
            })
        );
    }

    #[test]
    fn test_encode_connect_with_raw_block() {
        let raw = hex("17009f013c0090011400000500000f020101038500");
        let encoded = encode_adapter_connect_raw(&raw);
        assert_eq!(encoded[..3], hex("010302")[..]);
        assert_eq!(encoded[3..], raw[..]);
    }

    #[test]
    fn test_encode_connection_request() {
        let telegram = BusTelegram {
            mpi_address: 2,
            remote_id: 0x00,
            local_id: 0x14,
            kind: BusTelegramKind::ConnectionRequest {
                comm_type: CommType::Pg,
            },
        };
        assert_eq!(
            encode_bus(&telegram).unwrap()[..],
            hex("0482000d0014e00400800002000201000100")
        );

        let telegram = BusTelegram {
            mpi_address: 6,
            ..telegram
        };
        assert_eq!(
            encode_bus(&telegram).unwrap()[..],
            hex("0486000d0014e00400800002000201000100")
        );
    }

    #[test]
    fn test_encode_connection_confirm() {
        let telegram = BusTelegram {
            mpi_address: 2,
            remote_id: 0x12,
            local_id: 0x14,
            kind: BusTelegramKind::ConnectionConfirm { status: true },
        };
        assert_eq!(encode_bus(&telegram).unwrap()[..], hex("0482000c12140501"));
    }

    #[test]
    fn test_encode_data_exchange() {
        let payload = "32010000020000080000f0000001000101e0";
        let telegram = BusTelegram {
            mpi_address: 2,
            remote_id: 0x12,
            local_id: 0x14,
            kind: BusTelegramKind::DataExchange {
                sequence: 0,
                payload: Bytes::from(hex(payload)),
            },
        };
        let encoded = encode_bus(&telegram).unwrap();
        assert_eq!(encoded[..8], hex("0482000c1214f100")[..]);
        assert_eq!(encoded[8..], hex(payload)[..]);

        let telegram = BusTelegram {
            mpi_address: 2,
            remote_id: 0x12,
            local_id: 0x14,
            kind: BusTelegramKind::DataExchange {
                sequence: 3,
                payload: Bytes::from_static(&[0x32, 0x07]),
            },
        };
        assert_eq!(
            encode_bus(&telegram).unwrap()[..],
            hex("0482000c1214f1033207")
        );
    }

    #[test]
    fn test_encode_data_ack() {
        let telegram = BusTelegram {
            mpi_address: 2,
            remote_id: 0x12,
            local_id: 0x14,
            kind: BusTelegramKind::DataAck {
                status: true,
                sequence: 7,
            },
        };
        assert_eq!(encode_bus(&telegram).unwrap()[..], hex("0482000c1214b00107"));

        let telegram = BusTelegram {
            kind: BusTelegramKind::DataAck {
                status: false,
                sequence: 0,
            },
            ..telegram
        };
        assert_eq!(encode_bus(&telegram).unwrap()[..], hex("0482000c1214b0ff00"));
    }

    #[test]
    fn test_encode_disconnection_telegrams() {
        let request = BusTelegram {
            mpi_address: 2,
            remote_id: 0x12,
            local_id: 0x14,
            kind: BusTelegramKind::DisconnectionRequest,
        };
        assert_eq!(encode_bus(&request).unwrap()[..], hex("0482000c121480"));

        let confirm = BusTelegram {
            mpi_address: 2,
            remote_id: 0x14,
            local_id: 0x12,
            kind: BusTelegramKind::DisconnectionConfirm,
        };
        assert_eq!(encode_bus(&confirm).unwrap()[..], hex("0482000c1412c0"));
    }

    #[test]
    fn test_encode_rejects_empty_data_exchange() {
        let telegram = BusTelegram {
            mpi_address: 2,
            remote_id: 0x12,
            local_id: 0x14,
            kind: BusTelegramKind::DataExchange {
                sequence: 1,
                payload: Bytes::new(),
            },
        };
        assert!(matches!(
            encode_bus(&telegram),
            Err(MpiError::InvalidData(_))
        ));
    }

    #[test]
    fn test_encode_rejects_invalid_mpi_address() {
        let telegram = BusTelegram {
            mpi_address: 0x80,
            remote_id: 0,
            local_id: 0x14,
            kind: BusTelegramKind::DisconnectionRequest,
        };
        assert!(matches!(
            encode_bus(&telegram),
            Err(MpiError::InvalidData(_))
        ));
    }

    #[test]
    fn test_bus_round_trips() {
        let telegrams = [
            BusTelegram {
                mpi_address: 2,
                remote_id: 0,
                local_id: 0x14,
                kind: BusTelegramKind::ConnectionRequest {
                    comm_type: CommType::Op,
                },
            },
            BusTelegram {
                mpi_address: 0x1F,
                remote_id: 0x12,
                local_id: 0x14,
                kind: BusTelegramKind::ConnectionConfirm { status: false },
            },
            BusTelegram {
                mpi_address: 2,
                remote_id: 0x12,
                local_id: 0x14,
                kind: BusTelegramKind::DataExchange {
                    sequence: 0xFF,
                    payload: Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
                },
            },
            BusTelegram {
                mpi_address: 2,
                remote_id: 0x12,
                local_id: 0x14,
                kind: BusTelegramKind::DataAck {
                    status: true,
                    sequence: 0x42,
                },
            },
            BusTelegram {
                mpi_address: 2,
                remote_id: 0x12,
                local_id: 0x14,
                kind: BusTelegramKind::DisconnectionRequest,
            },
        ];

        for telegram in telegrams {
            let encoded = encode_bus(&telegram).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded, Telegram::Bus(telegram));
        }
    }
}
