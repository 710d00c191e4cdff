//! TFTP wire format (RFC 1350), one message per UDP datagram.
//!
//! ```text
//! RRQ/WRQ: opcode(2) | filename | 0x00 | mode | 0x00
//! DATA:    opcode(2) | block(2) | payload (0..=512 bytes)
//! ACK:     opcode(2) | block(2)
//! ERROR:   opcode(2) | error_code(2) | message | 0x00
//! ```
//!
//! A DATA payload shorter than 512 bytes marks the final block of a
//! transfer. All two-byte integers use the session's byte order
//! (big-endian unless configured otherwise); the order is fixed when the
//! session is created and both ends must agree for its whole lifetime.
use bytes::Bytes;
use thiserror::Error;

/// Opcode field width in bytes.
pub const OPCODE_SIZE: usize = 2;

/// Block number field width in bytes.
pub const BLOCK_ID_SIZE: usize = 2;

/// Maximum payload bytes per DATA message.
pub const BLOCK_SIZE: usize = 512;

/// DATA/ACK header: opcode + block number.
pub const DATA_HEADER: usize = OPCODE_SIZE + BLOCK_ID_SIZE;

/// Largest datagram a session produces (full DATA message).
pub const MAX_PACKET: usize = DATA_HEADER + BLOCK_SIZE;

/// Default transfer mode for requests.
pub const DEFAULT_MODE: &str = "octet";

/// Codec failures. A datagram that does not decode is either foreign
/// traffic or a malformed peer; the engines fail the session on these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("unknown error code {0}")]
    UnknownErrorCode(u16),
    #[error("truncated datagram ({0} bytes)")]
    Truncated(usize),
}

/// Byte order for the two-byte integer fields of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    /// The host's native order.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    fn put_u16(self, buf: &mut Vec<u8>, value: u16) {
        match self {
            ByteOrder::Big => buf.extend_from_slice(&value.to_be_bytes()),
            ByteOrder::Little => buf.extend_from_slice(&value.to_le_bytes()),
        }
    }

    fn get_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
            ByteOrder::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
        }
    }
}

/// The five TFTP opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Result<Self, WireError> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// TFTP error codes with their fixed RFC 1350 descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
}

impl ErrorCode {
    pub fn from_u16(value: u16) -> Result<Self, WireError> {
        match value {
            0 => Ok(ErrorCode::NoError),
            1 => Ok(ErrorCode::FileNotFound),
            2 => Ok(ErrorCode::AccessViolation),
            3 => Ok(ErrorCode::DiskFull),
            4 => Ok(ErrorCode::IllegalOperation),
            5 => Ok(ErrorCode::UnknownTransferId),
            6 => Ok(ErrorCode::FileAlreadyExists),
            7 => Ok(ErrorCode::NoSuchUser),
            other => Err(WireError::UnknownErrorCode(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::NoError => "No error.",
            ErrorCode::FileNotFound => "File not found.",
            ErrorCode::AccessViolation => "Access violation.",
            ErrorCode::DiskFull => "Disk full or allocation exceeded.",
            ErrorCode::IllegalOperation => "Illegal TFTP operation.",
            ErrorCode::UnknownTransferId => "Unknown transfer ID.",
            ErrorCode::FileAlreadyExists => "File already exists.",
            ErrorCode::NoSuchUser => "No such user.",
        }
    }
}

/// A single wire message. `decode(encode(m)) == m` for every valid message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ReadRequest { filename: String, mode: String },
    WriteRequest { filename: String, mode: String },
    Data { block: u16, payload: Bytes },
    Ack { block: u16 },
    Error { code: ErrorCode, message: String },
}

impl Message {
    /// RRQ with the default "octet" mode.
    pub fn read_request(filename: impl Into<String>) -> Self {
        Message::ReadRequest {
            filename: filename.into(),
            mode: DEFAULT_MODE.to_string(),
        }
    }

    /// WRQ with the default "octet" mode.
    pub fn write_request(filename: impl Into<String>) -> Self {
        Message::WriteRequest {
            filename: filename.into(),
            mode: DEFAULT_MODE.to_string(),
        }
    }

    /// ERROR carrying an error code's fixed description.
    pub fn error(code: ErrorCode) -> Self {
        Message::Error {
            code,
            message: code.description().to_string(),
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Message::ReadRequest { .. } => Opcode::Rrq,
            Message::WriteRequest { .. } => Opcode::Wrq,
            Message::Data { .. } => Opcode::Data,
            Message::Ack { .. } => Opcode::Ack,
            Message::Error { .. } => Opcode::Error,
        }
    }

    /// True for a DATA message whose payload is shorter than [`BLOCK_SIZE`],
    /// i.e. the final block of a transfer.
    pub fn is_last(&self) -> bool {
        matches!(self, Message::Data { payload, .. } if payload.len() < BLOCK_SIZE)
    }

    /// Exact byte length `encode` will produce.
    pub fn wire_size(&self) -> usize {
        match self {
            Message::ReadRequest { filename, mode } | Message::WriteRequest { filename, mode } => {
                OPCODE_SIZE + filename.len() + 1 + mode.len() + 1
            }
            Message::Data { payload, .. } => DATA_HEADER + payload.len(),
            Message::Ack { .. } => DATA_HEADER,
            Message::Error { message, .. } => OPCODE_SIZE + 2 + message.len() + 1,
        }
    }

    /// Serialize to the canonical wire layout.
    pub fn encode(&self, order: ByteOrder) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_size());
        order.put_u16(&mut buf, self.opcode().as_u16());
        match self {
            Message::ReadRequest { filename, mode } | Message::WriteRequest { filename, mode } => {
                buf.extend_from_slice(filename.as_bytes());
                buf.push(0);
                buf.extend_from_slice(mode.as_bytes());
                buf.push(0);
            }
            Message::Data { block, payload } => {
                order.put_u16(&mut buf, *block);
                buf.extend_from_slice(payload);
            }
            Message::Ack { block } => {
                order.put_u16(&mut buf, *block);
            }
            Message::Error { code, message } => {
                order.put_u16(&mut buf, code.as_u16());
                buf.extend_from_slice(message.as_bytes());
                buf.push(0);
            }
        }
        buf
    }

    /// Parse one whole datagram. No partial decode — datagram semantics
    /// guarantee the full packet arrives at once.
    pub fn decode(buf: &[u8], order: ByteOrder) -> Result<Message, WireError> {
        if buf.len() < OPCODE_SIZE {
            return Err(WireError::Truncated(buf.len()));
        }
        let opcode = Opcode::from_u16(order.get_u16(&buf[0..2]))?;
        let body = &buf[OPCODE_SIZE..];
        match opcode {
            Opcode::Rrq | Opcode::Wrq => {
                let (filename, rest) = take_cstr(body, buf.len())?;
                let (mode, _) = take_cstr(rest, buf.len())?;
                if opcode == Opcode::Rrq {
                    Ok(Message::ReadRequest { filename, mode })
                } else {
                    Ok(Message::WriteRequest { filename, mode })
                }
            }
            Opcode::Data => {
                if body.len() < BLOCK_ID_SIZE {
                    return Err(WireError::Truncated(buf.len()));
                }
                Ok(Message::Data {
                    block: order.get_u16(&body[0..2]),
                    payload: Bytes::copy_from_slice(&body[BLOCK_ID_SIZE..]),
                })
            }
            Opcode::Ack => {
                if body.len() < BLOCK_ID_SIZE {
                    return Err(WireError::Truncated(buf.len()));
                }
                Ok(Message::Ack {
                    block: order.get_u16(&body[0..2]),
                })
            }
            Opcode::Error => {
                // code(2) + terminating zero at minimum
                if body.len() < 3 {
                    return Err(WireError::Truncated(buf.len()));
                }
                let code = ErrorCode::from_u16(order.get_u16(&body[0..2]))?;
                let text = &body[2..body.len() - 1];
                Ok(Message::Error {
                    code,
                    message: String::from_utf8_lossy(text).into_owned(),
                })
            }
        }
    }
}

/// Split a zero-terminated string off the front of `body`.
fn take_cstr(body: &[u8], datagram_len: usize) -> Result<(String, &[u8]), WireError> {
    match body.iter().position(|&b| b == 0) {
        Some(nul) => {
            let text = String::from_utf8_lossy(&body[..nul]).into_owned();
            Ok((text, &body[nul + 1..]))
        }
        None => Err(WireError::Truncated(datagram_len)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message, order: ByteOrder) {
        let bytes = msg.encode(order);
        assert_eq!(bytes.len(), msg.wire_size());
        let parsed = Message::decode(&bytes, order).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn roundtrip_requests() {
        roundtrip(Message::read_request("boot.img"), ByteOrder::Big);
        roundtrip(Message::write_request("firmware.bin"), ByteOrder::Big);
        roundtrip(
            Message::ReadRequest {
                filename: "a".into(),
                mode: "netascii".into(),
            },
            ByteOrder::Big,
        );
    }

    #[test]
    fn roundtrip_data_ack_error() {
        roundtrip(
            Message::Data {
                block: 7,
                payload: Bytes::from(vec![0xAB; 512]),
            },
            ByteOrder::Big,
        );
        roundtrip(
            Message::Data {
                block: 65535,
                payload: Bytes::new(),
            },
            ByteOrder::Big,
        );
        roundtrip(Message::Ack { block: 0 }, ByteOrder::Big);
        roundtrip(Message::error(ErrorCode::DiskFull), ByteOrder::Big);
    }

    #[test]
    fn roundtrip_little_endian_session() {
        roundtrip(Message::Ack { block: 0x0102 }, ByteOrder::Little);
        roundtrip(Message::write_request("le.bin"), ByteOrder::Little);
        roundtrip(Message::error(ErrorCode::NoSuchUser), ByteOrder::Little);
    }

    #[test]
    fn opcode_field_is_first_two_bytes() {
        let bytes = Message::Ack { block: 9 }.encode(ByteOrder::Big);
        assert_eq!(&bytes[0..2], &[0, 4]);
    }

    #[test]
    fn reject_unknown_opcode() {
        let buf = [0u8, 9, 0, 1];
        assert_eq!(
            Message::decode(&buf, ByteOrder::Big),
            Err(WireError::UnknownOpcode(9))
        );
    }

    #[test]
    fn reject_unknown_error_code() {
        let buf = [0u8, 5, 0, 8, b'x', 0];
        assert_eq!(
            Message::decode(&buf, ByteOrder::Big),
            Err(WireError::UnknownErrorCode(8))
        );
    }

    #[test]
    fn reject_truncated() {
        assert_eq!(
            Message::decode(&[0u8], ByteOrder::Big),
            Err(WireError::Truncated(1))
        );
        // ACK missing its block number
        assert_eq!(
            Message::decode(&[0u8, 4], ByteOrder::Big),
            Err(WireError::Truncated(2))
        );
        // request without a mode terminator
        let buf = [0u8, 2, b'f', 0, b'o'];
        assert_eq!(
            Message::decode(&buf, ByteOrder::Big),
            Err(WireError::Truncated(5))
        );
    }

    #[test]
    fn short_payload_marks_last_block() {
        let full = Message::Data {
            block: 1,
            payload: Bytes::from(vec![0u8; 512]),
        };
        let short = Message::Data {
            block: 2,
            payload: Bytes::from(vec![0u8; 511]),
        };
        assert!(!full.is_last());
        assert!(short.is_last());
        assert!(!Message::Ack { block: 1 }.is_last());
    }

    #[test]
    fn error_descriptions_fixed() {
        assert_eq!(ErrorCode::FileNotFound.description(), "File not found.");
        assert_eq!(ErrorCode::from_u16(6), Ok(ErrorCode::FileAlreadyExists));
        let msg = Message::error(ErrorCode::AccessViolation);
        match Message::decode(&msg.encode(ByteOrder::Big), ByteOrder::Big).unwrap() {
            Message::Error { code, message } => {
                assert_eq!(code, ErrorCode::AccessViolation);
                assert_eq!(message, "Access violation.");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
