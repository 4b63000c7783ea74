//! Gateway relay protocol
//!
//! Heliograph does not terminate client sockets itself. An edge gateway owns
//! the WebSockets and relays lifecycle events and data frames over a Unix
//! socket using this framed protocol.
//!
//! Every message is `[type: u8][payload_len: u32 BE][payload]`. Control
//! messages carry JSON payloads; `Frame` carries `[conn_id: u32 BE][data]`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Relay protocol version
pub const VERSION: u8 = 1;

/// Header size: 1 byte type + 4 bytes payload length
pub const HEADER_LEN: usize = 5;

/// Relay message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// heliograph -> gateway: announce itself after connect
    Attach = 1,
    /// gateway -> heliograph: handshake accepted, config follows
    Attached = 2,
    /// gateway -> heliograph: a client connection opened
    Open = 3,
    /// both directions: client data
    Frame = 4,
    /// gateway -> heliograph: a client connection closed
    Closed = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Attach),
            2 => Ok(MessageType::Attached),
            3 => Ok(MessageType::Open),
            4 => Ok(MessageType::Frame),
            5 => Ok(MessageType::Closed),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// Handshake request sent to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attach {
    pub version: u8,
    pub node: String,
}

/// Handshake response carrying runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attached {
    pub version: u8,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// A client connection opened at the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Open {
    pub conn_id: u32,
    pub remote_addr: String,
}

/// A client connection closed at the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Closed {
    pub conn_id: u32,
}

/// Client data, either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub conn_id: u32,
    pub data: Vec<u8>,
}

/// Relay protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownType(u8),
    #[error("payload truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("invalid control payload: {0}")]
    Json(#[from] serde_json::Error),
}

fn encode_message(msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(msg_type as u8);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decode a header from the start of `buf`. Returns the message type and
/// payload length. `buf` must hold at least [`HEADER_LEN`] bytes.
pub fn decode_header(buf: &[u8]) -> Result<(MessageType, usize), ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            expected: HEADER_LEN,
            actual: buf.len(),
        });
    }
    let msg_type = MessageType::try_from(buf[0])?;
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    Ok((msg_type, len))
}

pub fn encode_attach(attach: &Attach) -> Vec<u8> {
    let payload = serde_json::to_vec(attach).expect("attach serialization");
    encode_message(MessageType::Attach, &payload)
}

pub fn decode_attached(payload: &[u8]) -> Result<Attached, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn decode_open(payload: &[u8]) -> Result<Open, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn decode_closed(payload: &[u8]) -> Result<Closed, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + frame.data.len());
    payload.extend_from_slice(&frame.conn_id.to_be_bytes());
    payload.extend_from_slice(&frame.data);
    encode_message(MessageType::Frame, &payload)
}

pub fn decode_frame(payload: &[u8]) -> Result<Frame, ProtocolError> {
    if payload.len() < 4 {
        return Err(ProtocolError::Truncated {
            expected: 4,
            actual: payload.len(),
        });
    }
    let conn_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok(Frame {
        conn_id,
        data: payload[4..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame {
            conn_id: 42,
            data: b"test payload".to_vec(),
        };
        let encoded = encode_frame(&frame);
        let (msg_type, len) = decode_header(&encoded).unwrap();
        assert_eq!(msg_type, MessageType::Frame);
        let decoded = decode_frame(&encoded[HEADER_LEN..HEADER_LEN + len]).unwrap();
        assert_eq!(decoded.conn_id, 42);
        assert_eq!(decoded.data, b"test payload");
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame {
            conn_id: 7,
            data: Vec::new(),
        };
        let encoded = encode_frame(&frame);
        let (_, len) = decode_header(&encoded).unwrap();
        let decoded = decode_frame(&encoded[HEADER_LEN..HEADER_LEN + len]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_attach_roundtrip() {
        let attach = Attach {
            version: VERSION,
            node: "presence-1".to_string(),
        };
        let encoded = encode_attach(&attach);
        let (msg_type, len) = decode_header(&encoded).unwrap();
        assert_eq!(msg_type, MessageType::Attach);
        let decoded: Attach =
            serde_json::from_slice(&encoded[HEADER_LEN..HEADER_LEN + len]).unwrap();
        assert_eq!(decoded.node, "presence-1");
        assert_eq!(decoded.version, VERSION);
    }

    #[test]
    fn test_attached_config() {
        let payload = br#"{"version":1,"config":{"token_secret":"s3cr3t"}}"#;
        let attached = decode_attached(payload).unwrap();
        assert_eq!(attached.version, 1);
        assert_eq!(attached.config.get("token_secret").unwrap(), "s3cr3t");
    }

    #[test]
    fn test_attached_missing_config_defaults_empty() {
        let attached = decode_attached(br#"{"version":1}"#).unwrap();
        assert!(attached.config.is_empty());
    }

    #[test]
    fn test_unknown_message_type() {
        let buf = [9u8, 0, 0, 0, 0];
        assert!(matches!(
            decode_header(&buf),
            Err(ProtocolError::UnknownType(9))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let buf = [4u8, 0, 0];
        assert!(matches!(
            decode_header(&buf),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_truncated_frame_payload() {
        assert!(matches!(
            decode_frame(&[0, 0]),
            Err(ProtocolError::Truncated { .. })
        ));
    }
}
