//! Client wire protocol
//!
//! JSON messages exchanged with clients (via the gateway), discriminated by
//! a `type` field.
//!
//! ## Client Messages
//! - `auth`: authenticate with a bearer token
//! - `ping`: liveness check
//! - `get_statuses`: query statuses for a list of user ids
//!
//! ## Server Messages
//! - `auth_success` / `auth_error`
//! - `pong`
//! - `user_status`: presence transition of a contact
//! - `contacts_statuses`: batch status reply
//! - `error`: generic error frame
//!
//! Parsing happens in two phases so the dispatcher can tell malformed JSON,
//! missing `type`, unknown `type`, and invalid fields apart.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::directory::{Status, UserStatusInfo};

/// Client-to-server messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        token: String,
    },
    Ping,
    GetStatuses {
        #[serde(rename = "userIds")]
        user_ids: Vec<i64>,
    },
}

/// Known client message type tags, for the unknown-type distinction
const CLIENT_TYPES: &[&str] = &["auth", "ping", "get_statuses"];

/// Server-to-client messages
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: i64,
        username: String,
    },
    AuthError {
        error: String,
    },
    Pong,
    UserStatus {
        #[serde(rename = "userId")]
        user_id: i64,
        status: Status,
        #[serde(rename = "lastSeen", skip_serializing_if = "Option::is_none")]
        last_seen: Option<String>,
    },
    ContactsStatuses {
        statuses: Vec<StatusEntry>,
    },
    Error {
        error: String,
    },
}

/// One entry of a `contacts_statuses` reply
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub status: Status,
    #[serde(rename = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

impl From<UserStatusInfo> for StatusEntry {
    fn from(info: UserStatusInfo) -> Self {
        Self {
            user_id: info.user_id,
            status: info.status,
            last_seen: info.last_seen.map(format_timestamp),
        }
    }
}

/// ISO-8601 with millisecond precision, as clients expect
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a client message from raw frame bytes
pub fn parse_message(data: &[u8]) -> Result<ClientMessage, WireError> {
    let value: Value = serde_json::from_slice(data).map_err(WireError::Json)?;

    let msg_type = match value.get("type").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None => return Err(WireError::MissingType),
    };

    match serde_json::from_value::<ClientMessage>(value) {
        Ok(message) => Ok(message),
        Err(source) => {
            if CLIENT_TYPES.contains(&msg_type.as_str()) {
                Err(WireError::InvalidFields { msg_type, source })
            } else {
                Err(WireError::UnknownType(msg_type))
            }
        }
    }
}

/// Encode a server message to frame bytes
pub fn encode(msg: &ServerMessage) -> Vec<u8> {
    serde_json::to_vec(msg).expect("server message serialization")
}

/// Wire protocol errors
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid message format: {0}")]
    Json(#[source] serde_json::Error),
    #[error("message has no type field")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid {msg_type} message: {source}")]
    InvalidFields {
        msg_type: String,
        source: serde_json::Error,
    },
}
