//! Presence directory
//!
//! Durable store of last-known status and the contact graph. The directory
//! only reflects the last liveness transition it was told about; the
//! in-memory [`Registry`](crate::registry::Registry) stays authoritative for
//! "is online now".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDirectory;

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "memory")]
pub use memory::MemoryDirectory;

/// Presence status of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
        }
    }
}

/// Last-known status of a user as recorded by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatusInfo {
    pub user_id: i64,
    pub status: Status,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Durable status store and contact graph
///
/// Contacts are users sharing at least one chat membership, self excluded.
/// All methods are best-effort from the presence core's point of view:
/// failures are surfaced to the caller and logged there, never retried.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Record that a user came online.
    async fn set_online(&self, user_id: i64) -> anyhow::Result<()>;

    /// Record that a user went offline at the given instant.
    async fn set_offline(&self, user_id: i64, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Last-known status of a single user, `None` if unknown.
    async fn status(&self, user_id: i64) -> anyhow::Result<Option<UserStatusInfo>>;

    /// Last-known statuses for a set of users. Unknown ids are omitted.
    async fn statuses(&self, user_ids: &[i64]) -> anyhow::Result<Vec<UserStatusInfo>>;

    /// Ids of everyone sharing a chat with the user.
    async fn contact_ids(&self, user_id: i64) -> anyhow::Result<Vec<i64>>;

    /// Statuses of everyone sharing a chat with the user.
    async fn contact_statuses(&self, user_id: i64) -> anyhow::Result<Vec<UserStatusInfo>>;
}
