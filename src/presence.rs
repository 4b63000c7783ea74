//! Presence notifications
//!
//! Turns a registry transition (`was_first` / `was_last`) into a durable
//! directory write and a `user_status` fanout to the contacts that are
//! connected right now. Runs as a spawned task issued from the
//! registry-mutation call site: failures are logged, never retried, and a
//! failed directory write does not cancel the fanout (the in-memory
//! registry stays authoritative for liveness).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::directory::{Directory, Status};
use crate::registry::Registry;
use crate::wire::{self, ServerMessage};

/// Presence transition notifier
#[derive(Clone)]
pub struct Notifier {
    registry: Arc<Registry>,
    directory: Arc<dyn Directory>,
}

impl Notifier {
    pub fn new(registry: Arc<Registry>, directory: Arc<dyn Directory>) -> Self {
        Self {
            registry,
            directory,
        }
    }

    /// Announce that an identity came online. Callers invoke this only for
    /// the first-connection transition, so contacts see at most one online
    /// event per online period.
    pub async fn announce_online(&self, user_id: i64) {
        if let Err(e) = self.directory.set_online(user_id).await {
            warn!(user_id, error = %e, "directory set_online failed");
        }

        self.broadcast(user_id, Status::Online, None).await;
    }

    /// Announce that an identity went offline at `last_seen`. Callers
    /// invoke this only for the last-connection transition.
    pub async fn announce_offline(&self, user_id: i64, last_seen: DateTime<Utc>) {
        if let Err(e) = self.directory.set_offline(user_id, last_seen).await {
            warn!(user_id, error = %e, "directory set_offline failed");
        }

        self.broadcast(user_id, Status::Offline, Some(last_seen)).await;
    }

    async fn broadcast(&self, user_id: i64, status: Status, last_seen: Option<DateTime<Utc>>) {
        let contact_ids = match self.directory.contact_ids(user_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(user_id, error = %e, "contact lookup failed, skipping presence fanout");
                return;
            }
        };

        let online: Vec<i64> = self
            .registry
            .connected_subset(&contact_ids)
            .into_iter()
            .collect();
        if online.is_empty() {
            debug!(user_id, "no online contacts to notify");
            return;
        }

        let message = ServerMessage::UserStatus {
            user_id,
            status,
            last_seen: last_seen.map(wire::format_timestamp),
        };
        let payload = wire::encode(&message);

        self.registry.fanout(&online, &payload).await;
        debug!(
            user_id,
            status = status.as_str(),
            contacts = online.len(),
            "presence fanout"
        );
    }
}
