//! In-memory directory backend
//!
//! Single-node only, nothing survives a restart. Intended for development
//! and demo deployments where no chat database exists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::directory::{Directory, Status, UserStatusInfo};

/// In-memory presence directory
pub struct MemoryDirectory {
    users: DashMap<i64, UserStatusInfo>,
    contacts: DashMap<i64, Vec<i64>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            contacts: DashMap::new(),
        }
    }

    /// Seed a user row (offline, never seen)
    pub fn insert_user(&self, user_id: i64) {
        self.users.entry(user_id).or_insert(UserStatusInfo {
            user_id,
            status: Status::Offline,
            last_seen: None,
        });
    }

    /// Record a shared chat membership between two users, both directions
    pub fn add_contact(&self, a: i64, b: i64) {
        self.insert_user(a);
        self.insert_user(b);

        let mut a_contacts = self.contacts.entry(a).or_default();
        if !a_contacts.contains(&b) {
            a_contacts.push(b);
        }
        drop(a_contacts);

        let mut b_contacts = self.contacts.entry(b).or_default();
        if !b_contacts.contains(&a) {
            b_contacts.push(a);
        }
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn set_online(&self, user_id: i64) -> anyhow::Result<()> {
        let mut entry = self.users.entry(user_id).or_insert(UserStatusInfo {
            user_id,
            status: Status::Offline,
            last_seen: None,
        });
        entry.status = Status::Online;
        Ok(())
    }

    async fn set_offline(&self, user_id: i64, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut entry = self.users.entry(user_id).or_insert(UserStatusInfo {
            user_id,
            status: Status::Offline,
            last_seen: None,
        });
        entry.status = Status::Offline;
        entry.last_seen = Some(at);
        Ok(())
    }

    async fn status(&self, user_id: i64) -> anyhow::Result<Option<UserStatusInfo>> {
        Ok(self.users.get(&user_id).map(|entry| entry.clone()))
    }

    async fn statuses(&self, user_ids: &[i64]) -> anyhow::Result<Vec<UserStatusInfo>> {
        Ok(user_ids
            .iter()
            .filter_map(|id| self.users.get(id).map(|entry| entry.clone()))
            .collect())
    }

    async fn contact_ids(&self, user_id: i64) -> anyhow::Result<Vec<i64>> {
        Ok(self
            .contacts
            .get(&user_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn contact_statuses(&self, user_id: i64) -> anyhow::Result<Vec<UserStatusInfo>> {
        let ids = self.contact_ids(user_id).await?;
        self.statuses(&ids).await
    }
}
