//! Shared test doubles

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::directory::{Directory, Status, UserStatusInfo};

/// Scriptable directory double. Reads and writes can be made to fail to
/// exercise the fire-and-log paths.
pub struct StubDirectory {
    pub statuses: DashMap<i64, UserStatusInfo>,
    pub contacts: DashMap<i64, Vec<i64>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl StubDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            statuses: DashMap::new(),
            contacts: DashMap::new(),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        })
    }

    pub fn seed_user(&self, user_id: i64, status: Status, last_seen: Option<DateTime<Utc>>) {
        self.statuses.insert(
            user_id,
            UserStatusInfo {
                user_id,
                status,
                last_seen,
            },
        );
    }

    pub fn set_contacts(&self, user_id: i64, contacts: Vec<i64>) {
        self.contacts.insert(user_id, contacts);
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    fn check_write(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("stub directory write failure");
        }
        Ok(())
    }

    fn check_read(&self) -> anyhow::Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("stub directory read failure");
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for StubDirectory {
    async fn set_online(&self, user_id: i64) -> anyhow::Result<()> {
        self.check_write()?;
        let mut entry = self.statuses.entry(user_id).or_insert(UserStatusInfo {
            user_id,
            status: Status::Offline,
            last_seen: None,
        });
        entry.status = Status::Online;
        Ok(())
    }

    async fn set_offline(&self, user_id: i64, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.check_write()?;
        let mut entry = self.statuses.entry(user_id).or_insert(UserStatusInfo {
            user_id,
            status: Status::Offline,
            last_seen: None,
        });
        entry.status = Status::Offline;
        entry.last_seen = Some(at);
        Ok(())
    }

    async fn status(&self, user_id: i64) -> anyhow::Result<Option<UserStatusInfo>> {
        self.check_read()?;
        Ok(self.statuses.get(&user_id).map(|entry| entry.clone()))
    }

    async fn statuses(&self, user_ids: &[i64]) -> anyhow::Result<Vec<UserStatusInfo>> {
        self.check_read()?;
        Ok(user_ids
            .iter()
            .filter_map(|id| self.statuses.get(id).map(|entry| entry.clone()))
            .collect())
    }

    async fn contact_ids(&self, user_id: i64) -> anyhow::Result<Vec<i64>> {
        self.check_read()?;
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
