//! Connection Registry
//!
//! Owns every live connection (and its session) plus the identity index.
//! Single source of truth for "is this identity online": an identity is
//! online exactly while its connection set is non-empty.
//!
//! `add`/`remove` compute the first/last-connection transition inside one
//! DashMap entry operation, so two connections racing on the same identity
//! yield exactly one `was_first` (and symmetrically one `was_last`).

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::Frame;
use crate::session::{Identity, Session};

/// Registry of live connections and their identities
pub struct Registry {
    /// All live connections by connection ID, each owning its session
    sessions: DashMap<u32, Session>,

    /// Identity index: user id -> connection IDs (multi-device)
    by_user: DashMap<i64, HashSet<u32>>,

    /// Channel to send frames back to the gateway
    outgoing_tx: mpsc::Sender<Frame>,
}

impl Registry {
    /// Create a new Registry
    pub fn new(outgoing_tx: mpsc::Sender<Frame>) -> Self {
        Self {
            sessions: DashMap::new(),
            by_user: DashMap::new(),
            outgoing_tx,
        }
    }

    /// Register a new session
    pub fn add_session(&self, session: Session) {
        debug!(
            conn_id = session.conn_id,
            remote = %session.remote_addr,
            "session registered"
        );
        self.sessions.insert(session.conn_id, session);
    }

    /// Get session by connection ID
    pub fn get_session(&self, conn_id: u32) -> Option<dashmap::mapref::one::Ref<'_, u32, Session>> {
        self.sessions.get(&conn_id)
    }

    /// Bind identity claims into a session and index the connection.
    /// Returns `was_first`, or `None` if the connection is unknown or
    /// already authenticated (the bind is one-way).
    pub fn authenticate(&self, conn_id: u32, identity: Identity) -> Option<bool> {
        let user_id = identity.user_id;

        let mut session = self.sessions.get_mut(&conn_id)?;
        if !session.authenticate(identity) {
            return None;
        }
        drop(session);

        Some(self.add(user_id, conn_id))
    }

    /// Destroy a session. If it was authenticated, deregisters the
    /// connection and reports whether it was the identity's last one.
    pub fn remove_session(&self, conn_id: u32) -> Option<(Session, bool)> {
        let (_, session) = self.sessions.remove(&conn_id)?;

        let was_last = match session.identity() {
            Some(identity) => self.remove(identity.user_id, conn_id),
            None => false,
        };

        debug!(conn_id, "session removed");
        Some((session, was_last))
    }

    /// Atomically insert a connection into an identity's set. Returns
    /// whether it is now the identity's only connection. Callers must not
    /// add the same connection twice (the dispatcher's one-way auth gate
    /// guarantees this).
    pub fn add(&self, user_id: i64, conn_id: u32) -> bool {
        let mut conns = self.by_user.entry(user_id).or_default();
        conns.insert(conn_id);
        let was_first = conns.len() == 1;
        debug!(
            user_id,
            conn_id,
            connections = conns.len(),
            "connection registered"
        );
        was_first
    }

    /// Atomically remove a connection from an identity's set. Returns
    /// whether the identity has zero connections afterwards. No-op (false)
    /// if the identity or connection is unknown.
    pub fn remove(&self, user_id: i64, conn_id: u32) -> bool {
        let Some(mut conns) = self.by_user.get_mut(&user_id) else {
            return false;
        };
        if !conns.remove(&conn_id) {
            return false;
        }
        let was_last = conns.is_empty();
        drop(conns);

        // Drop the empty entry; remove_if re-checks under the shard lock in
        // case a concurrent add revived it.
        if was_last {
            self.by_user.remove_if(&user_id, |_, conns| conns.is_empty());
        }

        debug!(user_id, conn_id, was_last, "connection deregistered");
        was_last
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.by_user
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Filter a candidate set to the identities currently online
    pub fn connected_subset(&self, user_ids: &[i64]) -> HashSet<i64> {
        user_ids
            .iter()
            .copied()
            .filter(|id| self.is_online(*id))
            .collect()
    }

    /// Best-effort send of one payload to every live connection of every
    /// given identity. The target list is snapshotted first so no map lock
    /// is held across channel sends; one failed send never aborts the rest.
    pub async fn fanout(&self, user_ids: &[i64], payload: &[u8]) {
        let mut targets: Vec<u32> = Vec::new();
        for user_id in user_ids {
            if let Some(conns) = self.by_user.get(user_id) {
                targets.extend(conns.iter().copied());
            }
        }

        debug!(
            users = user_ids.len(),
            connections = targets.len(),
            "fanout"
        );

        for conn_id in targets {
            self.send(conn_id, payload).await;
        }
    }

    /// Send a payload to a specific connection
    pub async fn send(&self, conn_id: u32, payload: &[u8]) {
        let frame = Frame {
            conn_id,
            data: payload.to_vec(),
        };

        if let Err(e) = self.outgoing_tx.send(frame).await {
            warn!(conn_id, error = %e, "failed to queue outgoing frame");
        }
    }

    /// Get session count
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Get count of identities currently online
    pub fn online_count(&self) -> usize {
        self.by_user.len()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.sessions.len())
            .field("online", &self.by_user.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> (Arc<Registry>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(Registry::new(tx)), rx)
    }

    #[test]
    fn test_online_iff_connections_nonempty() {
        let (registry, _rx) = registry();

        assert!(!registry.is_online(42));
        registry.add(42, 1);
        assert!(registry.is_online(42));
        registry.remove(42, 1);
        assert!(!registry.is_online(42));
    }

    #[test]
    fn test_add_then_remove_leaves_no_entry() {
        let (registry, _rx) = registry();

        registry.add(42, 1);
        registry.remove(42, 1);
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn test_first_and_last_transitions() {
        let (registry, _rx) = registry();

        assert!(registry.add(42, 1));
        assert!(!registry.add(42, 2));
        assert!(!registry.remove(42, 1));
        assert!(registry.remove(42, 2));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let (registry, _rx) = registry();

        assert!(!registry.remove(42, 1));
        registry.add(42, 1);
        assert!(!registry.remove(42, 99));
        assert!(!registry.remove(13, 1));
        assert!(registry.is_online(42));
    }

    #[test]
    fn test_concurrent_adds_yield_one_first() {
        let (registry, _rx) = registry();

        let handles: Vec<_> = (0..8)
            .map(|conn_id| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.add(42, conn_id))
            })
            .collect();

        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|was_first| *was_first)
            .count();
        assert_eq!(firsts, 1);
    }

    #[test]
    fn test_concurrent_removes_yield_one_last() {
        let (registry, _rx) = registry();

        for conn_id in 0..8 {
            registry.add(42, conn_id);
        }

        let handles: Vec<_> = (0..8)
            .map(|conn_id| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.remove(42, conn_id))
            })
            .collect();

        let lasts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|was_last| *was_last)
            .count();
        assert_eq!(lasts, 1);
        assert!(!registry.is_online(42));
    }

    #[test]
    fn test_connected_subset() {
        let (registry, _rx) = registry();

        registry.add(1, 10);
        registry.add(3, 30);

        let online = registry.connected_subset(&[1, 2, 3, 4]);
        assert_eq!(online, HashSet::from([1, 3]));
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_connection() {
        let (registry, mut rx) = registry();

        registry.add(1, 10);
        registry.add(1, 11);
        registry.add(2, 20);

        registry.fanout(&[1, 2, 99], b"payload").await;

        let mut conn_ids = HashSet::new();
        for _ in 0..3 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.data, b"payload");
            conn_ids.insert(frame.conn_id);
        }
        assert_eq!(conn_ids, HashSet::from([10, 11, 20]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_authenticate_binds_and_indexes() {
        let (registry, _rx) = registry();

        registry.add_session(Session::new(1, "127.0.0.1:9000".to_string()));
        let identity = Identity {
            user_id: 42,
            username: "marissa".to_string(),
        };

        assert_eq!(registry.authenticate(1, identity.clone()), Some(true));
        assert!(registry.is_online(42));

        // One-way: a second bind on the same connection is refused
        assert_eq!(registry.authenticate(1, identity), None);

        // Unknown connection
        let other = Identity {
            user_id: 13,
            username: "sasha".to_string(),
        };
        assert_eq!(registry.authenticate(99, other), None);
    }

    #[test]
    fn test_remove_session_lifecycle() {
        let (registry, _rx) = registry();

        registry.add_session(Session::new(1, "127.0.0.1:9000".to_string()));
        registry.add_session(Session::new(2, "127.0.0.1:9001".to_string()));
        let identity = Identity {
            user_id: 42,
            username: "marissa".to_string(),
        };
        registry.authenticate(1, identity.clone());
        registry.authenticate(2, identity);

        let (session, was_last) = registry.remove_session(1).unwrap();
        assert!(session.is_authenticated());
        assert!(!was_last);
        assert!(registry.is_online(42));

        let (_, was_last) = registry.remove_session(2).unwrap();
        assert!(was_last);
        assert!(!registry.is_online(42));
        assert_eq!(registry.session_count(), 0);
        assert!(registry.remove_session(1).is_none());
    }

    #[test]
    fn test_remove_unauthenticated_session() {
        let (registry, _rx) = registry();

        registry.add_session(Session::new(1, "127.0.0.1:9000".to_string()));
        let (session, was_last) = registry.remove_session(1).unwrap();
        assert!(!session.is_authenticated());
        assert!(!was_last);
    }
}
