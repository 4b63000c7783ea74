//! Connection session state
//!
//! A session represents a single relayed client connection. It starts
//! unauthenticated and can transition to authenticated exactly once.

/// The authenticated principal a connection belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

/// Per-connection state
#[derive(Debug)]
pub struct Session {
    /// Unique connection ID (assigned by the gateway)
    pub conn_id: u32,
    /// Remote address as reported by the gateway
    pub remote_addr: String,
    /// Identity claims (set after authentication)
    identity: Option<Identity>,
}

impl Session {
    /// Create a new session from an Open message
    pub fn new(conn_id: u32, remote_addr: String) -> Self {
        Self {
            conn_id,
            remote_addr,
            identity: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Bind identity claims into the session. One-way: a second call is
    /// rejected and the existing identity is kept.
    pub fn authenticate(&mut self, identity: Identity) -> bool {
        if self.identity.is_some() {
            return false;
        }
        self.identity = Some(identity);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: i64) -> Identity {
        Identity {
            user_id,
            username: format!("user{user_id}"),
        }
    }

    #[test]
    fn test_starts_unauthenticated() {
        let session = Session::new(1, "127.0.0.1:9000".to_string());
        assert!(!session.is_authenticated());
        assert!(session.identity().is_none());
    }

    #[test]
    fn test_authenticate_binds_identity() {
        let mut session = Session::new(1, "127.0.0.1:9000".to_string());
        assert!(session.authenticate(identity(42)));
        assert!(session.is_authenticated());
        assert_eq!(session.identity().unwrap().user_id, 42);
    }

    #[test]
    fn test_authenticate_is_one_way() {
        let mut session = Session::new(1, "127.0.0.1:9000".to_string());
        assert!(session.authenticate(identity(42)));
        assert!(!session.authenticate(identity(13)));
        assert_eq!(session.identity().unwrap().user_id, 42);
    }
}
