//! Protocol dispatcher
//!
//! Drives the per-connection state machine: decodes inbound frames, enforces
//! the authentication gate, routes messages to handlers, and answers errors
//! without ever closing the connection. Presence side effects are issued as
//! spawned tasks at the registry-mutation call sites.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::auth::TokenVerifier;
use crate::directory::{Directory, Status, UserStatusInfo};
use crate::presence::Notifier;
use crate::protocol::Open;
use crate::registry::Registry;
use crate::session::{Identity, Session};
use crate::wire::{self, ClientMessage, ServerMessage, StatusEntry, WireError};

/// Frame dispatcher for all relayed connections
pub struct Dispatcher {
    registry: Arc<Registry>,
    verifier: Arc<dyn TokenVerifier>,
    directory: Arc<dyn Directory>,
    notifier: Notifier,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        verifier: Arc<dyn TokenVerifier>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let notifier = Notifier::new(registry.clone(), directory.clone());
        Self {
            registry,
            verifier,
            directory,
            notifier,
        }
    }

    /// A client connection opened at the gateway
    pub fn handle_open(&self, open: Open) {
        self.registry
            .add_session(Session::new(open.conn_id, open.remote_addr));
        debug!(
            conn_id = open.conn_id,
            sessions = self.registry.session_count(),
            "connection opened"
        );
    }

    /// A data frame arrived for a connection
    pub async fn handle_frame(&self, conn_id: u32, data: &[u8]) {
        let authenticated = match self.registry.get_session(conn_id) {
            Some(session) => session.is_authenticated(),
            None => {
                warn!(conn_id, "frame for unknown session");
                return;
            }
        };

        let message = match wire::parse_message(data) {
            Ok(message) => message,
            Err(e) => {
                self.reply_parse_error(conn_id, e).await;
                return;
            }
        };

        // The auth gate: an unauthenticated connection may only authenticate
        if !authenticated && !matches!(message, ClientMessage::Auth { .. }) {
            self.send_auth_error(conn_id, "authentication required").await;
            return;
        }

        match message {
            ClientMessage::Auth { token } => self.handle_auth(conn_id, authenticated, &token).await,
            ClientMessage::Ping => self.handle_ping(conn_id).await,
            ClientMessage::GetStatuses { user_ids } => {
                self.handle_get_statuses(conn_id, &user_ids).await
            }
        }
    }

    /// A client connection closed at the gateway
    pub async fn handle_close(&self, conn_id: u32) {
        let closed_at = Utc::now();

        let Some((session, was_last)) = self.registry.remove_session(conn_id) else {
            warn!(conn_id, "close for unknown session");
            return;
        };

        if let Some(identity) = session.identity()
            && was_last
        {
            let user_id = identity.user_id;
            info!(conn_id, user_id, "last connection closed, going offline");

            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                notifier.announce_offline(user_id, closed_at).await;
            });
        }

        debug!(
            conn_id,
            sessions = self.registry.session_count(),
            "connection closed"
        );
    }

    /// Authenticate a connection. A second `auth` on an authenticated
    /// connection is rejected; the identity bind is one-way.
    async fn handle_auth(&self, conn_id: u32, authenticated: bool, token: &str) {
        if authenticated {
            self.send_auth_error(conn_id, "already authenticated").await;
            return;
        }

        let claims = match self.verifier.verify(token).await {
            Ok(claims) => claims,
            Err(e) => {
                debug!(conn_id, error = %e, "token rejected");
                self.send_auth_error(conn_id, "invalid token").await;
                return;
            }
        };

        let identity = Identity {
            user_id: claims.user_id,
            username: claims.username.clone(),
        };
        let user_id = identity.user_id;

        let Some(was_first) = self.registry.authenticate(conn_id, identity) else {
            warn!(conn_id, user_id, "authentication raced with session teardown");
            return;
        };

        info!(conn_id, user_id, username = %claims.username, "authenticated");

        if was_first {
            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                notifier.announce_online(user_id).await;
            });
        }

        let success = ServerMessage::AuthSuccess {
            user_id,
            username: claims.username,
        };
        self.registry.send(conn_id, &wire::encode(&success)).await;

        // Initial snapshot of everyone the user shares a chat with
        match self.directory.contact_statuses(user_id).await {
            Ok(infos) => {
                let reply = ServerMessage::ContactsStatuses {
                    statuses: self.merge_live_status(infos),
                };
                self.registry.send(conn_id, &wire::encode(&reply)).await;
            }
            Err(e) => {
                warn!(conn_id, user_id, error = %e, "contact statuses unavailable");
            }
        }
    }

    async fn handle_ping(&self, conn_id: u32) {
        self.registry
            .send(conn_id, &wire::encode(&ServerMessage::Pong))
            .await;
    }

    async fn handle_get_statuses(&self, conn_id: u32, user_ids: &[i64]) {
        match self.directory.statuses(user_ids).await {
            Ok(infos) => {
                let reply = ServerMessage::ContactsStatuses {
                    statuses: self.merge_live_status(infos),
                };
                self.registry.send(conn_id, &wire::encode(&reply)).await;
            }
            Err(e) => {
                warn!(conn_id, error = %e, "status lookup failed");
                let reply = ServerMessage::Error {
                    error: "status lookup failed".to_string(),
                };
                self.registry.send(conn_id, &wire::encode(&reply)).await;
            }
        }
    }

    /// Overlay registry liveness onto directory rows: an identity the
    /// registry holds live is online no matter what its row says.
    fn merge_live_status(&self, infos: Vec<UserStatusInfo>) -> Vec<StatusEntry> {
        infos
            .into_iter()
            .map(|info| {
                if self.registry.is_online(info.user_id) {
                    StatusEntry {
                        user_id: info.user_id,
                        status: Status::Online,
                        last_seen: None,
                    }
                } else {
                    StatusEntry::from(info)
                }
            })
            .collect()
    }

    async fn reply_parse_error(&self, conn_id: u32, err: WireError) {
        debug!(conn_id, error = %err, "rejected client frame");

        let error = match err {
            WireError::UnknownType(msg_type) => format!("unknown message type: {msg_type}"),
            _ => "invalid message format".to_string(),
        };
        self.registry
            .send(conn_id, &wire::encode(&ServerMessage::Error { error }))
            .await;
    }

    async fn send_auth_error(&self, conn_id: u32, error: &str) {
        let reply = ServerMessage::AuthError {
            error: error.to_string(),
        };
        self.registry.send(conn_id, &wire::encode(&reply)).await;
    }
}
