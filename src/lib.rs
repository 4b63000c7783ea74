//! Heliograph - Real-time presence server
//!
//! Tracks which identities currently hold a live connection, runs a
//! lightweight authentication handshake over that connection, and fans out
//! online/offline notifications to the contacts that are connected right
//! now.
//!
//! Heliograph runs behind an edge gateway that terminates the client
//! WebSockets and relays lifecycle events and frames over a Unix socket.
//!
//! ## Architecture
//!
//! ```text
//! Client (WS) → Gateway → Unix Socket → Heliograph → Directory (Postgres)
//! ```
//!
//! ## Environment Variables
//!
//! - `HG_NODE` - This node's name (socket file name)
//! - `HG_SOCKET_DIR` - Directory for Unix sockets (optional)

// Compile-time feature validation: exactly one directory backend required
#[cfg(not(any(feature = "postgres", feature = "memory")))]
compile_error!(
    "Heliograph requires a directory backend. Enable: --features postgres OR --features memory"
);

// Enforce mutual exclusivity
#[cfg(all(feature = "postgres", feature = "memory"))]
compile_error!(
    "Only one directory backend can be enabled. Use --no-default-features --features memory."
);

pub mod auth;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod wire;

#[cfg(test)]
pub(crate) mod testutil;

pub use auth::{Claims, HmacTokenVerifier, TokenVerifier};
pub use config::Config;
pub use directory::{Directory, Status, UserStatusInfo};
pub use dispatcher::Dispatcher;
pub use presence::Notifier;
pub use registry::Registry;
pub use session::{Identity, Session};
pub use wire::{ClientMessage, ServerMessage};

#[cfg(feature = "postgres")]
pub use directory::PostgresDirectory;

#[cfg(feature = "memory")]
pub use directory::MemoryDirectory;
