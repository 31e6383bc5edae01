//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept one per readiness, wrap in TLS session)
//!     → tls.rs (server context built once at startup)
//!     → connection.rs (state machine, TLS record pump, inbox)
//!     → Hand off to the dispatcher
//!
//! Connection States:
//!     Accepted → Monitored → Readable | Faulted → Removed
//! ```
//!
//! # Design Decisions
//! - Sockets are non-blocking; readiness comes from the poller
//! - TLS handshakes progress inside the normal read/flush path
//! - A connection handle is shared between the dispatcher and at most
//!   one worker at a time

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ClientConnection, ConnectionHandle, ConnectionId, ConnectionState, Flush, TransportError};
pub use listener::{ListenerError, ListeningSocket, LISTENER};

#[cfg(test)]
pub(crate) mod testing;
