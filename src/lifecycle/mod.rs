//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main → Server::bind):
//!     Load and validate config → Load TLS context → Bind listener
//!
//! Session (Server::start):
//!     Spawn workers → Poll/dispatch loop → last client leaves → Finished
//!
//! Shutdown (Server::disconnect):
//!     Close listener → Workers drain the queue and exit → Report
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - No external cancellation; the registry emptying ends the session

pub mod session;

pub use session::{Session, SessionTracker};
