//! Multiplexed TLS echo server library.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;

pub use config::{AppConfig, ServerConfig};
pub use server::{Server, ServerError};
