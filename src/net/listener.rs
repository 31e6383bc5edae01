//! TLS listening socket.
//!
//! # Responsibilities
//! - Build the server-side TLS context from the certificate/key pair
//! - Bind to the configured address (address reuse enabled)
//! - Accept one pending client per call and wrap it in a TLS session

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use mio::net::TcpListener;
use mio::{Interest, Registry, Token};
use rustls::ServerConfig as TlsServerConfig;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::net::connection::{ClientConnection, TransportError};
use crate::net::tls::{load_tls_config, TlsError};

/// Poll token reserved for the listening socket.
pub const LISTENER: Token = Token(0);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Certificate or key could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// Configured address did not parse.
    #[error("Invalid bind address `{0}`")]
    Address(String),
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
    /// Failed to start a TLS session for an accepted socket.
    #[error("Failed to start TLS session: {0}")]
    Session(#[from] TransportError),
}

/// The bound, TLS-wrapped listening endpoint. One per server instance.
pub struct ListeningSocket {
    inner: TcpListener,
    tls: Arc<TlsServerConfig>,
    local_addr: SocketAddr,
}

impl ListeningSocket {
    /// Load the TLS context and bind to `config`'s address.
    ///
    /// Both failures are startup-fatal; nothing here retries.
    pub fn create(
        config: &ServerConfig,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<Self, ListenerError> {
        let tls = load_tls_config(cert_path, key_path)?;
        Self::bind(config, tls)
    }

    /// Bind with an already-built TLS context.
    pub fn bind(config: &ServerConfig, tls: Arc<TlsServerConfig>) -> Result<Self, ListenerError> {
        let bind_address = config.bind_address();
        let addr: SocketAddr = bind_address
            .parse()
            .map_err(|_| ListenerError::Address(bind_address.clone()))?;

        // mio sets SO_REUSEADDR on Unix before binding.
        let inner = TcpListener::bind(addr).map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self {
            inner,
            tls,
            local_addr,
        })
    }

    /// Accept exactly one pending client, or `None` if the backlog is empty.
    pub fn accept(&self) -> Result<Option<ClientConnection>, ListenerError> {
        let (stream, peer_addr) = loop {
            match self.inner.accept() {
                Ok(accepted) => break accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ListenerError::Accept(e)),
            }
        };

        let connection = ClientConnection::new(stream, peer_addr, Arc::clone(&self.tls))?;
        tracing::debug!(
            peer = %peer_addr,
            connection_id = %connection.id(),
            "Connection accepted"
        );
        Ok(Some(connection))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn register(&mut self, registry: &Registry) -> std::io::Result<()> {
        registry.register(&mut self.inner, LISTENER, Interest::READABLE)
    }

    pub fn deregister(&mut self, registry: &Registry) -> std::io::Result<()> {
        registry.deregister(&mut self.inner)
    }
}

impl std::fmt::Debug for ListeningSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListeningSocket")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
