//! Multiplexed TLS server.
//!
//! # Data Flow
//! ```text
//! poller.rs (bounded wait on listener ∪ registry)
//!     → dispatcher.rs (accept | read one chunk | evict)
//!     → queue.rs (unbounded MPMC FIFO of WorkItems)
//!     → worker.rs (N threads: respond, write back, record)
//!     → exchange.rs (per-client history, read after the session)
//! ```
//!
//! # Threads
//! One multiplexing thread owns the registry and the listener. Worker
//! threads only hold connection handles taken from work items.

pub mod dispatcher;
pub mod exchange;
pub mod poller;
pub mod queue;
pub mod registry;
pub mod worker;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig as TlsServerConfig;
use thiserror::Error;

use crate::config::validation::describe;
use crate::config::{validate_server, ServerConfig, ValidationError};
use crate::lifecycle::Session;
use crate::net::{ListenerError, ListeningSocket};
use dispatcher::Dispatcher;
use exchange::ExchangeLog;
use poller::Multiplexer;
use registry::ConnectionRegistry;
use worker::WorkerPool;

pub use dispatcher::TERMINATOR;
pub use exchange::{ClientHistory, Exchange};

const EVENT_CAPACITY: usize = 1024;

/// Fatal server errors. Per-connection failures never surface here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid server configuration: {}", describe(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("Poll failed: {0}")]
    Poll(std::io::Error),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),

    #[error("Server is not listening")]
    NotListening,
}

/// Owns the listener, config and exchange log for one session.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    listener: Option<ListeningSocket>,
    local_addr: SocketAddr,
    log: Arc<ExchangeLog>,
}

impl Server {
    /// Load the certificate/key pair and bind the listener.
    pub fn bind(config: ServerConfig, cert_path: &Path, key_path: &Path) -> Result<Self, ServerError> {
        validate_server(&config).map_err(ServerError::InvalidConfig)?;
        let listener = ListeningSocket::create(&config, cert_path, key_path)?;
        Ok(Self::from_listener(config, listener))
    }

    /// Bind with a TLS context built elsewhere.
    pub fn with_tls(config: ServerConfig, tls: Arc<TlsServerConfig>) -> Result<Self, ServerError> {
        validate_server(&config).map_err(ServerError::InvalidConfig)?;
        let listener = ListeningSocket::bind(&config, tls)?;
        Ok(Self::from_listener(config, listener))
    }

    fn from_listener(config: ServerConfig, listener: ListeningSocket) -> Self {
        tracing::info!(
            address = %listener.local_addr(),
            max_data_size = config.max_data_size,
            workers = config.number_working_threads,
            "Server ready"
        );
        Self {
            local_addr: listener.local_addr(),
            listener: Some(listener),
            config,
            log: Arc::new(ExchangeLog::new()),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle to the exchange history, valid before and after `start`.
    pub fn exchange_log(&self) -> Arc<ExchangeLog> {
        Arc::clone(&self.log)
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Run the session: blocks until the last connected client has left.
    ///
    /// Workers are joined before returning, so the exchange log is final.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let listener = self.listener.as_mut().ok_or(ServerError::NotListening)?;

        let mut mux = Multiplexer::new(EVENT_CAPACITY).map_err(ServerError::Poll)?;
        listener.register(mux.registry()).map_err(ServerError::Poll)?;

        let (sender, receiver) = queue::work_queue();
        let pool = WorkerPool::spawn(
            self.config.number_working_threads,
            receiver,
            Arc::clone(&self.log),
            mux.notifier(),
            self.config.queue_timeout(),
        )
        .map_err(ServerError::Spawn)?;

        let mut registry = ConnectionRegistry::new();
        let mut dispatcher = Dispatcher::new(self.config.max_data_size, sender);
        let poll_timeout = self.config.poll_timeout();

        tracing::info!("Scanning sockets");
        let outcome = loop {
            let readiness = match mux.poll(&mut registry, poll_timeout) {
                Ok(readiness) => readiness,
                Err(e) => break Err(ServerError::Poll(e)),
            };
            if dispatcher.dispatch(readiness, listener, &mut mux, &mut registry) == Session::Finished {
                tracing::info!("All clients disconnected, session finished");
                break Ok(());
            }
        };

        dispatcher.evict_all(&mut mux, &mut registry);
        if let Err(e) = listener.deregister(mux.registry()) {
            tracing::debug!(error = %e, "Listener deregister failed");
        }

        // Dropping the dispatcher drops the only producer; workers drain and exit.
        drop(dispatcher);
        pool.join();

        outcome
    }

    /// Close the listening socket. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if let Some(listener) = self.listener.take() {
            tracing::info!(address = %listener.local_addr(), "Closing server socket");
        }
    }

    /// Render the exchange history of every client.
    pub fn report(&self) -> String {
        self.log.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::tls_server_config;

    fn ephemeral() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn binds_ephemeral_port() {
        let server = Server::with_tls(ephemeral(), tls_server_config()).unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.is_listening());
    }

    #[test]
    fn disconnect_is_idempotent_and_blocks_start() {
        let mut server = Server::with_tls(ephemeral(), tls_server_config()).unwrap();
        server.disconnect();
        server.disconnect();
        assert!(!server.is_listening());
        assert!(matches!(server.start(), Err(ServerError::NotListening)));
    }

    #[test]
    fn address_in_use_is_fatal() {
        let first = Server::with_tls(ephemeral(), tls_server_config()).unwrap();
        let taken = ServerConfig {
            port: first.local_addr().port(),
            ..ServerConfig::default()
        };
        // A live listener on the port still blocks a second bind.
        let err = Server::with_tls(taken, tls_server_config()).unwrap_err();
        assert!(matches!(err, ServerError::Listener(ListenerError::Bind(_))));
    }

    #[test]
    fn rejects_config_without_workers() {
        let config = ServerConfig {
            number_working_threads: 0,
            ..ephemeral()
        };
        let err = Server::with_tls(config, tls_server_config()).unwrap_err();
        assert!(matches!(
            &err,
            ServerError::InvalidConfig(errors) if errors == &[ValidationError::NoWorkers]
        ));
        assert!(err.to_string().contains("number_working_threads"));
    }

    #[test]
    fn bind_checks_config_before_loading_certificates() {
        let config = ServerConfig {
            max_data_size: 0,
            ..ephemeral()
        };
        let err = Server::bind(
            config,
            Path::new("/no/such/cert.pem"),
            Path::new("/no/such/key.pem"),
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::InvalidConfig(_)));
    }

    #[test]
    fn missing_certificate_is_fatal() {
        let err = Server::bind(
            ephemeral(),
            Path::new("/no/such/cert.pem"),
            Path::new("/no/such/key.pem"),
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::Listener(ListenerError::Tls(_))));
    }

    #[test]
    fn empty_report_before_any_session() {
        let server = Server::with_tls(ephemeral(), tls_server_config()).unwrap();
        assert!(server.exchange_log().is_empty());
        assert!(server.report().starts_with("All the messages"));
    }
}
