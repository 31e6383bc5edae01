//! Blocking TLS client for the echo server.
//!
//! Works like a chat: send a message, wait for the reply, repeat. Sending
//! the terminator `"q"` asks the server to hang up.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::ring;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use thiserror::Error;

/// Payload the server treats as a disconnect request.
pub const TERMINATOR: &str = "q";

/// Largest reply taken from the socket per `receive`.
pub const MAX_DATA_SIZE: usize = 1024;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid server name `{0}`")]
    ServerName(String),

    #[error("No trusted certificates found in {0:?}")]
    NoRoots(std::path::PathBuf),
}

pub struct EchoClient {
    stream: StreamOwned<ClientConnection, TcpStream>,
    broken: bool,
    responses: Vec<String>,
}

impl EchoClient {
    /// Connect and trust the PEM certificate(s) at `ca_path`.
    ///
    /// The TLS handshake runs lazily on the first send.
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        server_name: &str,
        ca_path: &Path,
    ) -> Result<Self, ClientError> {
        let roots = load_roots(ca_path)?;
        Self::connect_with_roots(addr, server_name, roots)
    }

    pub fn connect_with_roots<A: ToSocketAddrs>(
        addr: A,
        server_name: &str,
        roots: RootCertStore,
    ) -> Result<Self, ClientError> {
        let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ClientError::ServerName(server_name.to_string()))?;
        let connection = ClientConnection::new(Arc::new(config), name)?;

        let socket = TcpStream::connect(addr)?;
        socket.set_read_timeout(Some(DEFAULT_READ_TIMEOUT))?;
        tracing::debug!(peer = ?socket.peer_addr().ok(), "Connected");

        Ok(Self {
            stream: StreamOwned::new(connection, socket),
            broken: false,
            responses: Vec::new(),
        })
    }

    /// Send a whole message. Returns `false` on any failure, and keeps
    /// returning `false` for every later call once a send has failed.
    pub fn send(&mut self, message: &str) -> bool {
        if self.broken {
            return false;
        }
        let result = self
            .stream
            .write_all(message.as_bytes())
            .and_then(|()| self.stream.flush());

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Send failed");
                self.broken = true;
                false
            }
        }
    }

    /// Wait for one reply (at most `MAX_DATA_SIZE` bytes).
    ///
    /// `None` on EOF, timeout or error.
    pub fn receive(&mut self) -> Option<String> {
        let mut buf = [0u8; MAX_DATA_SIZE];
        match self.stream.read(&mut buf) {
            Ok(0) => None,
            Ok(n) => {
                let response = String::from_utf8_lossy(&buf[..n]).into_owned();
                self.responses.push(response.clone());
                Some(response)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Receive failed");
                None
            }
        }
    }

    /// Send, then wait for the reply.
    pub fn request(&mut self, message: &str) -> Option<String> {
        if self.send(message) {
            self.receive()
        } else {
            None
        }
    }

    /// Every reply received so far, in order.
    pub fn responses(&self) -> &[String] {
        &self.responses
    }

    /// Our end of the connection, as the server sees it.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.sock.local_addr()
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.sock.set_read_timeout(Some(timeout))
    }

    /// Ask the server to hang up, then close our side.
    pub fn disconnect(mut self) {
        self.send(TERMINATOR);
        self.close();
    }

    /// Close without sending the terminator.
    pub fn close(mut self) {
        self.stream.conn.send_close_notify();
        let _ = self.stream.flush();
        let _ = self.stream.sock.shutdown(Shutdown::Both);
    }
}

/// Read PEM certificates into a root store.
pub fn load_roots(path: &Path) -> Result<RootCertStore, ClientError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert?)?;
    }
    if roots.is_empty() {
        return Err(ClientError::NoRoots(path.to_path_buf()));
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn rejects_bad_server_name() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let err = EchoClient::connect_with_roots(
            listener.local_addr().unwrap(),
            "not a hostname!",
            RootCertStore::empty(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ClientError::ServerName(_)));
    }

    #[test]
    fn send_fails_when_peer_drops_before_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = EchoClient::connect_with_roots(
            listener.local_addr().unwrap(),
            "localhost",
            RootCertStore::empty(),
        )
        .unwrap();

        let (accepted, _) = listener.accept().unwrap();
        drop(accepted);
        drop(listener);

        assert!(!client.send("Hello_Server"));
        assert!(client.is_broken());
        assert!(!client.send("again"));
        assert!(client.responses().is_empty());
    }

    #[test]
    fn missing_ca_file_is_io_error() {
        let err = load_roots(Path::new("/no/such/ca.pem")).unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
