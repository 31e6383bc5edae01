//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::{ErrorKind, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use echo_client_sdk::EchoClient;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use tempfile::TempDir;
use tls_echo_server::server::exchange::ExchangeLog;
use tls_echo_server::{Server, ServerConfig, ServerError};

/// Certificate material written to a temporary directory.
pub struct Certs {
    _dir: TempDir,
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Generate a throwaway CA and a `localhost` server certificate signed by it.
pub fn generate_certs() -> Certs {
    let mut ca_params = CertificateParams::default();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "tls-echo-server test CA");
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let mut server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    server_params
        .distinguished_name
        .push(DnType::CommonName, "localhost");
    let server_key = KeyPair::generate().unwrap();
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let ca = dir.path().join("ca.pem");
    let cert = dir.path().join("server_cert.pem");
    let key = dir.path().join("server_key.pem");
    fs::write(&ca, ca_cert.pem()).unwrap();
    fs::write(&cert, server_cert.pem()).unwrap();
    fs::write(&key, server_key.serialize_pem()).unwrap();

    Certs {
        _dir: dir,
        ca,
        cert,
        key,
    }
}

pub fn test_config(workers: usize, max_data_size: usize) -> ServerConfig {
    ServerConfig {
        ip_address: "127.0.0.1".to_string(),
        port: 0,
        max_data_size,
        number_working_threads: workers,
        poll_timeout_secs: 1,
        queue_timeout_secs: 1,
    }
}

/// A server session running on its own thread.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub log: Arc<ExchangeLog>,
    pub certs: Certs,
    handle: JoinHandle<Result<Server, ServerError>>,
}

impl RunningServer {
    pub fn client(&self) -> EchoClient {
        EchoClient::connect(self.addr, "localhost", &self.certs.ca).unwrap()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the session to end and hand back the server.
    pub fn finish(self, within: Duration) -> Server {
        let deadline = Instant::now() + within;
        while !self.handle.is_finished() {
            assert!(Instant::now() < deadline, "server session did not finish in time");
            thread::sleep(Duration::from_millis(20));
        }
        self.handle.join().unwrap().unwrap()
    }
}

pub fn start_server(config: ServerConfig) -> RunningServer {
    let certs = generate_certs();
    let mut server = Server::bind(config, &certs.cert, &certs.key).unwrap();
    let addr = server.local_addr();
    let log = server.exchange_log();

    let handle = thread::spawn(move || {
        let outcome = server.start();
        server.disconnect();
        outcome.map(|()| server)
    });

    RunningServer {
        addr,
        log,
        certs,
        handle,
    }
}

/// Poll `condition` until it holds or `within` elapses.
pub fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// Read until the peer hangs up. `false` if it is still open after the
/// read timeout.
pub fn closed_by_peer(stream: &mut impl Read) -> bool {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return false
            }
            Err(_) => return true,
        }
    }
}
