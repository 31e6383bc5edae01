//! Loopback fixtures shared by unit tests.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;

use crate::net::connection::ClientConnection;

/// A server TLS context backed by a throwaway self-signed certificate.
pub fn tls_server_config() -> Arc<ServerConfig> {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = CertificateDer::from(certified.cert.der().to_vec());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    Arc::new(config)
}

/// An accepted, non-blocking server-side connection and the raw peer socket.
pub fn loopback_connection() -> (ClientConnection, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (accepted, peer_addr) = listener.accept().unwrap();
    accepted.set_nonblocking(true).unwrap();

    let stream = mio::net::TcpStream::from_std(accepted);
    let connection = ClientConnection::new(stream, peer_addr, tls_server_config()).unwrap();
    (connection, peer)
}
