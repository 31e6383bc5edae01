//! Client connection state and TLS stream handling.
//!
//! # Responsibilities
//! - Generate unique connection IDs (doubling as poll tokens)
//! - Track connection state (Accepted → Monitored → Readable/Faulted → Removed)
//! - Pump TLS records between the socket and the plaintext inbox
//! - Write responses and flush pending TLS output

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use parking_lot::Mutex;
use rustls::{ServerConfig, ServerConnection};
use thiserror::Error;

/// Tokens below this value are reserved for the listener and the waker.
pub const FIRST_CONNECTION_TOKEN: usize = 2;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// TLS record header: content type, protocol version, payload length.
const RECORD_HEADER_LEN: usize = 5;

/// Largest record a peer may send (2^14 plaintext plus expansion).
const MAX_RECORD_LEN: usize = RECORD_HEADER_LEN + 16384 + 2048;

/// Length of the first complete record in `wire`, if there is one.
///
/// A header announcing an impossible length is returned whole so the TLS
/// session rejects it instead of waiting forever for the rest.
fn next_record_len(wire: &[u8]) -> Option<usize> {
    if wire.len() < RECORD_HEADER_LEN {
        return None;
    }
    let len = RECORD_HEADER_LEN + u16::from_be_bytes([wire[3], wire[4]]) as usize;
    if len > MAX_RECORD_LEN {
        return Some(wire.len());
    }
    (wire.len() >= len).then_some(len)
}

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicUsize = AtomicUsize::new(FIRST_CONNECTION_TOKEN);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The poll token this connection is registered under.
    pub fn token(&self) -> Token {
        Token(self.0)
    }

    /// Map a poll token back to a connection ID, if it can be one.
    pub fn from_token(token: Token) -> Option<Self> {
        (token.0 >= FIRST_CONNECTION_TOKEN).then_some(Self(token.0))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted from the listener, not yet registered for readiness.
    Accepted,
    /// Registered and waiting for events.
    Monitored,
    /// Reported ready to read in the current poll cycle.
    Readable,
    /// Reported faulted in the current poll cycle.
    Faulted,
    /// Deregistered and shut down.
    Removed,
}

/// Per-connection transport failure. Never fatal to the server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("payload is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("connection already closed")]
    Closed,
}

/// Outcome of pushing buffered TLS output to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Nothing left to write.
    Done,
    /// The socket would block; the rest stays buffered.
    Pending,
}

/// Shared handle to a connection: read by the dispatcher, written by workers.
pub type ConnectionHandle = Arc<Mutex<ClientConnection>>;

/// A live TLS-wrapped client stream plus its remote address.
pub struct ClientConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    stream: TcpStream,
    tls: ServerConnection,
    /// Ciphertext not yet forming a complete record.
    wire: Vec<u8>,
    /// Decrypted messages not yet handed to the dispatcher, one per record.
    inbox: VecDeque<Vec<u8>>,
    peer_closed: bool,
    /// A work item from this connection is queued or being answered.
    in_flight: bool,
    write_interest: bool,
    state: ConnectionState,
}

impl ClientConnection {
    /// Wrap an accepted socket in a fresh server-side TLS session.
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        tls_config: Arc<ServerConfig>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            id: ConnectionId::new(),
            peer_addr,
            stream,
            tls: ServerConnection::new(tls_config)?,
            wire: Vec::new(),
            inbox: VecDeque::new(),
            peer_closed: false,
            in_flight: false,
            write_interest: false,
            state: ConnectionState::Accepted,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        if self.state != ConnectionState::Removed {
            self.state = state;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Removed
    }

    /// Whether the peer has shut down its side (EOF or close_notify).
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// True if the dispatcher must look at this connection again without
    /// waiting for the OS: buffered plaintext, or an EOF not yet acted on.
    /// Always false while a work item is outstanding.
    pub fn needs_attention(&self) -> bool {
        !self.in_flight && (!self.inbox.is_empty() || self.peer_closed)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Mark that a payload from this connection has been enqueued.
    pub fn begin_item(&mut self) {
        self.in_flight = true;
    }

    /// Mark that the outstanding payload has been answered (or dropped).
    pub fn finish_item(&mut self) {
        self.in_flight = false;
    }

    pub fn wants_write(&self) -> bool {
        self.tls.wants_write()
    }

    /// Start monitoring for readability.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.id.token(), Interest::READABLE)?;
        self.set_state(ConnectionState::Monitored);
        Ok(())
    }

    /// Add or drop write interest. Only touches the poller on a change.
    pub fn watch_writable(&mut self, registry: &Registry, enabled: bool) -> io::Result<()> {
        if self.write_interest == enabled {
            return Ok(());
        }
        let interest = if enabled {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        registry.reregister(&mut self.stream, self.id.token(), interest)?;
        self.write_interest = enabled;
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Drain the socket into the plaintext inbox.
    ///
    /// Reads until the socket would block, so an edge-triggered poller sees
    /// every byte. Complete records are fed to the TLS session one at a
    /// time and each record's plaintext becomes its own inbox segment, so
    /// back-to-back messages never merge. Handshake replies and alerts are
    /// flushed afterwards. Returns the number of plaintext bytes added.
    pub fn receive(&mut self) -> Result<usize, TransportError> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => self.wire.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut received = 0;
        while let Some(len) = next_record_len(&self.wire) {
            let record: Vec<u8> = self.wire.drain(..len).collect();
            match self.open_record(&record) {
                Ok(n) => received += n,
                Err(e) => {
                    // Let the peer see the alert before we tear down.
                    let _ = self.flush();
                    return Err(e);
                }
            }
        }

        self.flush()?;
        Ok(received)
    }

    /// Feed one record to the TLS session and keep its plaintext.
    fn open_record(&mut self, mut record: &[u8]) -> Result<usize, TransportError> {
        while !record.is_empty() {
            self.tls.read_tls(&mut record)?;
        }
        let io_state = self.tls.process_new_packets()?;

        let pending = io_state.plaintext_bytes_to_read();
        if pending > 0 {
            let mut segment = vec![0u8; pending];
            self.tls.reader().read_exact(&mut segment)?;
            self.inbox.push_back(segment);
        }
        if io_state.peer_has_closed() {
            self.peer_closed = true;
        }
        Ok(pending)
    }

    /// Take the next message, at most `max` bytes of it.
    ///
    /// A message longer than `max` is handed out over several calls.
    pub fn take_chunk(&mut self, max: usize) -> Option<Vec<u8>> {
        let mut segment = self.inbox.pop_front()?;
        if segment.len() > max {
            let rest = segment.split_off(max);
            self.inbox.push_front(rest);
        }
        Some(segment)
    }

    /// Queue `data` for the peer and push as much as the socket accepts.
    pub fn send(&mut self, data: &[u8]) -> Result<Flush, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tls.writer().write_all(data)?;
        self.flush()
    }

    /// Push buffered TLS records to the socket until drained or blocked.
    pub fn flush(&mut self) -> Result<Flush, TransportError> {
        while self.tls.wants_write() {
            match self.tls.write_tls(&mut self.stream) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Flush::Pending),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Flush::Done)
    }

    /// Say goodbye at the TLS layer and shut the socket down. Idempotent.
    ///
    /// The descriptor itself is released when the last handle drops.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = ConnectionState::Removed;
        self.tls.send_close_notify();
        let _ = self.flush();
        let _ = self.stream.shutdown(Shutdown::Both);
        self.inbox.clear();
        self.wire.clear();
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("buffered", &self.inbox.len())
            .field("partial_record", &self.wire.len())
            .field("peer_closed", &self.peer_closed)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::loopback_connection;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1 < id2);
    }

    #[test]
    fn reserved_tokens_are_not_connections() {
        assert_eq!(ConnectionId::from_token(Token(0)), None);
        assert_eq!(ConnectionId::from_token(Token(1)), None);

        let id = ConnectionId::new();
        assert_eq!(ConnectionId::from_token(id.token()), Some(id));
    }

    #[test]
    fn display_uses_conn_prefix() {
        let id = ConnectionId::from_token(Token(42)).unwrap();
        assert_eq!(id.to_string(), "conn-42");
    }

    #[test]
    fn in_flight_item_suppresses_attention() {
        let (mut connection, peer) = loopback_connection();
        drop(peer);

        // Wait for the FIN to land so the read sees EOF.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !connection.is_peer_closed() && std::time::Instant::now() < deadline {
            connection.receive().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(connection.is_peer_closed());
        assert!(connection.needs_attention());

        connection.begin_item();
        assert!(!connection.needs_attention());
        connection.finish_item();
        assert!(connection.needs_attention());
    }

    #[test]
    fn send_after_close_fails() {
        let (mut connection, _peer) = loopback_connection();
        connection.close();
        assert!(connection.is_closed());
        assert!(matches!(connection.send(b"late"), Err(TransportError::Closed)));

        // Closing again is a no-op.
        connection.close();
        assert_eq!(connection.state(), ConnectionState::Removed);
    }

    #[test]
    fn removed_state_is_terminal() {
        let (mut connection, _peer) = loopback_connection();
        assert_eq!(connection.state(), ConnectionState::Accepted);
        connection.set_state(ConnectionState::Readable);
        assert_eq!(connection.state(), ConnectionState::Readable);
        connection.close();
        connection.set_state(ConnectionState::Monitored);
        assert_eq!(connection.state(), ConnectionState::Removed);
    }

    #[test]
    fn messages_stay_separate_in_the_inbox() {
        let (mut connection, _peer) = loopback_connection();
        connection.inbox.push_back(b"gamma".to_vec());
        connection.inbox.push_back(b"delta".to_vec());
        connection.inbox.push_back(b"q".to_vec());

        assert_eq!(connection.take_chunk(1024).unwrap(), b"gamma");
        assert_eq!(connection.take_chunk(1024).unwrap(), b"delta");
        assert_eq!(connection.take_chunk(1024).unwrap(), b"q");
        assert!(connection.take_chunk(1024).is_none());
    }

    #[test]
    fn long_message_is_split_without_touching_the_next() {
        let (mut connection, _peer) = loopback_connection();
        connection.inbox.push_back(b"abcdefghij".to_vec());
        connection.inbox.push_back(b"next".to_vec());

        assert_eq!(connection.take_chunk(4).unwrap(), b"abcd");
        assert_eq!(connection.take_chunk(4).unwrap(), b"efgh");
        assert_eq!(connection.take_chunk(4).unwrap(), b"ij");
        assert_eq!(connection.take_chunk(4).unwrap(), b"next");
    }

    #[test]
    fn record_framing() {
        // Incomplete header.
        assert_eq!(next_record_len(&[23, 3, 3, 0]), None);
        // Header says 4 bytes of body, only 2 present.
        assert_eq!(next_record_len(&[23, 3, 3, 0, 4, 1, 2]), None);
        // One full record followed by the start of another.
        assert_eq!(next_record_len(&[23, 3, 3, 0, 2, 1, 2, 23, 3]), Some(7));
        // Garbage announcing an oversized record is handed over as is.
        assert_eq!(next_record_len(&[0xff; 8]), Some(8));
    }

    #[test]
    fn take_chunk_on_empty_inbox_is_none() {
        let (mut connection, _peer) = loopback_connection();
        assert!(connection.take_chunk(1024).is_none());
    }
}
