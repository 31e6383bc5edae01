//! Inbound dispatcher.
//!
//! # Responsibilities
//! - Accept one client per listener readiness and register it
//! - Take one bounded chunk per readable client and enqueue it
//! - Evict clients on EOF, the terminator payload, transport errors or faults
//! - Push TLS output the workers could not finish writing
//!
//! Runs only on the multiplexing thread, which is the sole writer of the
//! connection registry.

use std::net::SocketAddr;

use crate::lifecycle::{Session, SessionTracker};
use crate::net::{
    ClientConnection, ConnectionId, ConnectionState, Flush, ListeningSocket, TransportError,
};
use crate::observability::metrics;
use crate::server::poller::{Multiplexer, Readiness};
use crate::server::queue::{WorkItem, WorkSender};
use crate::server::registry::ConnectionRegistry;

/// Payload that asks the server to hang up instead of answering.
pub const TERMINATOR: &str = "q";

/// What one bounded read produced.
#[derive(Debug)]
enum Inbound {
    Payload(String),
    Terminator,
    /// Handshake progress only, or a response is still outstanding.
    Idle,
    Disconnected,
    Failed(TransportError),
}

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Terminator,
    TransportError,
    Faulted,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::Terminator => "terminator",
            CloseReason::TransportError => "transport_error",
            CloseReason::Faulted => "faulted",
        }
    }
}

pub struct Dispatcher {
    max_data_size: usize,
    queue: WorkSender,
    session: SessionTracker,
}

impl Dispatcher {
    pub fn new(max_data_size: usize, queue: WorkSender) -> Self {
        Self {
            max_data_size,
            queue,
            session: SessionTracker::new(),
        }
    }

    /// Handle one cycle of readiness and report whether the session goes on.
    pub fn dispatch(
        &mut self,
        readiness: Readiness,
        listener: &ListeningSocket,
        mux: &mut Multiplexer,
        registry: &mut ConnectionRegistry,
    ) -> Session {
        if readiness.listener {
            self.accept(listener, mux, registry);
        }
        for id in readiness.readable {
            self.read(id, mux, registry);
        }
        for id in readiness.writable {
            self.flush(id, mux, registry);
        }
        for id in readiness.faulted {
            self.evict(id, CloseReason::Faulted, mux, registry);
        }

        self.session.observe(registry.len(), mux.listener_pending())
    }

    fn accept(
        &mut self,
        listener: &ListeningSocket,
        mux: &mut Multiplexer,
        registry: &mut ConnectionRegistry,
    ) {
        let accepted = listener.accept();
        if !matches!(accepted, Ok(None)) {
            // The backlog may hold more, and no new edge will say so.
            mux.carry_listener();
        }
        let mut connection = match accepted {
            Ok(Some(connection)) => connection,
            Ok(None) => return,
            Err(e) => {
                // Per-client failure (e.g. descriptor exhaustion); keep serving.
                tracing::warn!(error = %e, "Accept failed");
                return;
            }
        };

        let peer = connection.peer_addr();
        if let Err(e) = connection.register(mux.registry()) {
            tracing::warn!(peer = %peer, error = %e, "Failed to monitor new client");
            connection.close();
            return;
        }

        let id = connection.id();
        registry.add(connection);
        self.session.client_joined();
        metrics::record_accepted();
        metrics::set_active_connections(registry.len());
        tracing::info!(
            peer = %peer,
            connection_id = %id,
            active = registry.len(),
            "New client added to monitored connections"
        );
    }

    fn read(&mut self, id: ConnectionId, mux: &mut Multiplexer, registry: &mut ConnectionRegistry) {
        let Some(handle) = registry.get(id).cloned() else {
            return;
        };

        let (inbound, address) = {
            let mut connection = handle.lock();
            connection.set_state(ConnectionState::Readable);
            let inbound = self.read_one(&mut connection);
            connection.set_state(ConnectionState::Monitored);
            (inbound, connection.peer_addr())
        };

        match inbound {
            Inbound::Payload(payload) => {
                tracing::debug!(peer = %address, bytes = payload.len(), "Received payload");
                self.enqueue(WorkItem {
                    connection: handle.clone(),
                    address,
                    payload,
                });
            }
            Inbound::Idle => {}
            Inbound::Terminator => {
                self.evict(id, CloseReason::Terminator, mux, registry);
                return;
            }
            Inbound::Disconnected => {
                self.evict(id, CloseReason::PeerClosed, mux, registry);
                return;
            }
            Inbound::Failed(e) => {
                tracing::warn!(peer = %address, error = %e, "Receive error");
                self.evict(id, CloseReason::TransportError, mux, registry);
                return;
            }
        }

        let mut connection = handle.lock();
        if connection.needs_attention() {
            mux.carry(id);
        }
        if connection.wants_write() {
            if let Err(e) = connection.watch_writable(mux.registry(), true) {
                tracing::warn!(peer = %address, error = %e, "Failed to watch for writability");
            }
        }
    }

    /// One bounded read: drain the socket, then take at most one chunk.
    fn read_one(&self, connection: &mut ClientConnection) -> Inbound {
        if let Err(e) = connection.receive() {
            return Inbound::Failed(e);
        }
        if connection.is_in_flight() {
            return Inbound::Idle;
        }

        match connection.take_chunk(self.max_data_size) {
            Some(bytes) => match String::from_utf8(bytes) {
                Ok(payload) if payload == TERMINATOR => Inbound::Terminator,
                Ok(payload) => {
                    connection.begin_item();
                    Inbound::Payload(payload)
                }
                Err(e) => Inbound::Failed(e.into()),
            },
            None if connection.is_peer_closed() => Inbound::Disconnected,
            None => Inbound::Idle,
        }
    }

    fn enqueue(&mut self, item: WorkItem) {
        let address = item.address;
        match self.queue.push(item) {
            Ok(()) => {
                metrics::record_enqueued();
                tracing::trace!(peer = %address, backlog = self.queue.backlog(), "Payload enqueued");
            }
            Err(item) => {
                // Only possible once every worker has died.
                item.connection.lock().finish_item();
                tracing::error!(peer = %address, "No workers left; payload dropped");
            }
        }
    }

    fn flush(&mut self, id: ConnectionId, mux: &mut Multiplexer, registry: &mut ConnectionRegistry) {
        let Some(handle) = registry.get(id).cloned() else {
            return;
        };

        let result = {
            let mut connection = handle.lock();
            connection.flush().and_then(|flush| {
                connection
                    .watch_writable(mux.registry(), flush == Flush::Pending)
                    .map_err(TransportError::from)
            })
        };

        if let Err(e) = result {
            tracing::warn!(connection_id = %id, error = %e, "Send error");
            self.evict(id, CloseReason::TransportError, mux, registry);
        }
    }

    /// Deregister and close. Removal from the registry happens before the
    /// socket is touched.
    pub fn evict(
        &mut self,
        id: ConnectionId,
        reason: CloseReason,
        mux: &mut Multiplexer,
        registry: &mut ConnectionRegistry,
    ) {
        let Some((handle, address)) = registry.remove(id) else {
            return;
        };

        let mut connection = handle.lock();
        if let Err(e) = connection.deregister(mux.registry()) {
            tracing::debug!(peer = %address, error = %e, "Deregister failed");
        }
        connection.close();
        drop(connection);

        metrics::record_closed(reason.as_str());
        metrics::set_active_connections(registry.len());
        log_eviction(address, reason, registry.len());
    }

    /// Close every remaining connection, used when the loop fails.
    pub fn evict_all(&mut self, mux: &mut Multiplexer, registry: &mut ConnectionRegistry) {
        for id in registry.snapshot() {
            self.evict(id, CloseReason::TransportError, mux, registry);
        }
    }
}

fn log_eviction(address: SocketAddr, reason: CloseReason, remaining: usize) {
    match reason {
        CloseReason::PeerClosed | CloseReason::Terminator => tracing::info!(
            peer = %address,
            reason = reason.as_str(),
            remaining,
            "Client disconnected"
        ),
        CloseReason::TransportError | CloseReason::Faulted => tracing::warn!(
            peer = %address,
            reason = reason.as_str(),
            remaining,
            "Client connection dropped"
        ),
    }
}
