//! Connection registry.
//!
//! # Responsibilities
//! - Own every live client connection from accept until removal
//! - Keep the connection map and the address map in lockstep
//! - Hold the set of connections the poller flagged as faulted
//!
//! # Design Decisions
//! - Only the multiplexing loop holds `&mut ConnectionRegistry`, so the
//!   registry needs no lock; workers only ever see a `ConnectionHandle`
//! - Keyed by `ConnectionId`, which grows with accept order, so snapshots
//!   come out oldest-first

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::net::{ClientConnection, ConnectionHandle, ConnectionId, ConnectionState};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, ConnectionHandle>,
    addresses: HashMap<ConnectionId, SocketAddr>,
    faulted: BTreeSet<ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a freshly accepted connection.
    pub fn add(&mut self, connection: ClientConnection) -> ConnectionHandle {
        let id = connection.id();
        let addr = connection.peer_addr();
        let handle = Arc::new(Mutex::new(connection));

        self.connections.insert(id, Arc::clone(&handle));
        self.addresses.insert(id, addr);
        handle
    }

    /// Drop a connection from both maps and the faulted set at once.
    ///
    /// The caller closes the returned handle; nothing is closed here.
    pub fn remove(&mut self, id: ConnectionId) -> Option<(ConnectionHandle, SocketAddr)> {
        let handle = self.connections.remove(&id)?;
        let addr = self.addresses.remove(&id)?;
        self.faulted.remove(&id);
        Some((handle, addr))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(&id)
    }

    /// Live connection IDs, oldest first.
    pub fn snapshot(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn flag_faulted(&mut self, id: ConnectionId) {
        if let Some(handle) = self.connections.get(&id) {
            handle.lock().set_state(ConnectionState::Faulted);
            self.faulted.insert(id);
        }
    }

    pub fn faulted(&self) -> Vec<ConnectionId> {
        self.faulted.iter().copied().collect()
    }

    pub fn is_faulted(&self, id: ConnectionId) -> bool {
        self.faulted.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
