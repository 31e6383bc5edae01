//! Readiness multiplexer.
//!
//! Waits on the listening socket and every registered client together, so
//! a burst of new connections cannot starve existing clients or the other
//! way round. The wait is bounded only so the loop can look at the
//! registry again; it is not a cancellation mechanism.
//!
//! mio is edge-triggered, so readiness the dispatcher could not fully
//! consume in one cycle (a listener backlog, buffered plaintext, a pending
//! EOF) is carried into the next cycle and the next wait does not block.

use std::collections::BTreeSet;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Poll, Registry, Token, Waker};

use crate::net::{ConnectionId, LISTENER};
use crate::server::registry::ConnectionRegistry;

/// Poll token reserved for the cross-thread waker.
pub const WAKER: Token = Token(1);

/// One cycle's worth of work for the dispatcher.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// The listener may have a client to accept.
    pub listener: bool,
    /// Connections to read from, oldest first.
    pub readable: Vec<ConnectionId>,
    /// Connections with TLS output to push.
    pub writable: Vec<ConnectionId>,
    /// Connections to evict without reading.
    pub faulted: Vec<ConnectionId>,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        !self.listener
            && self.readable.is_empty()
            && self.writable.is_empty()
            && self.faulted.is_empty()
    }
}

/// Lets worker threads ask the multiplexing loop to revisit a connection.
#[derive(Clone)]
pub struct LoopNotifier {
    tx: flume::Sender<ConnectionId>,
    waker: Arc<Waker>,
}

impl LoopNotifier {
    pub fn notify(&self, id: ConnectionId) {
        if self.tx.send(id).is_err() {
            // Loop already gone; nothing left to revisit.
            return;
        }
        if let Err(e) = self.waker.wake() {
            tracing::warn!(connection_id = %id, error = %e, "Failed to wake poll loop");
        }
    }
}

pub struct Multiplexer {
    poll: Poll,
    events: Events,
    notifier: LoopNotifier,
    notices: flume::Receiver<ConnectionId>,
    listener_backlog: bool,
    carried: BTreeSet<ConnectionId>,
}

impl Multiplexer {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (tx, notices) = flume::unbounded();

        Ok(Self {
            poll,
            events: Events::with_capacity(event_capacity),
            notifier: LoopNotifier { tx, waker },
            notices,
            listener_backlog: false,
            carried: BTreeSet::new(),
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    pub fn notifier(&self) -> LoopNotifier {
        self.notifier.clone()
    }

    /// The listener accepted a client and may hold more.
    pub fn carry_listener(&mut self) {
        self.listener_backlog = true;
    }

    pub fn listener_pending(&self) -> bool {
        self.listener_backlog
    }

    /// Revisit `id` next cycle even if the OS reports nothing new.
    pub fn carry(&mut self, id: ConnectionId) {
        self.carried.insert(id);
    }

    /// Block until something is ready, a worker wakes us, or `timeout` elapses.
    ///
    /// Faulted connections are flagged in the registry and never reported
    /// readable in the same cycle.
    pub fn poll(
        &mut self,
        registry: &mut ConnectionRegistry,
        timeout: Duration,
    ) -> io::Result<Readiness> {
        let wait = if self.listener_backlog || !self.carried.is_empty() {
            Duration::ZERO
        } else {
            timeout
        };

        match self.poll.poll(&mut self.events, Some(wait)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => self.events.clear(),
            Err(e) => return Err(e),
        }

        let mut readiness = Readiness {
            listener: std::mem::take(&mut self.listener_backlog),
            ..Readiness::default()
        };
        let mut readable = std::mem::take(&mut self.carried);
        let mut writable = BTreeSet::new();

        for event in self.events.iter() {
            match event.token() {
                LISTENER => readiness.listener = true,
                WAKER => {}
                token => {
                    let Some(id) = ConnectionId::from_token(token) else {
                        continue;
                    };
                    // mio reports errors alongside readable/writable bits.
                    if event.is_error() {
                        registry.flag_faulted(id);
                        continue;
                    }
                    if event.is_readable() || event.is_read_closed() {
                        readable.insert(id);
                    }
                    if event.is_writable() {
                        writable.insert(id);
                    }
                }
            }
        }

        // A worker finished with these; check both directions.
        for id in self.notices.try_iter() {
            readable.insert(id);
            writable.insert(id);
        }

        for id in registry.snapshot() {
            if registry.is_faulted(id) {
                continue;
            }
            if readable.contains(&id) {
                readiness.readable.push(id);
            }
            if writable.contains(&id) {
                readiness.writable.push(id);
            }
        }
        readiness.faulted = registry.faulted();

        Ok(readiness)
    }
}
