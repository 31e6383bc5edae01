//! Session end detection.
//!
//! The server runs one session: it keeps going while any client is
//! connected and stops once the last one has left. A server nobody has
//! connected to yet keeps waiting.

/// Whether the multiplexing loop should keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Running,
    Finished,
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    started: bool,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client was accepted.
    pub fn client_joined(&mut self) {
        self.started = true;
    }

    /// Decide after a dispatch cycle. `pending_accept` covers clients the
    /// listener may still be holding in its backlog.
    pub fn observe(&self, live_connections: usize, pending_accept: bool) -> Session {
        if self.started && live_connections == 0 && !pending_accept {
            Session::Finished
        } else {
            Session::Running
        }
    }
}
