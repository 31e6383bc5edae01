//! Shared work queue between the dispatcher and the worker pool.
//!
//! Unbounded multi-producer/multi-consumer FIFO. There is no backpressure:
//! if workers fall behind, memory grows with the backlog.

use std::net::SocketAddr;
use std::time::Duration;

use flume::{RecvTimeoutError, Receiver, Sender};

use crate::net::ConnectionHandle;

/// One payload read from a client, waiting for a response.
///
/// Consumed exactly once by exactly one worker; never requeued.
#[derive(Debug)]
pub struct WorkItem {
    pub connection: ConnectionHandle,
    pub address: SocketAddr,
    pub payload: String,
}

/// Result of one bounded wait on the queue.
#[derive(Debug)]
pub enum Next {
    Item(WorkItem),
    /// Nothing arrived in time; poll again.
    Timeout,
    /// Every producer is gone and the backlog is drained.
    Closed,
}

/// Producer side, held by the dispatcher.
#[derive(Debug, Clone)]
pub struct WorkSender {
    tx: Sender<WorkItem>,
}

impl WorkSender {
    /// Never blocks. Hands the item back if no worker is left to take it.
    pub fn push(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.tx.send(item).map_err(|e| e.into_inner())
    }

    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

/// Consumer side, cloned into every worker.
#[derive(Debug, Clone)]
pub struct WorkReceiver {
    rx: Receiver<WorkItem>,
}

impl WorkReceiver {
    pub fn next(&self, timeout: Duration) -> Next {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Next::Item(item),
            Err(RecvTimeoutError::Timeout) => Next::Timeout,
            Err(RecvTimeoutError::Disconnected) => Next::Closed,
        }
    }
}

pub fn work_queue() -> (WorkSender, WorkReceiver) {
    let (tx, rx) = flume::unbounded();
    (WorkSender { tx }, WorkReceiver { rx })
}
