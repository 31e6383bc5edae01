//! Worker pool.
//!
//! # Responsibilities
//! - Run a fixed number of OS threads draining the shared queue
//! - Build the echo response and write it back to the originating client
//! - Record each delivered exchange in the exchange log
//!
//! # Design Decisions
//! - Queue waits are bounded only so the loop can spin around; an empty
//!   queue never stops a worker
//! - Delivery is at-most-once: a failed write is logged and the item is
//!   dropped, never retried or requeued
//! - Workers never see the registry, only the connection handle in the item

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::observability::metrics;
use crate::server::exchange::ExchangeLog;
use crate::server::poller::LoopNotifier;
use crate::server::queue::{Next, WorkItem, WorkReceiver};

/// The reply sent for every payload.
pub fn respond(payload: &str) -> String {
    format!("Hello, client! I received your message: {payload}.")
}

/// Everything a worker thread needs, cloned per thread.
#[derive(Clone)]
struct WorkerContext {
    queue: WorkReceiver,
    log: Arc<ExchangeLog>,
    notifier: LoopNotifier,
    timeout: Duration,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Launch exactly `count` named worker threads.
    pub fn spawn(
        count: usize,
        queue: WorkReceiver,
        log: Arc<ExchangeLog>,
        notifier: LoopNotifier,
        timeout: Duration,
    ) -> io::Result<Self> {
        tracing::info!(
            workers = count,
            available_cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            "Starting worker pool"
        );

        let context = WorkerContext {
            queue,
            log,
            notifier,
            timeout,
        };

        let handles = (0..count)
            .map(|index| {
                let context = context.clone();
                thread::Builder::new()
                    .name(format!("worker-{index}"))
                    .spawn(move || run(index, context))
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self { handles })
    }

    /// Wait for every worker. Returns once the queue is closed and drained.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

fn run(index: usize, context: WorkerContext) {
    tracing::debug!(worker = index, "Worker started");

    loop {
        match context.queue.next(context.timeout) {
            Next::Item(item) => process(index, item, &context),
            Next::Timeout => {
                tracing::trace!(worker = index, "Queue idle, polling again");
            }
            Next::Closed => break,
        }
    }

    tracing::debug!(worker = index, "Worker finished");
}

fn process(index: usize, item: WorkItem, context: &WorkerContext) {
    let WorkItem {
        connection,
        address,
        payload,
    } = item;
    let response = respond(&payload);

    let (id, result, revisit) = {
        let mut connection = connection.lock();
        let result = connection.send(response.as_bytes());
        connection.finish_item();
        let revisit = !connection.is_closed() && (connection.needs_attention() || connection.wants_write());
        (connection.id(), result, revisit)
    };

    match result {
        Ok(_) => {
            let sequence = context.log.record(address, payload, response);
            metrics::record_response(true);
            tracing::debug!(worker = index, peer = %address, sequence, "Response sent");
        }
        Err(e) => {
            metrics::record_response(false);
            tracing::warn!(worker = index, peer = %address, error = %e, "Failed sending response");
        }
    }

    if revisit {
        context.notifier.notify(id);
    }
}
