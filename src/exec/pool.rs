// src/exec/pool.rs

//! Fixed pool of W workers pulling from one FIFO queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::exec::contract::{Invocation, ScriptOutcome, ScriptReport};
use crate::exec::registry::RegisteredScript;

/// One task handed to the pool.
#[derive(Clone)]
pub struct WorkItem {
    pub script: Arc<RegisteredScript>,
    pub invocation: Invocation,
}

/// What a worker sends back. A dropped sender means the task was lost.
#[derive(Debug, Clone)]
pub struct Completion {
    pub task_id: Uuid,
    pub worker: usize,
    pub outcome: ScriptOutcome,
    pub report: Option<ScriptReport>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub completed: usize,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

struct Queued {
    item: WorkItem,
    reply: oneshot::Sender<Completion>,
}

type SharedRx = Arc<AsyncMutex<mpsc::UnboundedReceiver<Queued>>>;

pub struct WorkerPool {
    tx: Mutex<Option<mpsc::UnboundedSender<Queued>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    capacity: usize,
    max_queue_depth: usize,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Spawn `capacity` workers. `max_queue_depth == 0` means unbounded.
    pub fn start(capacity: usize, max_queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx: SharedRx = Arc::new(AsyncMutex::new(rx));
        let counters = Arc::new(Counters::default());

        let workers = (0..capacity)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&rx), Arc::clone(&counters))))
            .collect();

        info!(capacity, max_queue_depth, "worker pool started");

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
            capacity,
            max_queue_depth,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a batch atomically: either every item is admitted or none is.
    ///
    /// With a depth cap, a batch is admitted when the queue is empty or the
    /// whole batch fits; otherwise `QueueFull` is returned.
    pub fn submit_batch(&self, items: Vec<WorkItem>) -> Result<Vec<oneshot::Receiver<Completion>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown);
        }
        let n = items.len();
        let max = self.max_queue_depth;
        self.counters
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| {
                (max == 0 || q == 0 || q + n <= max).then_some(q + n)
            })
            .map_err(EngineError::QueueFull)?;

        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            self.counters.queued.fetch_sub(n, Ordering::SeqCst);
            return Err(EngineError::Shutdown);
        };

        let mut receivers = Vec::with_capacity(n);
        for item in items {
            let (reply, rx) = oneshot::channel();
            if tx.send(Queued { item, reply }).is_err() {
                self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::Shutdown);
            }
            receivers.push(rx);
        }
        Ok(receivers)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            queued: self.counters.queued.load(Ordering::SeqCst),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work. Workers finish what is already queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tx.lock().take();
    }

    /// Stop workers immediately. Tasks they were running are lost.
    pub fn abort(&self) {
        self.close();
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
    }

    /// Wait for all workers to exit after [`close`](Self::close).
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Aborts the handler task if the worker itself is aborted.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn worker_loop(id: usize, rx: SharedRx, counters: Arc<Counters>) {
    debug!(worker = id, "worker started");
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(Queued { item, reply }) = next else {
            break;
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let task_id = item.invocation.task_id;
        let script = Arc::clone(&item.script);
        let invocation = item.invocation;
        let started = Instant::now();

        // A panicking handler must not take the worker down with it.
        let mut handler =
            AbortOnDrop(tokio::spawn(async move { script.handler.run(&invocation).await }));
        let joined = (&mut handler.0).await;

        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        counters.completed.fetch_add(1, Ordering::SeqCst);
        let duration = started.elapsed();

        match joined {
            Ok(result) => {
                let (outcome, report) = match result {
                    Ok(report) => (item.script.contract.classify(&report), Some(report)),
                    Err(err) => {
                        debug!(worker = id, task = %task_id, error = %err, "script handler error");
                        (ScriptOutcome::Indeterminate(format!("{err:#}")), None)
                    }
                };
                let _ = reply.send(Completion {
                    task_id,
                    worker: id,
                    outcome,
                    report,
                    duration,
                });
            }
            Err(join_err) => {
                error!(worker = id, task = %task_id, error = %join_err, "worker lost task");
                drop(reply);
            }
        }
    }
    debug!(worker = id, "worker stopped");
}
