use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use super::queue::{future_label, record_failure, record_panic, CompileOutcome};
use crate::{config::CompilationThreadConfig, error::AssetError, marker::ArtifactFuture};

type Operation = Box<dyn FnMut(&ArtifactFuture) -> CompileOutcome + Send + 'static>;

struct QueuedOperation {
    future: Weak<ArtifactFuture>,
    op: Operation,
}

#[derive(Default)]
struct Queues {
    fresh: VecDeque<QueuedOperation>,
    delayed: VecDeque<QueuedOperation>,
    /// Auto-reset: cleared by the worker each time it goes back to sleep.
    new_work: bool,
    shutdown: bool,
}

struct Shared {
    queues: Mutex<Queues>,
    wake: Condvar,
    executed: AtomicUsize,
    retries: AtomicUsize,
    retry_delay: Duration,
}

/// Statistics about the compilation thread's current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationThreadStats {
    pub fresh_queue_len: usize,
    pub delayed_queue_len: usize,
    /// Closures started so far, retries included.
    pub executed: usize,
    /// Times a closure reported pending and was moved to the delayed queue.
    pub retries: usize,
}

/// Dedicated worker that runs compile closures and retries the ones that report pending.
///
/// Two FIFO queues feed the worker:
/// - **fresh**: everything passed to [`push`](Self::push)
/// - **delayed**: closures that returned [`CompileOutcome::Pending`], requeued unchanged
///
/// The delayed queue is only serviced when the fresh queue is empty, and each delayed item
/// waits `delayed_retry_delay` first so a slow dependency does not turn into a busy spin.
/// When both queues are empty the worker sleeps until new work or shutdown.
///
/// Shutdown lets the item currently executing finish, then abandons everything still
/// queued. Futures of abandoned items stay `Pending`.
pub struct CompilationThread {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CompilationThread {
    pub fn new() -> Result<CompilationThread, AssetError> {
        Self::with_config(&CompilationThreadConfig::default())
    }

    pub fn with_config(
        config: &CompilationThreadConfig,
    ) -> Result<CompilationThread, AssetError> {
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues::default()),
            wake: Condvar::new(),
            executed: AtomicUsize::new(0),
            retries: AtomicUsize::new(0),
            retry_delay: config.delayed_retry_delay(),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("compilation-thread".to_string())
            .spawn(move || Self::worker_loop(worker_shared))
            .map_err(|e| {
                AssetError::ThreadPool(format!("failed to spawn compilation thread: {e}"))
            })?;
        tracing::info!("[CompilationThread] Started");

        Ok(CompilationThread {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue `op` to run against `future`. Only a weak reference to the future is kept.
    pub fn push<F>(&self, future: &Arc<ArtifactFuture>, op: F)
    where
        F: FnMut(&ArtifactFuture) -> CompileOutcome + Send + 'static,
    {
        let mut queues = self.shared.queues.lock();
        if queues.shutdown {
            tracing::warn!(
                "[CompilationThread] Dropping operation for {:?} pushed after shutdown",
                future_label(future)
            );
            return;
        }
        queues.fresh.push_back(QueuedOperation {
            future: Arc::downgrade(future),
            op: Box::new(op),
        });
        queues.new_work = true;
        self.shared.wake.notify_one();
    }

    /// Request shutdown and wait for the worker to exit. Queued operations never run.
    pub fn stall_on_pending_operations(&self) {
        {
            let mut queues = self.shared.queues.lock();
            if !queues.shutdown {
                queues.shutdown = true;
                let abandoned = queues.fresh.len() + queues.delayed.len();
                if abandoned > 0 {
                    tracing::info!(
                        "[CompilationThread] Shutting down with {} queued operations abandoned",
                        abandoned
                    );
                }
            }
            self.shared.wake.notify_all();
        }

        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            tracing::warn!("[CompilationThread] Shutdown requested from the worker itself");
            return;
        }
        if handle.join().is_err() {
            tracing::error!("[CompilationThread] Worker panicked");
        }
    }

    pub fn stats(&self) -> CompilationThreadStats {
        let queues = self.shared.queues.lock();
        CompilationThreadStats {
            fresh_queue_len: queues.fresh.len(),
            delayed_queue_len: queues.delayed.len(),
            executed: self.shared.executed.load(Ordering::Acquire),
            retries: self.shared.retries.load(Ordering::Acquire),
        }
    }

    fn worker_loop(shared: Arc<Shared>) {
        while let Some((mut item, delayed)) = Self::next_item(&shared) {
            if delayed {
                thread::sleep(shared.retry_delay);
                if shared.queues.lock().shutdown {
                    break;
                }
            }

            let Some(future) = item.future.upgrade() else {
                tracing::debug!("[CompilationThread] Skipping operation for a dropped future");
                continue;
            };

            shared.executed.fetch_add(1, Ordering::AcqRel);
            let outcome = catch_unwind(AssertUnwindSafe(|| (item.op)(&future)));
            match outcome {
                Ok(CompileOutcome::Completed) => {}
                Ok(CompileOutcome::Pending(pending)) => {
                    tracing::trace!(
                        "[CompilationThread] {:?} waiting on {:?}, delaying",
                        future_label(&future),
                        pending.initializer()
                    );
                    shared.retries.fetch_add(1, Ordering::AcqRel);
                    drop(future);
                    shared.queues.lock().delayed.push_back(item);
                }
                Ok(CompileOutcome::Failed(err)) => record_failure(&future, &err),
                Err(payload) => record_panic(&future, payload),
            }
        }
        tracing::info!("[CompilationThread] Stopped");
    }

    /// Block until there is an item to run. `None` once shutdown is requested. The flag is
    /// reported alongside the item when it came from the delayed queue.
    fn next_item(shared: &Shared) -> Option<(QueuedOperation, bool)> {
        let mut queues = shared.queues.lock();
        loop {
            if queues.shutdown {
                return None;
            }
            if let Some(item) = queues.fresh.pop_front() {
                return Some((item, false));
            }
            if let Some(item) = queues.delayed.pop_front() {
                return Some((item, true));
            }
            queues.new_work = false;
            while !queues.new_work && !queues.shutdown {
                shared.wake.wait(&mut queues);
            }
        }
    }
}

impl Drop for CompilationThread {
    fn drop(&mut self) {
        self.stall_on_pending_operations();
    }
}
