use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    thread::{self, JoinHandle},
};

use crate::error::AssetError;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere to run a no-argument closure eventually, on some worker.
pub trait TaskPool: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<(), AssetError>;

    fn worker_count(&self) -> usize;
}

/// Fixed-size pool of named worker threads, all consuming from one multi-consumer channel.
///
/// A panicking job is caught and logged; the worker keeps running. [`shutdown`] stops
/// accepting work, lets the workers finish everything already queued, then joins them.
///
/// [`shutdown`]: ThreadPool::shutdown
pub struct ThreadPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl ThreadPool {
    pub fn new(name: &str, threads: usize) -> Result<ThreadPool, AssetError> {
        if threads == 0 {
            return Err(AssetError::ThreadPool(format!(
                "pool '{name}' needs at least one thread"
            )));
        }
        let (sender, receiver) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let worker_name = format!("{name}-{i}");
            let handle = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || Self::worker_loop(&worker_name, receiver))
                .map_err(|e| {
                    AssetError::ThreadPool(format!("failed to spawn worker for '{name}': {e}"))
                })?;
            workers.push(handle);
        }
        tracing::info!("[ThreadPool] Started '{}' with {} threads", name, threads);

        Ok(ThreadPool {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            worker_count: threads,
        })
    }

    fn worker_loop(worker_name: &str, receiver: Receiver<Job>) {
        // Ends once every sender is gone and the channel is drained
        for job in receiver.iter() {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("[ThreadPool] Job panicked on worker {}", worker_name);
            }
        }
        tracing::debug!("[ThreadPool] Worker {} exiting", worker_name);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain queued jobs and join every worker. Later `enqueue` calls fail.
    pub fn shutdown(&self) {
        // Dropping the sender ends each worker loop once the channel is empty
        self.sender.lock().take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                tracing::warn!("[ThreadPool] '{}' shut down from its own worker", self.name);
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("[ThreadPool] A worker of '{}' panicked", self.name);
            }
        }
    }
}

impl TaskPool for ThreadPool {
    fn enqueue(&self, job: Job) -> Result<(), AssetError> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).map_err(|_| {
                AssetError::ThreadPool(format!("pool '{}' has no running workers", self.name))
            }),
            None => Err(AssetError::ThreadPool(format!(
                "pool '{}' is shut down",
                self.name
            ))),
        }
    }

    fn worker_count(&self) -> usize {
        self.worker_count
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
