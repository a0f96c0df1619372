//! Bounded pool of OS threads that scan chunks.
//!
//! This module defines the [`WorkerPool`], which owns one dedicated thread per
//! worker so that line parsing runs with real CPU parallelism while the driver
//! stays on its async runtime. Chunks are distributed round-robin over
//! per-worker bounded [`mpsc`] channels; if chunks outnumber workers they
//! simply queue. Each chunk's result comes back on its own [`oneshot`]
//! channel, which the driver can await without blocking.
//!
//! Workers receive a [`WorkRequest::Shutdown`] during [`WorkerPool::shutdown`]
//! and acknowledge it before exiting. Dropping the pool closes every channel,
//! which also stops the threads once their queues drain.

use crate::{
    chunk::Chunk,
    error::{Error, Result},
    progress::ProgressCounter,
    table::WordCountTable,
    worker::{ScanOptions, process_chunk},
};
use core::time::Duration;
use portable_atomic::{AtomicUsize, Ordering};
use std::{path::Path, sync::Arc, thread};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};

/// Upper bound on how long a worker may take to acknowledge shutdown.
const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything a worker needs to scan one chunk.
#[derive(Clone, Debug)]
pub struct ChunkJob {
    pub path: Arc<Path>,
    pub chunk: Chunk,
    pub progress: Arc<ProgressCounter>,
    pub options: ScanOptions,
}

/// Messages understood by a worker thread.
#[derive(Debug)]
pub enum WorkRequest {
    Chunk {
        job: ChunkJob,
        response: oneshot::Sender<Result<WordCountTable>>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

/// A submitted chunk whose local table has not been collected yet.
#[derive(Debug)]
pub struct ChunkTicket {
    worker: usize,
    chunk: Chunk,
    reply: oneshot::Receiver<Result<WordCountTable>>,
}

impl ChunkTicket {
    /// Waits for the worker's reply.
    ///
    /// A worker that exits without replying (for example because it
    /// panicked) is reported as [`Error::WorkerLost`].
    pub async fn wait(self) -> (Chunk, Result<WordCountTable>) {
        let result = match self.reply.await {
            Ok(result) => result,
            Err(_) => Err(Error::WorkerLost {
                worker: self.worker,
            }),
        };
        (self.chunk, result)
    }
}

/// A fixed-size pool of chunk-scanning threads.
pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    threads: Vec<thread::JoinHandle<()>>,
    next_worker: AtomicUsize,
}

impl WorkerPool {
    /// Spawns `num_workers` threads, each with a queue of `queue_depth`
    /// pending requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero-sized pool or queue, or
    /// [`Error::Spawn`] if a thread cannot be started.
    pub fn new(num_workers: usize, queue_depth: usize) -> Result<Self> {
        if num_workers == 0 || queue_depth == 0 {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "worker pool needs at least one worker and queue slot \
                     (workers = {num_workers}, queue_depth = {queue_depth})"
                ),
            });
        }

        let mut workers = Vec::with_capacity(num_workers);
        let mut threads = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel::<WorkRequest>(queue_depth);
            let handle = thread::Builder::new()
                .name(format!("unigram-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, rx))
                .map_err(|source| Error::Spawn {
                    worker: worker_id,
                    source,
                })?;
            workers.push(tx);
            threads.push(handle);
        }

        tracing::debug!("Started worker pool with {num_workers} threads");

        Ok(Self {
            workers,
            threads,
            next_worker: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns the index of the next worker to receive work (round-robin).
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Queues `job` on the next worker and returns a ticket for its result.
    ///
    /// Waits if that worker's queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerLost`] if the worker's thread has exited.
    pub async fn submit(&self, job: ChunkJob) -> Result<ChunkTicket> {
        let worker_idx = self.next_worker_index();
        let chunk = job.chunk;
        let (response, reply) = oneshot::channel();

        self.workers[worker_idx]
            .send(WorkRequest::Chunk { job, response })
            .await
            .map_err(|_| Error::WorkerLost { worker: worker_idx })?;

        tracing::trace!("Queued chunk {chunk} on worker {worker_idx}");
        Ok(ChunkTicket {
            worker: worker_idx,
            chunk,
            reply,
        })
    }

    /// Stops every worker and joins the threads that acknowledged.
    ///
    /// Workers still busy with a chunk finish it first; a worker that does
    /// not acknowledge within a few seconds is left detached and logged.
    pub async fn shutdown(self) {
        let waits = self.workers.iter().enumerate().map(|(i, worker)| async move {
            let (tx, rx) = oneshot::channel();
            if worker.send(WorkRequest::Shutdown { response: tx }).await.is_err() {
                tracing::debug!("Worker {i} already stopped");
                return true;
            }
            match timeout(SHUTDOWN_ACK_TIMEOUT, rx).await {
                Ok(Ok(())) => {
                    tracing::trace!("Worker {i} shutdown acknowledged");
                    true
                }
                Ok(Err(_)) => {
                    tracing::warn!("Worker {i} exited without acknowledging shutdown");
                    true
                }
                Err(_) => {
                    tracing::warn!("Worker {i} shutdown timed out");
                    false
                }
            }
        });
        let acknowledged = futures::future::join_all(waits).await;

        // Only join threads known to be exiting so a stuck worker cannot
        // hang shutdown.
        let threads: Vec<_> = self
            .threads
            .into_iter()
            .zip(acknowledged)
            .filter_map(|(handle, acked)| acked.then_some(handle))
            .collect();

        let joined = tokio::task::spawn_blocking(move || {
            for handle in threads {
                if handle.join().is_err() {
                    tracing::warn!("Worker thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            tracing::warn!("Failed to join worker threads: {e}");
        }

        tracing::debug!("Worker pool shutdown complete");
    }
}

fn worker_loop(worker_id: usize, mut rx: mpsc::Receiver<WorkRequest>) {
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.blocking_recv() {
        match work {
            WorkRequest::Chunk { job, response } => {
                let result = process_chunk(&job.path, job.chunk, &job.progress, &job.options);
                if let Err(e) = &result {
                    if !e.is_cancelled() {
                        tracing::debug!("Worker {worker_id} failed on chunk {}: {e}", job.chunk);
                    }
                }
                if response.send(result).is_err() {
                    tracing::trace!("Worker {worker_id} result for {} was not awaited", job.chunk);
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");
                if response.send(()).is_err() {
                    tracing::warn!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
