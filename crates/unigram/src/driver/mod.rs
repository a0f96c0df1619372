//! Orchestration of a full aggregation run.
//!
//! An [`Aggregator`] runs the pipeline in three timed stages:
//!
//! 1. **Chunking** - size the file and compute line-aligned chunks.
//! 2. **Processing** - start the progress monitor, fan chunks out to a
//!    [`WorkerPool`] sized to the configured parallelism, and await every
//!    local table.
//! 3. **Reduction** - fold the local tables into the global table.
//!
//! The first failing chunk aborts the run: the run's cancellation token is
//! cancelled so other workers stop at their next progress flush, remaining
//! replies are drained (additional failures are logged, never dropped
//! silently), the monitor is cancelled and the error is returned. No partial
//! table escapes an aborted run.

mod config;
mod result;
#[cfg(test)]
mod tests;

pub use config::{AggregatorConfig, DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_DEPTH};
pub use result::{RunResult, StageTimings};

use crate::{
    chunk::{Chunk, compute_file_chunks},
    error::{Error, Result},
    pool::{ChunkJob, WorkerPool},
    progress::{ProgressCounter, ProgressMonitor, ProgressSink},
    table::{WordCountTable, reduce},
    worker::ScanOptions,
};
use futures::{StreamExt, stream::FuturesUnordered};
use std::{path::Path, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Entry point for aggregating a corpus file.
#[derive(Clone, Debug)]
pub struct Aggregator {
    config: AggregatorConfig,
    shutdown_token: CancellationToken,
}

impl Aggregator {
    /// Creates an aggregator after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` is unusable.
    pub fn new(config: AggregatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Token that aborts any in-flight run when cancelled.
    ///
    /// Runs observe it through a child token, so cancelling it stops workers
    /// at their next progress flush and makes the run return
    /// [`Error::Cancelled`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Aggregates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of the run; see [`Error`].
    pub async fn run(&self, path: impl AsRef<Path>) -> Result<RunResult> {
        self.execute(path.as_ref(), None).await
    }

    /// Like [`run`](Self::run), additionally publishing progress snapshots to
    /// `sink` at every monitor tick.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of the run; see [`Error`].
    pub async fn run_with_progress(
        &self,
        path: impl AsRef<Path>,
        sink: ProgressSink,
    ) -> Result<RunResult> {
        self.execute(path.as_ref(), Some(sink)).await
    }

    #[instrument(
        name = "aggregate",
        skip_all,
        fields(path = %path.display(), parallelism = self.config.parallelism)
    )]
    async fn execute(&self, path: &Path, sink: Option<ProgressSink>) -> Result<RunResult> {
        let run_start = Instant::now();

        // === Stage 1: chunking ===
        let stage_start = Instant::now();
        let (file_size, chunks) = self.chunk_file(path).await?;
        let chunking = stage_start.elapsed();
        tracing::info!(
            file_size,
            chunks = chunks.len(),
            "Get file chunks took {:.2?}",
            chunking
        );

        // === Stage 2: processing ===
        let stage_start = Instant::now();
        let workers = self.config.parallelism.min(chunks.len()).max(1);
        let pool = WorkerPool::new(workers, self.config.queue_depth)?;
        let progress = Arc::new(ProgressCounter::new());
        let options = ScanOptions {
            flush_divisor: self.config.flush_divisor,
            cancel: self.shutdown_token.child_token(),
        };

        let monitor = ProgressMonitor::spawn(
            Arc::clone(&progress),
            file_size,
            self.config.poll_interval,
            sink,
        );

        let outcome = dispatch(&pool, Arc::from(path), &chunks, &progress, &options).await;

        let exit = monitor.cancel().await;
        tracing::trace!("Progress monitor stopped: {exit:?}");
        pool.shutdown().await;

        let tables = outcome?;
        let processing = stage_start.elapsed();
        let bytes_processed = progress.get();
        tracing::info!(bytes_processed, "Processing data took {:.2?}", processing);
        if bytes_processed != file_size {
            tracing::warn!(
                "Progress counter ended at {bytes_processed} bytes for a {file_size} byte file"
            );
        }

        // === Stage 3: reduction ===
        let stage_start = Instant::now();
        let table = reduce(tables);
        let reduction = stage_start.elapsed();
        tracing::info!(words = table.len(), "Reducing results took {:.2?}", reduction);

        Ok(RunResult {
            table,
            timings: StageTimings {
                chunking,
                processing,
                reduction,
                total: run_start.elapsed(),
            },
            file_size,
            chunk_count: chunks.len(),
            workers,
            bytes_processed,
        })
    }

    /// Runs the blocking boundary probes off the async runtime.
    async fn chunk_file(&self, path: &Path) -> Result<(u64, Vec<Chunk>)> {
        let owned = path.to_path_buf();
        let target = self.config.parallelism;
        match tokio::task::spawn_blocking(move || compute_file_chunks(&owned, target)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::Cancelled),
        }
    }
}

/// Submits every chunk and collects the local tables.
///
/// Submission and collection are interleaved, so a failure reported while a
/// worker queue is full stops further submissions right away. Returns the
/// first failure after every submitted chunk has replied.
async fn dispatch(
    pool: &WorkerPool,
    path: Arc<Path>,
    chunks: &[Chunk],
    progress: &Arc<ProgressCounter>,
    options: &ScanOptions,
) -> Result<Vec<WordCountTable>> {
    let mut pending = FuturesUnordered::new();
    let mut tables = Vec::with_capacity(chunks.len());
    let mut first_error: Option<Error> = None;
    let mut queued = chunks.iter().copied().peekable();

    while first_error.is_none() {
        let Some(&chunk) = queued.peek() else {
            break;
        };
        let job = ChunkJob {
            path: Arc::clone(&path),
            chunk,
            progress: Arc::clone(progress),
            options: options.clone(),
        };

        // A cancelled `submit` never enqueues its job, so the chunk stays at
        // the front of `queued` and is retried on the next pass.
        tokio::select! {
            biased;
            Some((done, result)) = pending.next(), if !pending.is_empty() => {
                collect(done, result, &mut tables, &mut first_error, options);
            }
            submitted = pool.submit(job) => {
                queued.next();
                match submitted {
                    Ok(ticket) => pending.push(ticket.wait()),
                    Err(e) => {
                        tracing::error!("Failed to submit chunk {chunk}: {e}");
                        options.cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }
    }

    while let Some((done, result)) = pending.next().await {
        collect(done, result, &mut tables, &mut first_error, options);
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(tables),
    }
}

/// Records one chunk reply, aborting the run on its first failure.
fn collect(
    chunk: Chunk,
    result: Result<WordCountTable>,
    tables: &mut Vec<WordCountTable>,
    first_error: &mut Option<Error>,
    options: &ScanOptions,
) {
    match result {
        Ok(table) => {
            // Results computed after an abort are discarded.
            if first_error.is_none() {
                tables.push(table);
            }
        }
        Err(e) if first_error.is_none() => {
            tracing::error!("Chunk {chunk} failed, aborting run: {e}");
            options.cancel.cancel();
            *first_error = Some(e);
        }
        Err(e) if e.is_cancelled() => {
            tracing::trace!("Chunk {chunk} stopped after abort");
        }
        Err(e) => {
            tracing::warn!("Chunk {chunk} also failed: {e}");
        }
    }
}
