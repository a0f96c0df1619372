//! Shared byte-progress accounting and the asynchronous progress monitor.
//!
//! Workers add the bytes they have consumed to a single [`ProgressCounter`].
//! A [`ProgressMonitor`] task polls the counter on a fixed interval and emits
//! [`ProgressSnapshot`]s until every byte is accounted for or it is cancelled.
//!
//! The monitor only ever loads the counter, so it never contends with the
//! workers for anything beyond the atomic itself. A stale read merely delays a
//! report.

use core::time::Duration;
use crossbeam_utils::CachePadded;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Cumulative bytes processed across every worker of a run.
///
/// Starts at zero, only ever grows, and equals the file size once a run
/// completes successfully.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    bytes: CachePadded<AtomicU64>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically adds `bytes` to the counter.
    pub fn add(&self, bytes: u64) {
        if bytes > 0 {
            self.bytes.fetch_add(bytes, Ordering::AcqRel);
        }
    }

    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }
}

/// A single `(done, total)` observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressSnapshot {
    pub done: u64,
    pub total: u64,
}

impl ProgressSnapshot {
    pub const fn new(done: u64, total: u64) -> Self {
        Self { done, total }
    }

    pub const fn is_complete(&self) -> bool {
        self.done >= self.total
    }

    /// Completed fraction in `[0.0, 1.0]`; an empty run counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.done as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Producer half handed to the monitor.
pub type ProgressSink = mpsc::Sender<ProgressSnapshot>;

/// Consumer half, usable with `futures::StreamExt` / `tokio_stream::StreamExt`.
pub type ProgressStream = ReceiverStream<ProgressSnapshot>;

/// Creates a bounded snapshot channel.
///
/// The monitor never waits on a full channel; snapshots that do not fit are
/// skipped.
pub fn progress_channel(capacity: usize) -> (ProgressSink, ProgressStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ReceiverStream::new(rx))
}

/// How the monitor task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorExit {
    /// The counter reached the total on its own.
    Completed { ticks: u64 },
    /// The driver cancelled the monitor first.
    Cancelled { ticks: u64 },
    /// The task panicked or was aborted; reporting stopped, the run did not.
    Failed,
}

/// Handle to a running progress monitor task.
pub struct ProgressMonitor {
    handle: JoinHandle<MonitorExit>,
    cancel: CancellationToken,
}

impl ProgressMonitor {
    /// Spawns the monitor on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(
        counter: Arc<ProgressCounter>,
        total: u64,
        poll_interval: Duration,
        sink: Option<ProgressSink>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(
            counter,
            total,
            poll_interval,
            sink,
            cancel.clone(),
        ));
        Self { handle, cancel }
    }

    /// Cancels the monitor and waits for it to stop.
    ///
    /// Safe to call at any time, including after the monitor already
    /// finished on its own.
    pub async fn cancel(self) -> MonitorExit {
        self.cancel.cancel();
        match self.handle.await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::warn!("Progress monitor task failed: {e}");
                MonitorExit::Failed
            }
        }
    }
}

async fn monitor_loop(
    counter: Arc<ProgressCounter>,
    total: u64,
    poll_interval: Duration,
    mut sink: Option<ProgressSink>,
    cancel: CancellationToken,
) -> MonitorExit {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    let mut ticks = 0;

    loop {
        ticks += 1;
        let snapshot = ProgressSnapshot::new(counter.get(), total);
        tracing::info!(
            done = snapshot.done,
            total = snapshot.total,
            "Progress: {}/{}",
            snapshot.done,
            snapshot.total
        );

        let closed = sink
            .as_ref()
            .is_some_and(|tx| matches!(tx.try_send(snapshot), Err(TrySendError::Closed(_))));
        if closed {
            tracing::debug!("Progress consumer went away; continuing without it");
            sink = None;
        }

        if snapshot.is_complete() {
            return MonitorExit::Completed { ticks };
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Progress monitor cancelled after {ticks} ticks");
                return MonitorExit::Cancelled { ticks };
            }
            _ = ticker.tick() => {}
        }
    }
}
