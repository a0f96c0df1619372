use crate::{
    error::{Error, Result},
    worker::DEFAULT_FLUSH_DIVISOR,
};
use core::time::Duration;

/// Default interval between progress monitor ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of queued chunks per worker before submission waits.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Tuning knobs for an [`Aggregator`](crate::Aggregator) run.
///
/// Every field is independently tunable; [`Default`] sizes the pool to the
/// number of logical CPUs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Number of worker threads and the chunk target count.
    pub parallelism: usize,
    /// Each chunk flushes progress after `chunk_len / flush_divisor` bytes.
    ///
    /// Higher values make progress smoother at the cost of more contention
    /// on the shared counter.
    pub flush_divisor: u64,
    /// How often the progress monitor samples the counter.
    pub poll_interval: Duration,
    /// Capacity of each worker's request queue.
    pub queue_depth: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            parallelism: num_cpus::get(),
            flush_divisor: DEFAULT_FLUSH_DIVISOR,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl AggregatorConfig {
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub const fn with_flush_divisor(mut self, flush_divisor: u64) -> Self {
        self.flush_divisor = flush_divisor;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub const fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// Rejects values that would stall or divide by zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.parallelism == 0 {
            "parallelism must be greater than 0"
        } else if self.flush_divisor == 0 {
            "flush_divisor must be greater than 0"
        } else if self.poll_interval.is_zero() {
            "poll_interval must be non-zero"
        } else if self.queue_depth == 0 {
            "queue_depth must be greater than 0"
        } else {
            return Ok(());
        };

        Err(Error::InvalidConfig {
            reason: reason.to_string(),
        })
    }
}
