//! # `unigram`: Parallel Corpus Aggregation
//!
//! `unigram` turns a very large, line-oriented corpus of tab-separated
//! `word \t <ignored> \t match_count [\t ...]` records (for example a Google
//! Books 1-gram export) into a single word → total-count table, using every
//! available core.
//!
//! ## Pipeline
//!
//! 1. The file is split into contiguous, line-aligned byte ranges
//!    ([`compute_chunks`]).
//! 2. Each range is scanned on a dedicated OS thread of a [`WorkerPool`]
//!    ([`process_chunk`]), producing a local [`WordCountTable`] and batching
//!    byte progress into a shared [`ProgressCounter`].
//! 3. A [`ProgressMonitor`] task polls the counter and publishes
//!    [`ProgressSnapshot`]s while the driver awaits the workers.
//! 4. Local tables are folded into the global table ([`reduce`]).
//!
//! [`Aggregator`] ties the stages together and reports per-stage timings in
//! its [`RunResult`].
//!
//! ## Example
//!
//! ```no_run
//! use unigram::{Aggregator, AggregatorConfig};
//!
//! # async fn example() -> unigram::Result<()> {
//! let aggregator = Aggregator::new(AggregatorConfig::default())?;
//! let result = aggregator.run("googlebooks-eng-all-1gram-20120701-a").await?;
//! println!("{} distinct words", result.table.len());
//! println!("'ära' appears {:?} times", result.count("ära"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure model
//!
//! A run is all-or-nothing. An unreadable file, a boundary probe failure or a
//! single malformed line aborts the run and returns the first [`Error`]; no
//! partial table is returned.
//!
//! The [`dining`] module is a small standalone example of deadlock-free
//! resource acquisition with a global lock order.

mod chunk;
pub mod dining;
mod driver;
mod error;
mod pool;
mod progress;
mod table;
mod worker;

pub use crate::chunk::*;
pub use crate::driver::*;
pub use crate::error::*;
pub use crate::pool::*;
pub use crate::progress::*;
pub use crate::table::*;
pub use crate::worker::*;
