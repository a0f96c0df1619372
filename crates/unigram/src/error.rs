//! Error types for corpus aggregation.
//!
//! Every variant is fatal to the run that produced it: a corpus is processed
//! as an all-or-nothing unit, so the driver surfaces the first error and
//! discards any partial tables.
//!
//! ## Error Cases
//! - `Io`: opening, sizing, seeking or reading the corpus failed.
//! - `Chunking`: a boundary probe failed before any work was dispatched.
//! - `MalformedLine`: a worker could not parse a line of its chunk.
//! - `InvalidConfig`: the aggregator was configured with unusable values.
//! - `Spawn`: a pool thread could not be started.
//! - `WorkerLost`: a pool thread went away without replying.
//! - `Cancelled`: a worker stopped because the run was aborted.

use crate::chunk::Chunk;
use core::fmt;
use std::{io, path::PathBuf};
use thiserror::Error;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the aggregation pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// File open/metadata/seek/read failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Probing for a line boundary failed.
    #[error("Cannot establish a line boundary near byte {offset}: {source}")]
    Chunking {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// A line inside a chunk did not match `word \t _ \t count [\t ...]`.
    #[error("Malformed line {line} at byte {offset} in chunk {chunk}: {reason}")]
    MalformedLine {
        chunk: Chunk,
        /// 1-based line number relative to the start of the chunk.
        line: u64,
        /// Absolute byte offset of the start of the line.
        offset: u64,
        reason: MalformedReason,
    },

    /// The aggregator configuration was rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The operating system refused to start a pool thread.
    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },

    /// A pool thread dropped its reply channel (usually a panic).
    #[error("Worker {worker} terminated without replying")]
    WorkerLost { worker: usize },

    /// The run was aborted while this worker was still scanning.
    #[error("Run cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for the secondary error reported by workers that were
    /// stopped because some other worker already failed.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Why a line was rejected by a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MalformedReason {
    /// Fewer than three tab-separated fields.
    MissingFields { found: usize },
    /// The word field is not valid UTF-8.
    InvalidUtf8,
    /// The match count is not a non-negative base-10 integer.
    InvalidCount { raw: String },
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFields { found } => {
                write!(f, "expected at least 3 tab-separated fields, found {found}")
            }
            Self::InvalidUtf8 => f.write_str("word is not valid UTF-8"),
            Self::InvalidCount { raw } => write!(f, "match count {raw:?} is not an integer"),
        }
    }
}
