use crate::table::WordCountTable;
use core::time::Duration;

/// Wall-clock time spent in each pipeline stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageTimings {
    pub chunking: Duration,
    pub processing: Duration,
    pub reduction: Duration,
    pub total: Duration,
}

/// Outcome of a successful run.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunResult {
    /// The global table merged from every chunk.
    pub table: WordCountTable,
    pub timings: StageTimings,
    pub file_size: u64,
    pub chunk_count: usize,
    /// Worker threads actually started for the run.
    pub workers: usize,
    /// Final value of the progress counter; equals `file_size`.
    pub bytes_processed: u64,
}

impl RunResult {
    /// Shorthand for `self.table.get(word)`.
    pub fn count(&self, word: &str) -> Option<u64> {
        self.table.get(word)
    }
}
