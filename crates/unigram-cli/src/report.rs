//! Terminal reporting of a finished run.

use serde::Serialize;
use std::{io, path::Path};
use unigram::{RunResult, StageTimings};

#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    pub path: &'a Path,
    pub file_size: u64,
    pub chunks: usize,
    pub workers: usize,
    pub distinct_words: usize,
    pub total_matches: u64,
    pub timings: StageTimings,
    pub lookups: Vec<Lookup<'a>>,
    pub top: Vec<Lookup<'a>>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Lookup<'a> {
    pub word: &'a str,
    /// `None` when the word never occurs in the corpus.
    pub count: Option<u64>,
}

impl<'a> Summary<'a> {
    pub fn new(path: &'a Path, result: &'a RunResult, words: &'a [String], top: usize) -> Self {
        Self {
            path,
            file_size: result.file_size,
            chunks: result.chunk_count,
            workers: result.workers,
            distinct_words: result.table.len(),
            total_matches: result.table.total(),
            timings: result.timings,
            lookups: words
                .iter()
                .map(|word| Lookup {
                    word,
                    count: result.count(word),
                })
                .collect(),
            top: result
                .table
                .top(top)
                .into_iter()
                .map(|(word, count)| Lookup {
                    word,
                    count: Some(count),
                })
                .collect(),
        }
    }

    pub fn write_text(&self, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "Corpus: {} ({} bytes)", self.path.display(), self.file_size)?;
        writeln!(out, "Chunks: {} on {} workers", self.chunks, self.workers)?;
        writeln!(out, "Total words: {}", self.distinct_words)?;
        writeln!(out, "Total matches: {}", self.total_matches)?;

        for lookup in &self.lookups {
            match lookup.count {
                Some(count) => writeln!(out, "Total count for word {:?}: {count}", lookup.word)?,
                None => writeln!(out, "Word {:?} not found", lookup.word)?,
            }
        }

        if !self.top.is_empty() {
            writeln!(out, "Top {} words:", self.top.len())?;
            for (rank, lookup) in self.top.iter().enumerate() {
                writeln!(
                    out,
                    "{:>4}. {}\t{}",
                    rank + 1,
                    lookup.word,
                    lookup.count.unwrap_or_default()
                )?;
            }
        }

        let t = &self.timings;
        writeln!(
            out,
            "Timings: chunking {:.2?}, processing {:.2?}, reduction {:.2?}, total {:.2?}",
            t.chunking, t.processing, t.reduction, t.total
        )
    }

    pub fn write_json(&self, out: &mut impl io::Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out).map_err(serde_json::Error::io)
    }
}
