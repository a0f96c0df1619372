//! Line-aligned partitioning of a corpus file into byte ranges.
//!
//! [`compute_chunks`] splits `[0, file_size)` into contiguous, non-overlapping
//! [`Chunk`]s whose boundaries always sit at the start of a line: every `start`
//! is `0` or directly follows a `\n`, and every `end` is `file_size` or directly
//! follows a `\n`. Each chunk is then handed to exactly one worker.
//!
//! Boundaries are found by probing the file around evenly spaced candidates.
//! A candidate that lands mid-line is walked back to the previous line start;
//! if that would collapse the chunk to zero length the boundary is instead
//! pushed forward to the next line start.

use crate::error::{Error, Result};
use core::fmt;
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

/// Bytes read per probe when searching for a line terminator.
const PROBE_WINDOW: usize = 8 * 1024;

/// A half-open, line-aligned byte range `[start, end)` of the corpus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    pub const fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of bytes covered by this chunk.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Splits a file of `file_size` bytes into roughly `target` line-aligned
/// chunks.
///
/// The result is ordered, gap-free and covers `[0, file_size)` exactly once.
/// An empty file yields no chunks. Fewer chunks than requested are returned
/// when the file has fewer lines than `target`; a file without any line
/// terminator always yields a single chunk. Because walked-back boundaries can
/// shorten a chunk, slightly more than `target` chunks may also be produced.
///
/// # Errors
///
/// - [`Error::InvalidConfig`] if `target` is zero.
/// - [`Error::Chunking`] if a boundary probe cannot seek or read.
pub fn compute_chunks<R>(reader: &mut R, file_size: u64, target: usize) -> Result<Vec<Chunk>>
where
    R: Read + Seek,
{
    if target == 0 {
        return Err(Error::InvalidConfig {
            reason: "chunk target count must be greater than 0".to_string(),
        });
    }

    let ideal_chunk_size = file_size / target as u64;
    let mut probe = BoundaryProbe::new(reader, file_size);
    let mut chunks = Vec::with_capacity(target);
    let mut start = 0;

    while start < file_size {
        let candidate = start.saturating_add(ideal_chunk_size).min(file_size);

        let mut end = probe.line_start_at_or_before(candidate, start)?;
        if end == start {
            end = probe.line_start_after(candidate)?;
        }

        chunks.push(Chunk::new(start, end));
        start = end;
    }

    Ok(chunks)
}

/// Opens `path` and computes its chunks, returning them with the file size.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be opened or sized, otherwise the
/// errors of [`compute_chunks`].
pub fn compute_file_chunks(path: &Path, target: usize) -> Result<(u64, Vec<Chunk>)> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let file_size = file.metadata().map_err(|e| Error::io(path, e))?.len();
    let chunks = compute_chunks(&mut file, file_size, target)?;
    Ok((file_size, chunks))
}

/// Seek-and-scan helper used to locate line starts.
struct BoundaryProbe<'a, R> {
    reader: &'a mut R,
    file_size: u64,
    buf: Vec<u8>,
}

impl<'a, R> BoundaryProbe<'a, R>
where
    R: Read + Seek,
{
    fn new(reader: &'a mut R, file_size: u64) -> Self {
        Self {
            reader,
            file_size,
            buf: vec![0; PROBE_WINDOW],
        }
    }

    /// Returns the greatest line start in `(floor, position]`, or `floor` if
    /// there is none.
    fn line_start_at_or_before(&mut self, position: u64, floor: u64) -> Result<u64> {
        if position >= self.file_size {
            return Ok(self.file_size);
        }

        let mut window_end = position;
        while window_end > floor {
            let window_start = window_end
                .saturating_sub(PROBE_WINDOW as u64)
                .max(floor);
            let len = (window_end - window_start) as usize;

            self.reader
                .seek(SeekFrom::Start(window_start))
                .and_then(|_| self.reader.read_exact(&mut self.buf[..len]))
                .map_err(|source| Error::Chunking {
                    offset: window_start,
                    source,
                })?;

            if let Some(idx) = self.buf[..len].iter().rposition(|&b| b == b'\n') {
                return Ok(window_start + idx as u64 + 1);
            }
            window_end = window_start;
        }

        Ok(floor)
    }

    /// Returns the first line start strictly after `position`, or the file
    /// size if the remainder of the file has no terminator.
    fn line_start_after(&mut self, position: u64) -> Result<u64> {
        let mut offset = position;
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|source| Error::Chunking { offset, source })?;

        while offset < self.file_size {
            let read = self
                .reader
                .read(&mut self.buf)
                .map_err(|source| Error::Chunking { offset, source })?;
            if read == 0 {
                break;
            }
            if let Some(idx) = self.buf[..read].iter().position(|&b| b == b'\n') {
                return Ok((offset + idx as u64 + 1).min(self.file_size));
            }
            offset += read as u64;
        }

        Ok(self.file_size)
    }
}
