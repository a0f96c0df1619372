//! Per-chunk line scanning.
//!
//! A worker opens the corpus, seeks to its chunk and reads whole lines until
//! the chunk's end. Each line is `word \t <ignored> \t match_count [\t ...]`;
//! counts are summed per word into a local [`WordCountTable`].
//!
//! Progress is batched: consumed bytes are only published to the shared
//! [`ProgressCounter`] once at least `chunk_len / flush_divisor` bytes have
//! accumulated, and whatever remains is flushed before returning. The run's
//! cancellation token is checked at every flush.

use crate::{
    chunk::Chunk,
    error::{Error, MalformedReason, Result},
    progress::ProgressCounter,
    table::WordCountTable,
};
use std::{
    fs::File,
    io::{BufRead, BufReader, Read, Seek, SeekFrom},
    path::Path,
};
use tokio_util::sync::CancellationToken;

/// Default number of progress flushes per chunk.
pub const DEFAULT_FLUSH_DIVISOR: u64 = 50;

const READ_BUFFER_BYTES: usize = 256 * 1024;

/// Rough bytes per distinct word, used to pre-size local tables.
const BYTES_PER_WORD_HINT: u64 = 256;
const MAX_CAPACITY_HINT: u64 = 1 << 16;

/// Knobs shared by every chunk of a run.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// A chunk publishes progress roughly this many times.
    pub flush_divisor: u64,
    /// Cancelled by the driver when another worker has failed.
    pub cancel: CancellationToken,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            flush_divisor: DEFAULT_FLUSH_DIVISOR,
            cancel: CancellationToken::new(),
        }
    }
}

impl ScanOptions {
    /// Bytes to accumulate locally before touching the shared counter.
    pub fn flush_threshold(&self, chunk_len: u64) -> u64 {
        (chunk_len / self.flush_divisor.max(1)).max(1)
    }
}

/// Aggregates the lines of `chunk` from the file at `path`.
///
/// # Errors
///
/// - [`Error::Io`] if the file cannot be opened, seeked or read.
/// - [`Error::MalformedLine`] on the first line that fails to parse.
/// - [`Error::Cancelled`] if `options.cancel` fires mid-scan.
pub fn process_chunk(
    path: &Path,
    chunk: Chunk,
    progress: &ProgressCounter,
    options: &ScanOptions,
) -> Result<WordCountTable> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    file.seek(SeekFrom::Start(chunk.start))
        .map_err(|e| Error::io(path, e))?;

    // `take` guarantees the reader cannot run past the chunk even if `end`
    // were not a line boundary.
    let reader = BufReader::with_capacity(READ_BUFFER_BYTES, file.take(chunk.len()));
    scan_lines(reader, path, chunk, progress, options)
}

/// Scans every line produced by `reader`, which must be positioned at
/// `chunk.start` and yield exactly the chunk's bytes.
///
/// `path` is only used for error context.
pub fn scan_lines<R>(
    mut reader: R,
    path: &Path,
    chunk: Chunk,
    progress: &ProgressCounter,
    options: &ScanOptions,
) -> Result<WordCountTable>
where
    R: BufRead,
{
    if options.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let threshold = options.flush_threshold(chunk.len());
    let capacity = (chunk.len() / BYTES_PER_WORD_HINT).min(MAX_CAPACITY_HINT) as usize;
    let mut table = WordCountTable::with_capacity(capacity);

    let mut line = Vec::with_capacity(128);
    let mut line_number = 0_u64;
    let mut offset = chunk.start;
    let mut pending = 0_u64;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| Error::io(path, e))? as u64;
        if read == 0 {
            break;
        }
        line_number += 1;

        let (word, count) = parse_line(&line).map_err(|reason| Error::MalformedLine {
            chunk,
            line: line_number,
            offset,
            reason,
        })?;
        table.add(word, count);

        offset += read;
        pending += read;
        if pending >= threshold {
            if options.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            progress.add(pending);
            pending = 0;
        }
    }

    progress.add(pending);
    Ok(table)
}

/// Splits a raw line into its word and match count.
///
/// A trailing `\n` or `\r\n` is ignored; fields past the third are ignored.
pub fn parse_line(line: &[u8]) -> Result<(&str, u64), MalformedReason> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let mut fields = line.split(|&b| b == b'\t');
    let (Some(word), Some(_), Some(count)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(MalformedReason::MissingFields {
            found: line.split(|&b| b == b'\t').count(),
        });
    };

    let word = core::str::from_utf8(word).map_err(|_| MalformedReason::InvalidUtf8)?;
    let count = core::str::from_utf8(count)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .ok_or_else(|| MalformedReason::InvalidCount {
            raw: String::from_utf8_lossy(count).into_owned(),
        })?;

    Ok((word, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    const SAMPLE: &[u8] = b"cat\tX\t3\tY\ndog\tX\t2\tY\ncat\tX\t1\tY\n";

    fn scan(data: &[u8], divisor: u64) -> (Result<WordCountTable>, u64) {
        let progress = ProgressCounter::new();
        let options = ScanOptions {
            flush_divisor: divisor,
            ..ScanOptions::default()
        };
        let chunk = Chunk::new(0, data.len() as u64);
        let result = scan_lines(
            Cursor::new(data),
            Path::new("mem"),
            chunk,
            &progress,
            &options,
        );
        (result, progress.get())
    }

    #[test]
    fn sums_repeated_words_within_a_chunk() {
        let (table, done) = scan(SAMPLE, 50);
        let table = table.unwrap();
        assert_eq!(table.get("cat"), Some(4));
        assert_eq!(table.get("dog"), Some(2));
        assert_eq!(table.len(), 2);
        assert_eq!(done, SAMPLE.len() as u64);
    }

    #[test]
    fn counter_matches_chunk_length_for_any_divisor() {
        for divisor in [1, 2, 3, 7, 50, 1_000_000] {
            let (table, done) = scan(SAMPLE, divisor);
            assert!(table.is_ok());
            assert_eq!(done, SAMPLE.len() as u64, "divisor {divisor}");
        }
    }

    #[test]
    fn two_field_line_is_fatal_with_location() {
        let data = b"cat\tX\t3\tY\nbad\tX\ndog\tX\t2\tY\n";
        let (result, _) = scan(data, 50);
        match result.unwrap_err() {
            Error::MalformedLine {
                line,
                offset,
                reason,
                ..
            } => {
                assert_eq!(line, 2);
                assert_eq!(offset, 10);
                assert_eq!(reason, MalformedReason::MissingFields { found: 2 });
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_numeric_count_is_fatal() {
        let (result, _) = scan(b"cat\tX\tmany\n", 50);
        assert!(matches!(
            result.unwrap_err(),
            Error::MalformedLine {
                reason: MalformedReason::InvalidCount { .. },
                ..
            }
        ));
    }

    #[test]
    fn parse_line_accepts_three_fields_and_crlf() {
        assert_eq!(parse_line(b"cat\t1900\t7\r\n"), Ok(("cat", 7)));
        assert_eq!(parse_line(b"cat\t1900\t7\t3\tzz"), Ok(("cat", 7)));
        assert_eq!(
            parse_line(b"\n"),
            Err(MalformedReason::MissingFields { found: 1 })
        );
        assert_eq!(
            parse_line(b"a\tb\t-1"),
            Err(MalformedReason::InvalidCount { raw: "-1".into() })
        );
        assert_eq!(parse_line(b"\xff\tb\t1"), Err(MalformedReason::InvalidUtf8));
    }

    #[test]
    fn cancelled_scan_stops_early() {
        let options = ScanOptions {
            flush_divisor: 50,
            cancel: CancellationToken::new(),
        };
        options.cancel.cancel();
        let progress = ProgressCounter::new();
        let result = scan_lines(
            Cursor::new(SAMPLE),
            Path::new("mem"),
            Chunk::new(0, SAMPLE.len() as u64),
            &progress,
            &options,
        );
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(progress.get(), 0);
    }

    #[test]
    fn process_chunk_reads_only_its_range() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE).unwrap();
        file.flush().unwrap();

        // Second line only: "dog\tX\t2\tY\n" spans bytes [10, 20).
        let progress = ProgressCounter::new();
        let table = process_chunk(
            file.path(),
            Chunk::new(10, 20),
            &progress,
            &ScanOptions::default(),
        )
        .unwrap();

        assert_eq!(table.get("dog"), Some(2));
        assert_eq!(table.get("cat"), None);
        assert_eq!(progress.get(), 10);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = process_chunk(
            Path::new("/definitely/not/here.tsv"),
            Chunk::new(0, 1),
            &ProgressCounter::new(),
            &ScanOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
