use super::*;
use crate::{error::MalformedReason, progress::progress_channel, worker::parse_line};
use core::time::Duration;
use futures::StreamExt;
use proptest::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn corpus(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn aggregator(parallelism: usize) -> Aggregator {
    Aggregator::new(
        AggregatorConfig::default()
            .with_parallelism(parallelism)
            .with_poll_interval(Duration::from_millis(5)),
    )
    .unwrap()
}

fn serial_scan(data: &[u8]) -> WordCountTable {
    let mut table = WordCountTable::new();
    for line in data.split_inclusive(|&b| b == b'\n') {
        let (word, count) = parse_line(line).unwrap();
        table.add(word, count);
    }
    table
}

#[tokio::test]
async fn ten_line_corpus_matches_hand_computed_table() {
    let file = corpus(&[
        "cat\tX\t3\tY",
        "dog\tX\t2\tY",
        "cat\tX\t1\tY",
        "eel\tX\t5\tY",
        "dog\tX\t1\tY",
        "cat\tX\t1\tY",
        "fox\tX\t9\tY",
        "eel\tX\t2\tY",
        "dog\tX\t4\tY",
        "cat\tX\t2\tY",
    ]);

    let result = aggregator(3).run(file.path()).await.unwrap();

    let expected: WordCountTable = [("cat", 7), ("dog", 7), ("eel", 7), ("fox", 9)]
        .into_iter()
        .collect();
    assert_eq!(result.table, expected);
    assert!(result.chunk_count >= 2);
    assert_eq!(result.bytes_processed, result.file_size);
}

#[tokio::test]
async fn three_line_example_reduces_to_cat_and_dog() {
    let file = corpus(&["cat\tX\t3\tY", "dog\tX\t2\tY", "cat\tX\t1\tY"]);
    let result = aggregator(3).run(file.path()).await.unwrap();
    assert_eq!(result.count("cat"), Some(4));
    assert_eq!(result.count("dog"), Some(2));
    assert_eq!(result.table.len(), 2);
}

#[tokio::test]
async fn file_without_terminator_is_a_single_chunk() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"cat\tX\t3\tY").unwrap();
    file.flush().unwrap();

    let result = aggregator(4).run(file.path()).await.unwrap();
    assert_eq!(result.chunk_count, 1);
    assert_eq!(result.workers, 1);
    assert_eq!(result.count("cat"), Some(3));
    assert_eq!(result.bytes_processed, 9);
}

#[tokio::test]
async fn malformed_line_fails_the_whole_run() {
    let mut lines = vec!["cat\tX\t3\tY"; 40];
    lines[25] = "broken\tX";
    let file = corpus(&lines);

    let err = aggregator(4).run(file.path()).await.unwrap_err();
    match err {
        Error::MalformedLine { reason, offset, .. } => {
            assert_eq!(reason, MalformedReason::MissingFields { found: 2 });
            // Every preceding line is 10 bytes.
            assert_eq!(offset, 250);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn several_malformed_chunks_abort_and_release_the_pool() {
    let mut lines = vec!["cat\tX\t3\tY"; 64];
    for line in lines.iter_mut().step_by(5).skip(1) {
        *line = "bad";
    }
    let file = corpus(&lines);
    let aggregator = Aggregator::new(
        AggregatorConfig::default()
            .with_parallelism(8)
            .with_flush_divisor(1)
            .with_poll_interval(Duration::from_millis(5)),
    )
    .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(10), aggregator.run(file.path()))
        .await
        .expect("aborted run did not finish")
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::MalformedLine {
                reason: MalformedReason::MissingFields { found: 1 },
                ..
            }
        ),
        "{err:?}"
    );
    // The abort stays local to the run.
    assert!(!aggregator.shutdown_token().is_cancelled());

    let clean = corpus(&["cat\tX\t3\tY", "dog\tX\t2\tY"]);
    let result = aggregator.run(clean.path()).await.unwrap();
    assert_eq!(result.count("cat"), Some(3));
}

#[tokio::test]
async fn first_failure_stops_further_submissions() {
    let mut data = b"bad\n".to_vec();
    for _ in 0..200 {
        data.extend_from_slice(b"w\tX\t1\n");
    }
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    let mut chunks = vec![Chunk::new(0, 4)];
    chunks.extend((0..200).map(|i| Chunk::new(4 + i * 6, 10 + i * 6)));

    let pool = WorkerPool::new(1, 1).unwrap();
    let progress = Arc::new(ProgressCounter::new());
    let options = ScanOptions {
        flush_divisor: 1,
        cancel: CancellationToken::new(),
    };

    let err = dispatch(&pool, Arc::from(file.path()), &chunks, &progress, &options)
        .await
        .unwrap_err();
    match err {
        Error::MalformedLine { chunk, line, .. } => {
            assert_eq!(chunk, chunks[0]);
            assert_eq!(line, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(options.cancel.is_cancelled());
    // Only chunks already queued when the failure arrived were scanned.
    assert!(progress.get() <= 12, "scanned {} bytes", progress.get());

    tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
        .await
        .expect("pool did not shut down");
}

#[tokio::test]
async fn counter_reaches_file_size_for_any_flush_divisor() {
    let lines: Vec<String> = (0..500).map(|i| format!("w{}\t1900\t{i}\t1", i % 17)).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let file = corpus(&refs);

    for divisor in [1, 3, 50, 10_000] {
        let aggregator = Aggregator::new(
            AggregatorConfig::default()
                .with_parallelism(4)
                .with_flush_divisor(divisor),
        )
        .unwrap();
        let result = aggregator.run(file.path()).await.unwrap();
        assert_eq!(result.bytes_processed, result.file_size, "divisor {divisor}");
    }
}

#[tokio::test]
async fn empty_file_produces_empty_table() {
    let file = NamedTempFile::new().unwrap();
    let result = aggregator(4).run(file.path()).await.unwrap();
    assert!(result.table.is_empty());
    assert_eq!(result.chunk_count, 0);
    assert_eq!(result.bytes_processed, 0);
}

#[tokio::test]
async fn missing_file_is_an_io_error() {
    let err = aggregator(2)
        .run("/definitely/not/a/corpus.tsv")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "{err:?}");
}

#[tokio::test]
async fn shutdown_token_aborts_the_run() {
    let file = corpus(&["cat\tX\t3\tY", "dog\tX\t2\tY"]);
    let aggregator = aggregator(2);
    aggregator.shutdown_token().cancel();
    let err = aggregator.run(file.path()).await.unwrap_err();
    assert!(err.is_cancelled(), "{err:?}");
}

#[tokio::test]
async fn progress_snapshots_never_exceed_total() {
    let lines: Vec<String> = (0..2_000).map(|i| format!("w{i}\tX\t1")).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let file = corpus(&refs);

    let (sink, stream) = progress_channel(1024);
    let result = aggregator(4)
        .run_with_progress(file.path(), sink)
        .await
        .unwrap();

    let snapshots: Vec<_> = stream.collect().await;
    assert!(!snapshots.is_empty());
    let mut last = 0;
    for snapshot in snapshots {
        assert_eq!(snapshot.total, result.file_size);
        assert!(snapshot.done <= snapshot.total);
        assert!(snapshot.done >= last, "counter went backwards");
        last = snapshot.done;
    }
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let err = Aggregator::new(AggregatorConfig::default().with_parallelism(0)).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn parallel_run_matches_serial_scan(
        lines in prop::collection::vec(("[a-d]{1,2}", 0u64..100), 0..80),
        parallelism in 1usize..9,
    ) {
        let mut file = NamedTempFile::new().unwrap();
        for (word, count) in &lines {
            writeln!(file, "{word}\tX\t{count}\tY").unwrap();
        }
        file.flush().unwrap();
        let data = std::fs::read(file.path()).unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime
            .block_on(aggregator(parallelism).run(file.path()))
            .unwrap();

        prop_assert_eq!(&result.table, &serial_scan(&data));
        prop_assert_eq!(result.bytes_processed, data.len() as u64);
    }
}
