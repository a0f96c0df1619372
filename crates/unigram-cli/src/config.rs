use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, time::Duration};
use unigram::{AggregatorConfig, dining::DiningConfig};

/// Command-line interface for the `unigram` binary.
///
/// Every tuning flag can also be supplied through the environment (or a
/// `.env` file in the working directory).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "unigram",
    version,
    about = "Aggregate match counts per word across a large tab-separated n-gram corpus"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Count matches per word in a corpus file.
    Count(CountArgs),
    /// Run the dining philosophers simulation with ordered fork acquisition.
    Dine(DineArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CountArgs {
    /// Corpus file with `word<TAB>year<TAB>match_count[<TAB>...]` lines.
    ///
    /// Environment variable: `CORPUS_PATH`
    #[arg(env = "CORPUS_PATH")]
    pub path: PathBuf,

    /// Number of worker threads (and target number of chunks).
    ///
    /// `0` uses one worker per logical CPU.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 0)]
    pub workers: usize,

    /// How many times per chunk a worker publishes its progress.
    ///
    /// Larger values give smoother progress reports at the cost of more
    /// contention on the shared counter.
    ///
    /// Environment variable: `FLUSH_DIVISOR`
    #[arg(long, env = "FLUSH_DIVISOR", default_value_t = 50)]
    pub flush_divisor: u64,

    /// Interval between progress reports, in milliseconds.
    ///
    /// Environment variable: `POLL_INTERVAL_MS`
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Chunks that may be queued per worker before dispatch waits.
    ///
    /// Environment variable: `QUEUE_DEPTH`
    #[arg(long, env = "QUEUE_DEPTH", default_value_t = 64)]
    pub queue_depth: usize,

    /// Report the total count of this word (repeatable).
    #[arg(short, long = "word")]
    pub words: Vec<String>,

    /// Also report the N most frequent words.
    #[arg(long, default_value_t = 0)]
    pub top: usize,

    /// Print the summary as JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DineArgs {
    /// Number of philosophers (and forks) at the table.
    #[arg(long, default_value_t = 5)]
    pub philosophers: usize,

    /// Meals per philosopher.
    #[arg(long, default_value_t = 3)]
    pub rounds: usize,

    /// Thinking time between meals, in milliseconds.
    #[arg(long, default_value_t = 20)]
    pub think_ms: u64,

    /// Eating time, in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub eat_ms: u64,
}

/// Validated settings for `unigram count`.
#[derive(Debug, Clone)]
pub struct CountConfig {
    pub path: PathBuf,
    pub aggregator: AggregatorConfig,
    pub words: Vec<String>,
    pub top: usize,
    pub json: bool,
}

impl TryFrom<CountArgs> for CountConfig {
    type Error = anyhow::Error;

    fn try_from(args: CountArgs) -> Result<Self, Self::Error> {
        if args.flush_divisor == 0 {
            bail!("FLUSH_DIVISOR must be greater than 0");
        }

        if args.poll_interval_ms == 0 {
            bail!("POLL_INTERVAL_MS must be greater than 0");
        }

        if args.queue_depth == 0 {
            bail!("QUEUE_DEPTH must be greater than 0");
        }

        if !args.path.is_file() {
            bail!("corpus {} is not a readable file", args.path.display());
        }

        let mut aggregator = AggregatorConfig::default()
            .with_flush_divisor(args.flush_divisor)
            .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
            .with_queue_depth(args.queue_depth);
        if args.workers > 0 {
            aggregator = aggregator.with_parallelism(args.workers);
        }

        Ok(Self {
            path: args.path,
            aggregator,
            words: args.words,
            top: args.top,
            json: args.json,
        })
    }
}

impl TryFrom<DineArgs> for DiningConfig {
    type Error = anyhow::Error;

    fn try_from(args: DineArgs) -> Result<Self, Self::Error> {
        if args.philosophers < 2 {
            bail!(
                "--philosophers must be at least 2 (got {})",
                args.philosophers
            );
        }

        Ok(Self {
            philosophers: args.philosophers,
            rounds: args.rounds,
            think: Duration::from_millis(args.think_ms),
            eat: Duration::from_millis(args.eat_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn count_args(extra: &[&str], path: &str) -> CountArgs {
        let argv = ["unigram", "count", path].into_iter().chain(extra.iter().copied());
        match CliArgs::try_parse_from(argv).unwrap().command {
            Command::Count(args) => args,
            Command::Dine(_) => unreachable!(),
        }
    }

    fn corpus_file() -> (PathBuf, NamedTempFile) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"cat\tX\t1\n").unwrap();
        (file.path().to_path_buf(), file)
    }

    #[test]
    fn zero_workers_means_all_cpus() {
        let (path, _file) = corpus_file();
        let config = CountConfig::try_from(count_args(&[], path.to_str().unwrap())).unwrap();
        assert_eq!(config.aggregator, AggregatorConfig::default());
    }

    #[test]
    fn flags_reach_the_aggregator_config() {
        let (path, _file) = corpus_file();
        let args = count_args(
            &[
                "--workers",
                "3",
                "--flush-divisor",
                "10",
                "--poll-interval-ms",
                "250",
                "-w",
                "cat",
                "--word",
                "dog",
                "--top",
                "5",
                "--json",
            ],
            path.to_str().unwrap(),
        );
        let config = CountConfig::try_from(args).unwrap();
        assert_eq!(config.aggregator.parallelism, 3);
        assert_eq!(config.aggregator.flush_divisor, 10);
        assert_eq!(config.aggregator.poll_interval, Duration::from_millis(250));
        assert_eq!(config.words, vec!["cat".to_string(), "dog".to_string()]);
        assert_eq!(config.top, 5);
        assert!(config.json);
    }

    #[test]
    fn zero_flush_divisor_is_rejected() {
        let (path, _file) = corpus_file();
        let args = count_args(&["--flush-divisor", "0"], path.to_str().unwrap());
        assert!(CountConfig::try_from(args).is_err());
    }

    #[test]
    fn missing_corpus_is_rejected() {
        let args = count_args(&[], "/definitely/not/a/corpus.tsv");
        let err = CountConfig::try_from(args).unwrap_err();
        assert!(err.to_string().contains("not a readable file"));
    }

    #[test]
    fn dine_needs_two_philosophers() {
        let args = DineArgs {
            philosophers: 1,
            rounds: 1,
            think_ms: 0,
            eat_ms: 0,
        };
        assert!(DiningConfig::try_from(args).is_err());
    }
}
