#![doc = include_str!("../README.md")]

mod config;
mod report;
mod telemetry;

use anyhow::Context;
use clap::Parser;
use config::{CliArgs, Command, CountConfig};
use futures::StreamExt;
use report::Summary;
use std::{io::Write, time::Instant};
use telemetry::{init_telemetry, record_progress, record_run, record_stage_duration};
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use unigram::{
    Aggregator, ProgressStream,
    dining::{DiningConfig, dine},
    progress_channel,
};

// Using mimalloc for better performance when many worker threads allocate
// table keys concurrently.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    let providers = init_telemetry()?;

    let res = match args.command {
        Command::Count(args) => run_count(CountConfig::try_from(args)?).await,
        Command::Dine(args) => run_dine(DiningConfig::try_from(args)?).await,
    };

    providers.shutdown();
    res
}

async fn run_count(config: CountConfig) -> anyhow::Result<()> {
    log_startup_info(&config);

    let aggregator = Aggregator::new(config.aggregator.clone())?;
    let signals = tokio::spawn(cancel_on_signal(aggregator.shutdown_token()));

    let (sink, stream) = progress_channel(16);
    let progress = tokio::spawn(track_progress(stream));

    let result = aggregator.run_with_progress(&config.path, sink).await;
    signals.abort();
    // The stream ends once the run drops its sink.
    finish_progress(progress).await;

    let result = result.with_context(|| format!("failed to aggregate {}", config.path.display()))?;
    record_run(&result);

    let report_start = Instant::now();
    let summary = Summary::new(&config.path, &result, &config.words, config.top);
    let mut stdout = std::io::stdout().lock();
    if config.json {
        summary.write_json(&mut stdout)?;
    } else {
        summary.write_text(&mut stdout)?;
    }
    stdout.flush()?;
    let reporting = report_start.elapsed();
    record_stage_duration("reporting", reporting.as_secs_f64() * 1_000.0);
    tracing::info!("Printing results took {:.2?}", reporting);

    tracing::info!("Total time {:.2?}", result.timings.total + reporting);
    Ok(())
}

async fn run_dine(config: DiningConfig) -> anyhow::Result<()> {
    tracing::info!(
        philosophers = config.philosophers,
        rounds = config.rounds,
        "Starting dinner"
    );

    let report = dine(config).await?;
    for (seat, meals) in report.meals.iter().enumerate() {
        println!("Philosopher {seat} ate {meals} meals");
    }
    for (fork, uses) in report.fork_uses.iter().enumerate() {
        println!("Fork {fork} was used {uses} times");
    }
    Ok(())
}

fn log_startup_info(config: &CountConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Aggregating {} with full config: {:#?}",
            config.path.display(),
            config
        );
    } else {
        tracing::info!(
            "Aggregating {} with {} workers",
            config.path.display(),
            config.aggregator.parallelism
        );
    }
}

async fn track_progress(mut stream: ProgressStream) {
    while let Some(snapshot) = stream.next().await {
        record_progress(snapshot);
    }
}

/// Waits for the progress consumer; returns whether it ended cleanly.
async fn finish_progress(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Progress consumer task failed: {e}");
            false
        }
    }
}

/// Cancels the run on Ctrl+C or SIGTERM; workers stop at their next
/// progress flush.
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Cancelling run...");
    token.cancel();
}
