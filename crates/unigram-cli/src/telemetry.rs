//! # Telemetry Features
//!
//! Console logging is always on. OpenTelemetry export is opt-in through cargo
//! features.
//!
//! ## Feature matrix
//!
//! - `tracing`: Exports spans (the `aggregate` run span and its events).
//! - `metrics`: Exports counters and histograms describing each run.
//! - `stdout`: Sends whatever is enabled above to the OpenTelemetry stdout
//!   exporter.
//!
//! ## Feature constraints
//!
//! - `stdout` requires at least one of `tracing` or `metrics`.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features tracing,metrics,stdout -- count corpus.tsv
//! ```
//!
//! Log verbosity follows `RUST_LOG` and defaults to `info`.

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use unigram::{ProgressSnapshot, RunResult};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down any exporters.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer();

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder("unigram")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("unigram")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

#[cfg(feature = "tracing")]
fn init_tracer() -> sdktrace::SdkTracerProvider {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    builder.build()
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static RUNS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BYTES_PROCESSED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CHUNKS_PROCESSED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DISTINCT_WORDS: OnceLock<Histogram<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STAGE_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static PROGRESS_RATIO: OnceLock<Gauge<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = RUNS.set(
        meter
            .u64_counter("runs")
            .with_description("Completed aggregation runs")
            .build(),
    );

    let _ = BYTES_PROCESSED.set(
        meter
            .u64_counter("bytes_processed")
            .with_unit("By")
            .with_description("Corpus bytes aggregated")
            .build(),
    );

    let _ = CHUNKS_PROCESSED.set(
        meter
            .u64_counter("chunks_processed")
            .with_description("Line-aligned chunks scanned by workers")
            .build(),
    );

    let _ = DISTINCT_WORDS.set(
        meter
            .u64_histogram("distinct_words")
            .with_description("Distinct words in the global table per run")
            .build(),
    );

    let _ = STAGE_DURATION_MS.set(
        meter
            .f64_histogram("stage_duration")
            .with_unit("ms")
            .with_description("Wall-clock duration of each pipeline stage")
            .build(),
    );

    let _ = PROGRESS_RATIO.set(
        meter
            .f64_gauge("progress_ratio")
            .with_description("Fraction of the corpus processed so far")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn record_stage_duration(stage: &'static str, duration_ms: f64) {
    if let Some(histogram) = STAGE_DURATION_MS.get() {
        histogram.record(duration_ms, &[KeyValue::new("stage", stage)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_stage_duration(_stage: &'static str, _duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn record_progress(snapshot: ProgressSnapshot) {
    if let Some(gauge) = PROGRESS_RATIO.get() {
        gauge.record(snapshot.fraction(), &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_progress(_snapshot: ProgressSnapshot) {}

#[cfg(feature = "metrics")]
pub fn record_run(result: &RunResult) {
    if let Some(counter) = RUNS.get() {
        counter.add(1, &[]);
    }
    if let Some(counter) = BYTES_PROCESSED.get() {
        counter.add(result.bytes_processed, &[]);
    }
    if let Some(counter) = CHUNKS_PROCESSED.get() {
        counter.add(result.chunk_count as u64, &[]);
    }
    if let Some(histogram) = DISTINCT_WORDS.get() {
        histogram.record(result.table.len() as u64, &[]);
    }
    record_stage_timings(result);
}

#[cfg(not(feature = "metrics"))]
pub fn record_run(result: &RunResult) {
    record_stage_timings(result);
}

fn record_stage_timings(result: &RunResult) {
    let timings = &result.timings;
    for (stage, duration) in [
        ("chunking", timings.chunking),
        ("processing", timings.processing),
        ("reduction", timings.reduction),
        ("total", timings.total),
    ] {
        record_stage_duration(stage, duration.as_secs_f64() * 1_000.0);
    }
}
