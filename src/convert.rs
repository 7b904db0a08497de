//! Batch entry points: discover, dispatch, aggregate, report.
//!
//! ```text
//! BatchConfig
//!  │
//!  ├─ 1. Backends   probe the system for the configured plan
//!  ├─ 2. Discover   directory + pattern → ConversionTask list
//!  ├─ 3. Dispatch   execution strategy → stream of ConversionResult
//!  ├─ 4. Aggregate  stats actor (+ optional JSONL journal)
//!  └─ 5. Report     BatchReport with rates and recommendations
//! ```
//!
//! Only setup problems are errors. Once the first task is dispatched the
//! batch always runs to completion and returns a report, however many
//! tasks failed.

use crate::backend::{BackendRegistry, CancelFlag, ContextGauge, SessionContext};
use crate::config::BatchConfig;
use crate::discovery;
use crate::error::BatchError;
use crate::output::{BatchReport, ConversionTask};
use crate::pipeline::coordinator::ConversionCoordinator;
use crate::pipeline::replicate::MirrorSink;
use crate::progress::{self, ProgressEvent};
use crate::stats::{Journal, StatsAggregator};
use crate::strategy;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// List the tasks a batch with `config` would run, without converting.
pub fn discover(config: &BatchConfig) -> Result<Vec<ConversionTask>, BatchError> {
    discovery::discover(&config.source_dir, &config.pattern, config.pdf_dir.as_deref())
}

/// Convert every matching document using backends probed from the system.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(BatchError)` only when the batch cannot start:
/// - no backend found for the configured plan
/// - source directory missing or unreadable
/// - journal cannot be opened
pub async fn convert_batch(config: &BatchConfig) -> Result<BatchReport, BatchError> {
    let registry = BackendRegistry::detect(config)?;
    convert_batch_with(config, registry, CancelFlag::new()).await
}

/// Convert with an explicit registry and cancellation flag.
///
/// Setting `cancel` stops new backend attempts; in-flight converters are
/// killed and every remaining task ends `Failed` with a cancellation error.
pub async fn convert_batch_with(
    config: &BatchConfig,
    registry: BackendRegistry,
    cancel: CancelFlag,
) -> Result<BatchReport, BatchError> {
    let started = Instant::now();

    // ── Step 1: Discover ─────────────────────────────────────────────────
    let tasks = discover(config)?;
    let total = tasks.len();
    info!(
        "Found {} file(s) matching '{}' in {}",
        total,
        config.pattern,
        config.source_dir.display()
    );

    // ── Step 2: Journal ──────────────────────────────────────────────────
    let journal = match &config.journal_path {
        Some(path) => Some(Journal::open(path).await?),
        None => None,
    };

    // ── Step 3: Wire up workers ──────────────────────────────────────────
    let (events, writer) = progress::spawn_writer(config.progress_callback.clone(), total);
    events.send(ProgressEvent::BatchStarted {
        total,
        mode: config.mode,
        workers: config.workers,
    });

    let gauge = ContextGauge::new();
    let mut coordinator = ConversionCoordinator::new(
        registry,
        SessionContext::new(config.task_timeout_secs, cancel),
        gauge.clone(),
        events.clone(),
    );
    if let Some(dir) = &config.mirror_dir {
        debug!("Replicating PDFs to {}", dir.display());
        coordinator = coordinator.with_mirror(MirrorSink::new(dir));
    }

    // ── Step 4: Dispatch and aggregate ───────────────────────────────────
    let aggregator = StatsAggregator::spawn(journal);
    let mut results = strategy::execute(config.mode, config.workers, Arc::new(coordinator), tasks);
    while let Some(result) = results.next().await {
        aggregator.record(result);
    }
    let aggregate = aggregator.finish().await?;

    if aggregate.stats.total != total {
        warn!(
            "Expected {} results, aggregated {}",
            total, aggregate.stats.total
        );
    }
    if !strategy::within_bound(&gauge, config.mode, config.workers) {
        warn!(
            "Peak of {} open contexts exceeded the {} mode bound",
            gauge.peak(),
            config.mode
        );
    }

    // ── Step 5: Report ───────────────────────────────────────────────────
    events.send(ProgressEvent::BatchFinished {
        stats: aggregate.stats.clone(),
    });
    if let Err(e) = writer.await {
        warn!("Progress writer stopped abnormally: {}", e);
    }

    let report = BatchReport {
        stats: aggregate.stats,
        results: aggregate.results,
        mode: config.mode,
        workers: config.workers,
        elapsed_ms: started.elapsed().as_millis() as u64,
        peak_open_contexts: gauge.peak(),
    };
    info!(
        "Batch finished in {}ms: {} succeeded, {} skipped, {} failed",
        report.elapsed_ms, report.stats.succeeded, report.stats.skipped, report.stats.failed
    );
    Ok(report)
}

/// Synchronous wrapper around [`convert_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_batch_sync(config: &BatchConfig) -> Result<BatchReport, BatchError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BatchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_batch(config))
}
