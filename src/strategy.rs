//! Execution strategies: how tasks are dispatched to the coordinator.
//!
//! Each strategy turns the task list into a stream of results, one per
//! task, whatever happens to the task. The coordinator is blocking, so
//! every task runs on tokio's blocking pool via `spawn_blocking`; that is
//! also what gives each task its own thread for the duration of its
//! backend sessions.
//!
//! | Mode | Dispatch | Open contexts |
//! |------|----------|---------------|
//! | Sequential | one blocking worker walks the list | ≤ 1 |
//! | FullyParallel | `buffer_unordered(workers)` | ≤ workers |
//! | BoundedSequentialSubmit | `then`, one task awaited at a time | 1, within the `workers` cap |
//!
//! In bounded mode `workers` is only the cap the mode promises: submission
//! waits for each task, so the pool never holds more than one.

use crate::backend::ContextGauge;
use crate::config::ExecutionMode;
use crate::error::BackendError;
use crate::output::{BackendKind, ConversionResult, ConversionTask};
use crate::pipeline::coordinator::ConversionCoordinator;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// A boxed stream of per-task results.
pub type ResultStream = Pin<Box<dyn Stream<Item = ConversionResult> + Send>>;

/// Dispatch `tasks` according to `mode`.
///
/// The stream yields exactly one result per task and then ends.
pub fn execute(
    mode: ExecutionMode,
    workers: usize,
    coordinator: Arc<ConversionCoordinator>,
    tasks: Vec<ConversionTask>,
) -> ResultStream {
    let workers = workers.max(1);
    debug!("Dispatching {} task(s): mode={}, workers={}", tasks.len(), mode, workers);

    match mode {
        ExecutionMode::Sequential => sequential(coordinator, tasks),
        ExecutionMode::FullyParallel => {
            if workers > 1 && coordinator.registry().contains(BackendKind::Native) {
                warn!(
                    "Running up to {} office processes at once; use --mode bounded \
                     or --mode sequential if conversions fail",
                    workers
                );
            }
            fully_parallel(coordinator, tasks, workers)
        }
        ExecutionMode::BoundedSequentialSubmit => bounded(coordinator, tasks),
    }
}

/// A single blocking worker converts every task in order.
fn sequential(coordinator: Arc<ConversionCoordinator>, tasks: Vec<ConversionTask>) -> ResultStream {
    let (tx, rx) = mpsc::channel::<ConversionResult>(1);

    tokio::task::spawn_blocking(move || {
        for task in tasks {
            let result = coordinator.run_isolated(&task);
            if tx.blocking_send(result).is_err() {
                // Receiver dropped: nobody is listening any more.
                break;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Every task is submitted up front; at most `workers` run at once.
/// Results arrive in completion order.
fn fully_parallel(
    coordinator: Arc<ConversionCoordinator>,
    tasks: Vec<ConversionTask>,
    workers: usize,
) -> ResultStream {
    let stream = stream::iter(tasks)
        .map(move |task| spawn_task(Arc::clone(&coordinator), task))
        .buffer_unordered(workers);
    Box::pin(stream)
}

/// Tasks go to the blocking pool one at a time, and the submitter waits
/// for each before submitting the next.
fn bounded(coordinator: Arc<ConversionCoordinator>, tasks: Vec<ConversionTask>) -> ResultStream {
    let stream =
        stream::iter(tasks).then(move |task| spawn_task(Arc::clone(&coordinator), task));
    Box::pin(stream)
}

/// Run one task on the blocking pool and always come back with a result.
async fn spawn_task(coordinator: Arc<ConversionCoordinator>, task: ConversionTask) -> ConversionResult {
    let fallback = task.clone();
    let worker = Arc::clone(&coordinator);
    match tokio::task::spawn_blocking(move || worker.run_isolated(&task)).await {
        Ok(result) => result,
        Err(e) => coordinator.abort(
            fallback,
            BackendError::Panicked {
                detail: format!("worker task failed: {e}"),
            },
        ),
    }
}

/// Peak open contexts a mode is allowed to reach with `workers`.
pub fn context_bound(mode: ExecutionMode, workers: usize) -> usize {
    match mode {
        ExecutionMode::Sequential => 1,
        ExecutionMode::FullyParallel | ExecutionMode::BoundedSequentialSubmit => workers.max(1),
    }
}

/// `true` when `gauge` stayed within what `mode` permits.
pub fn within_bound(gauge: &ContextGauge, mode: ExecutionMode, workers: usize) -> bool {
    gauge.peak() <= context_bound(mode, workers)
}
