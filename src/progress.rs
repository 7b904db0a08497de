//! Per-task progress events and the single writer that serialises them.
//!
//! Workers never print. Every diagnostic a task produces is sent as a
//! [`ProgressEvent`] over one channel; a single writer task drains it, logs
//! each event through `tracing` and forwards it to the configured
//! [`BatchProgressCallback`]. Lines from concurrent tasks therefore never
//! interleave, whatever the execution mode.
//!
//! # Example
//!
//! ```rust
//! use pdfbatch::{BatchConfig, BatchProgressCallback, ConversionResult};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_task_finished(&self, result: &ConversionResult, total: usize) {
//!         let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total}: {} {}", result.task.name(), result.status);
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { finished: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::config::ExecutionMode;
use crate::error::BackendError;
use crate::output::{BackendKind, BatchStatistics, ConversionResult, ConversionTask};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives batch events, always from the single writer task.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Because one task delivers every event, an
/// implementation may write to a terminal without its own locking.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first task is dispatched.
    fn on_batch_start(&self, total: usize, mode: ExecutionMode, workers: usize) {
        let _ = (total, mode, workers);
    }

    /// Called when a task leaves the queue.
    fn on_task_start(&self, task: &ConversionTask, total: usize) {
        let _ = (task, total);
    }

    /// Called for every backend attempt that failed, including ones later
    /// rescued by a fallback backend.
    fn on_backend_failed(&self, task: &ConversionTask, backend: BackendKind, error: &BackendError) {
        let _ = (task, backend, error);
    }

    /// Called once per task with its terminal result.
    fn on_task_finished(&self, result: &ConversionResult, total: usize) {
        let _ = (result, total);
    }

    /// Called when the mirror copy fails. The task keeps its status.
    fn on_replication_failed(&self, task: &ConversionTask, error: &str) {
        let _ = (task, error);
    }

    /// Called once after every task has finished.
    fn on_batch_complete(&self, stats: &BatchStatistics) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that only want the final report.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

/// Everything a task or the orchestrator can report while the batch runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    BatchStarted {
        total: usize,
        mode: ExecutionMode,
        workers: usize,
    },
    TaskStarted {
        task: ConversionTask,
    },
    BackendFailed {
        task: ConversionTask,
        backend: BackendKind,
        error: BackendError,
    },
    Replicated {
        task: ConversionTask,
        destination: PathBuf,
    },
    ReplicationFailed {
        task: ConversionTask,
        error: String,
    },
    TaskFinished {
        result: Box<ConversionResult>,
    },
    /// Last event; the writer exits after delivering it.
    BatchFinished {
        stats: BatchStatistics,
    },
}

/// Cloneable handle used by workers to report events.
///
/// Sending never blocks, so it is safe from blocking worker threads.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    pub fn send(&self, event: ProgressEvent) {
        // The writer only goes away after BatchFinished; late events are dropped.
        let _ = self.tx.send(event);
    }

    /// A sender whose events go nowhere, for driving a coordinator directly.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Start the single writer task.
///
/// `total` is the batch size, passed through to per-task callbacks.
pub fn spawn_writer(
    callback: Option<ProgressCallback>,
    total: usize,
) -> (ProgressSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let callback = callback.unwrap_or_else(|| Arc::new(NoopProgressCallback));

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let last = matches!(event, ProgressEvent::BatchFinished { .. });
            deliver(callback.as_ref(), &event, total);
            if last {
                break;
            }
        }
    });

    (ProgressSender { tx }, handle)
}

fn deliver(cb: &dyn BatchProgressCallback, event: &ProgressEvent, total: usize) {
    match event {
        ProgressEvent::BatchStarted {
            total,
            mode,
            workers,
        } => {
            info!(total, %mode, workers, "Starting batch conversion");
            cb.on_batch_start(*total, *mode, *workers);
        }
        ProgressEvent::TaskStarted { task } => {
            debug!("[{}/{}] Converting {}", task.index, total, task.name());
            cb.on_task_start(task, total);
        }
        ProgressEvent::BackendFailed {
            task,
            backend,
            error,
        } => {
            warn!("[{}] {} backend failed: {}", task.index, backend, error);
            cb.on_backend_failed(task, *backend, error);
        }
        ProgressEvent::Replicated { task, destination } => {
            debug!("[{}] Copied to mirror: {}", task.index, destination.display());
        }
        ProgressEvent::ReplicationFailed { task, error } => {
            warn!("[{}] Mirror copy failed: {}", task.index, error);
            cb.on_replication_failed(task, error);
        }
        ProgressEvent::TaskFinished { result } => {
            match result.backend_used {
                Some(backend) => info!(
                    "[{}/{}] {} {} via {}",
                    result.task.index,
                    total,
                    result.status,
                    result.task.name(),
                    backend
                ),
                None => info!(
                    "[{}/{}] {} {}",
                    result.task.index,
                    total,
                    result.status,
                    result.task.name()
                ),
            }
            cb.on_task_finished(result, total);
        }
        ProgressEvent::BatchFinished { stats } => {
            info!(
                total = stats.total,
                succeeded = stats.succeeded,
                failed = stats.failed,
                skipped = stats.skipped,
                replicated = stats.replicated,
                "Batch complete"
            );
            cb.on_batch_complete(stats);
        }
    }
}
