//! Batch-scoped data model: tasks, per-attempt outcomes, per-task results
//! and the aggregate report.
//!
//! Nothing here outlives one orchestrator run. Every type is `Serialize` so
//! results can be journalled line by line and the final report printed as
//! JSON.

use crate::config::ExecutionMode;
use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Identifies a conversion backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Headless office application driven as an external process.
    Native,
    /// Standalone converter routine sharing the office automation layer.
    Library,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Library => "library",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One source-document-to-PDF unit of work. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionTask {
    /// 1-based ordinal within the batch.
    pub index: usize,
    /// The word-processor document.
    pub source: PathBuf,
    /// Same stem as `source`, `.pdf` extension.
    pub target: PathBuf,
}

impl ConversionTask {
    /// File name of the source, for diagnostics.
    pub fn name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// The result of a single backend attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOutcome {
    pub backend: BackendKind,
    pub success: bool,
    pub error: Option<BackendError>,
    pub duration_ms: u64,
}

/// Terminal status of a task. Exactly one per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The PDF was already newer than its source; no backend ran.
    Skipped,
    Succeeded,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Skipped => "skipped",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        })
    }
}

/// Everything known about one task once it has finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub task: ConversionTask,
    pub status: TaskStatus,
    /// Set iff `status == Succeeded`.
    pub backend_used: Option<BackendKind>,
    /// Every backend attempt, in the order tried.
    pub attempts: Vec<BackendOutcome>,
    /// `true` when the PDF was copied to the mirror directory.
    pub replicated: bool,
    pub mirror_path: Option<PathBuf>,
    pub replication_error: Option<String>,
    /// Failure not tied to a backend attempt (cancellation, panic).
    pub task_error: Option<BackendError>,
    pub duration_ms: u64,
}

impl ConversionResult {
    pub(crate) fn new(task: ConversionTask, status: TaskStatus) -> Self {
        Self {
            task,
            status,
            backend_used: None,
            attempts: Vec::new(),
            replicated: false,
            mirror_path: None,
            replication_error: None,
            task_error: None,
            duration_ms: 0,
        }
    }

    /// A failed result for a task that never reached a backend.
    pub(crate) fn aborted(task: ConversionTask, error: BackendError) -> Self {
        let mut result = Self::new(task, TaskStatus::Failed);
        result.task_error = Some(error);
        result
    }

    /// Errors from every failed attempt in order, then any task-level error.
    pub fn errors(&self) -> Vec<&BackendError> {
        self.attempts
            .iter()
            .filter_map(|a| a.error.as_ref())
            .chain(self.task_error.as_ref())
            .collect()
    }

    /// `true` when the PDF exists on disk as a result of this run or an earlier one.
    pub fn has_pdf(&self) -> bool {
        matches!(self.status, TaskStatus::Succeeded | TaskStatus::Skipped)
    }
}

/// Aggregate counters for one batch.
///
/// Only the stats aggregator writes to this; once the batch completes
/// `total == succeeded + failed + skipped`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub replicated: usize,
    /// Successful conversions attributed to each backend.
    pub backend_usage: BTreeMap<BackendKind, usize>,
}

impl BatchStatistics {
    /// `true` when every counted task has exactly one terminal status.
    pub fn is_consistent(&self) -> bool {
        self.total == self.succeeded + self.failed + self.skipped
    }
}

/// Final report returned by [`crate::convert::convert_batch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub stats: BatchStatistics,
    /// One entry per task, in the order the strategy reported them.
    pub results: Vec<ConversionResult>,
    pub mode: ExecutionMode,
    pub workers: usize,
    pub elapsed_ms: u64,
    /// Highest number of backend contexts open at the same time.
    pub peak_open_contexts: usize,
}

impl BatchReport {
    /// `(succeeded + skipped) / total`, or `None` for an empty batch.
    pub fn success_rate(&self) -> Option<f64> {
        if self.stats.total == 0 {
            return None;
        }
        Some((self.stats.succeeded + self.stats.skipped) as f64 / self.stats.total as f64)
    }

    /// Documents per minute over the whole batch, or `None` when no time elapsed.
    pub fn throughput_per_minute(&self) -> Option<f64> {
        if self.elapsed_ms == 0 {
            return None;
        }
        Some(self.stats.total as f64 / (self.elapsed_ms as f64 / 60_000.0))
    }

    /// Operator hints printed after a batch with failures.
    pub fn recommendations(&self) -> Vec<&'static str> {
        if self.stats.failed == 0 {
            return Vec::new();
        }
        let mut out = Vec::new();
        if self.workers > 1 || self.mode == ExecutionMode::FullyParallel {
            out.push("Retry with a single worker (--mode sequential or --workers 1)");
        }
        out.push("Check that the failed documents open correctly and are not corrupt");
        out.push("Close every running office instance before retrying");
        out.push("Restart the machine if automation errors persist");
        out
    }

    /// Results that ended `Failed`.
    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter().filter(|r| r.status == TaskStatus::Failed)
    }
}
