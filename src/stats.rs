//! Batch statistics, owned by a single aggregator task.
//!
//! Results reach the aggregator over a channel, so no counter is ever
//! shared between workers. When a journal is configured the aggregator also
//! appends one JSON line per finished task, stamped with the wall-clock
//! time it was recorded.

use crate::error::BatchError;
use crate::output::{BatchStatistics, ConversionResult, TaskStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Add one finished task to `stats`.
pub fn apply(stats: &mut BatchStatistics, result: &ConversionResult) {
    stats.total += 1;
    match result.status {
        TaskStatus::Succeeded => {
            stats.succeeded += 1;
            if let Some(backend) = result.backend_used {
                *stats.backend_usage.entry(backend).or_insert(0) += 1;
            }
        }
        TaskStatus::Failed => stats.failed += 1,
        TaskStatus::Skipped => stats.skipped += 1,
    }
    if result.replicated {
        stats.replicated += 1;
    }
}

/// Statistics for an already-collected set of results.
pub fn tally<'a>(results: impl IntoIterator<Item = &'a ConversionResult>) -> BatchStatistics {
    let mut stats = BatchStatistics::default();
    for r in results {
        apply(&mut stats, r);
    }
    stats
}

// ── Journal ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JournalLine<'a> {
    recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    result: &'a ConversionResult,
}

/// Append-only JSON Lines log of finished tasks.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open `path` for appending, creating it and its parent directory.
    pub async fn open(path: &Path) -> Result<Self, BatchError> {
        let fail = |source| BatchError::JournalWriteFailed {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(fail)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub async fn append(&mut self, result: &ConversionResult) -> Result<(), BatchError> {
        let line = JournalLine {
            recorded_at: Utc::now(),
            result,
        };
        let mut bytes = serde_json::to_vec(&line)
            .map_err(|e| BatchError::Internal(format!("journal encoding: {e}")))?;
        bytes.push(b'\n');
        self.file
            .write_all(&bytes)
            .await
            .map_err(|source| BatchError::JournalWriteFailed {
                path: self.path.clone(),
                source,
            })
    }

    async fn flush(&mut self) {
        if let Err(e) = self.file.flush().await {
            warn!("Failed to flush journal {}: {}", self.path.display(), e);
        }
    }
}

// ── Aggregator ───────────────────────────────────────────────────────────

/// What the aggregator hands back when the batch is over.
#[derive(Debug)]
pub struct Aggregate {
    pub stats: BatchStatistics,
    pub results: Vec<ConversionResult>,
}

/// Handle to the aggregator task.
pub struct StatsAggregator {
    tx: mpsc::UnboundedSender<ConversionResult>,
    handle: JoinHandle<Aggregate>,
}

impl StatsAggregator {
    pub fn spawn(journal: Option<Journal>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ConversionResult>();
        let handle = tokio::spawn(async move {
            let mut journal = journal;
            let mut aggregate = Aggregate {
                stats: BatchStatistics::default(),
                results: Vec::new(),
            };
            while let Some(result) = rx.recv().await {
                apply(&mut aggregate.stats, &result);
                if let Some(j) = journal.as_mut() {
                    // A journal that stops accepting writes is not worth losing the batch over.
                    if let Err(e) = j.append(&result).await {
                        warn!("{}; journal disabled for the rest of the batch", e);
                        journal = None;
                    }
                }
                aggregate.results.push(result);
            }
            if let Some(j) = journal.as_mut() {
                j.flush().await;
            }
            aggregate
        });
        Self { tx, handle }
    }

    pub fn record(&self, result: ConversionResult) {
        // Only fails if the aggregator task died, which `finish` reports.
        let _ = self.tx.send(result);
    }

    /// Close the channel and wait for the final tally.
    pub async fn finish(self) -> Result<Aggregate, BatchError> {
        drop(self.tx);
        self.handle
            .await
            .map_err(|e| BatchError::Internal(format!("stats aggregator failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::output::{BackendKind, ConversionTask};

    fn result(index: usize, status: TaskStatus, backend: Option<BackendKind>) -> ConversionResult {
        let task = ConversionTask {
            index,
            source: PathBuf::from(format!("/in/{index}.docx")),
            target: PathBuf::from(format!("/in/{index}.pdf")),
        };
        let mut r = ConversionResult::new(task, status);
        r.backend_used = backend;
        r
    }

    #[test]
    fn tally_counts_each_status_once() {
        let results = vec![
            result(1, TaskStatus::Succeeded, Some(BackendKind::Native)),
            result(2, TaskStatus::Succeeded, Some(BackendKind::Native)),
            result(3, TaskStatus::Succeeded, Some(BackendKind::Library)),
            result(4, TaskStatus::Skipped, None),
            result(5, TaskStatus::Failed, None),
        ];
        let stats = tally(&results);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.is_consistent());
        assert_eq!(stats.backend_usage.get(&BackendKind::Native), Some(&2));
        assert_eq!(stats.backend_usage.get(&BackendKind::Library), Some(&1));
    }

    #[test]
    fn replicated_is_counted_independently() {
        let mut r = result(1, TaskStatus::Skipped, None);
        r.replicated = true;
        let stats = tally([&r]);
        assert_eq!(stats.replicated, 1);
        assert!(stats.backend_usage.is_empty());
    }

    #[tokio::test]
    async fn aggregator_collects_everything() {
        let agg = StatsAggregator::spawn(None);
        for i in 1..=3 {
            agg.record(result(i, TaskStatus::Succeeded, Some(BackendKind::Native)));
        }
        let out = agg.finish().await.unwrap();
        assert_eq!(out.stats.total, 3);
        assert_eq!(out.results.len(), 3);
    }

    #[tokio::test]
    async fn journal_has_one_line_per_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("batch.jsonl");
        let journal = Journal::open(&path).await.unwrap();

        let agg = StatsAggregator::spawn(Some(journal));
        agg.record(result(1, TaskStatus::Succeeded, Some(BackendKind::Library)));
        agg.record(ConversionResult::aborted(
            result(2, TaskStatus::Failed, None).task,
            BackendError::Cancelled,
        ));
        agg.finish().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["status"], "succeeded");
        assert_eq!(lines[0]["backend_used"], "library");
        assert!(lines[0]["recorded_at"].as_str().unwrap().contains('T'));
        assert_eq!(lines[1]["task_error"]["kind"], "cancelled");
    }

    #[tokio::test]
    async fn journal_appends_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.jsonl");
        for i in 1..=2 {
            let mut j = Journal::open(&path).await.unwrap();
            j.append(&result(i, TaskStatus::Skipped, None)).await.unwrap();
            j.flush().await;
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn unopenable_journal_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Journal::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, BatchError::JournalWriteFailed { .. }));
    }
}
