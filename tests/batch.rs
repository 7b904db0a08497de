//! Integration tests for pdfbatch.
//!
//! Every test runs a full batch against documents in a temporary directory,
//! with in-process fake backends standing in for the office suite and the
//! standalone converter. No external program is needed.

use pdfbatch::{
    convert_batch_with, BackendError, BackendKind, BackendRegistry, BackendSession,
    BatchConfig, BatchError, BatchProgressCallback, CancelFlag, ConversionBackend,
    ConversionResult, ExecutionMode, SessionContext, TaskStatus,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

// ── Fake backends ────────────────────────────────────────────────────────────

/// Writes a small PDF unless the source name contains one of `fail_on`
/// (error) or `panic_on` (panic).
struct FakeBackend {
    kind: BackendKind,
    fail_on: Vec<&'static str>,
    panic_on: Vec<&'static str>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl FakeBackend {
    fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            fail_on: Vec::new(),
            panic_on: Vec::new(),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing_on(mut self, names: &[&'static str]) -> Self {
        self.fail_on.extend_from_slice(names);
        self
    }

    fn panicking_on(mut self, names: &[&'static str]) -> Self {
        self.panic_on.extend_from_slice(names);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct FakeSession {
    fail_on: Vec<&'static str>,
    panic_on: Vec<&'static str>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    cancel: CancelFlag,
}

impl ConversionBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn open_session(&self, ctx: &SessionContext) -> Result<Box<dyn BackendSession>, BackendError> {
        Ok(Box::new(FakeSession {
            fail_on: self.fail_on.clone(),
            panic_on: self.panic_on.clone(),
            delay: self.delay,
            calls: Arc::clone(&self.calls),
            cancel: ctx.cancel.clone(),
        }))
    }
}

impl BackendSession for FakeSession {
    fn convert(&mut self, source: &Path, target: &Path) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if self.cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let name = source.file_name().unwrap().to_string_lossy().to_string();
        if self.panic_on.iter().any(|p| name.contains(p)) {
            panic!("fake backend crashed on {name}");
        }
        if self.fail_on.iter().any(|p| name.contains(p)) {
            return Err(BackendError::ExitFailure {
                code: Some(1),
                stderr: format!("cannot open {name}"),
            });
        }
        std::fs::write(target, b"%PDF-1.7 fake").map_err(|e| BackendError::Io {
            detail: e.to_string(),
        })
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

const NAMES: [&str; 5] = [
    "Anexo 9 001-2024 ALFA 900",
    "Anexo 9 002-2024 BETA 901",
    "Anexo 9 003-2024 GAMMA 902",
    "Anexo 9 004-2024 DELTA 903",
    "Anexo 9 005-2024 EPSILON 904",
];

/// A directory with the five documents above plus an unrelated file.
fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in NAMES {
        std::fs::write(dir.path().join(format!("{name}.docx")), b"PK\x03\x04").unwrap();
    }
    std::fs::write(dir.path().join("Anexo 8 ignored.docx"), b"PK").unwrap();
    dir
}

fn age(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(secs))
        .unwrap();
}

fn registry(backends: Vec<FakeBackend>) -> BackendRegistry {
    BackendRegistry::new(
        backends
            .into_iter()
            .map(|b| Arc::new(b) as Arc<dyn ConversionBackend>)
            .collect(),
    )
    .unwrap()
}

fn config(dir: &Path, mode: ExecutionMode, workers: usize) -> BatchConfig {
    BatchConfig::builder()
        .source_dir(dir)
        .mode(mode)
        .workers(workers)
        .build()
        .unwrap()
}

fn by_index(results: &[ConversionResult]) -> Vec<&ConversionResult> {
    let mut sorted: Vec<_> = results.iter().collect();
    sorted.sort_by_key(|r| r.task.index);
    sorted
}

// ── Batch outcomes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mixed_batch_statistics() {
    let dir = fixture();
    // GAMMA already has a fresh PDF.
    let gamma_src = dir.path().join(format!("{}.docx", NAMES[2]));
    age(&gamma_src, 120);
    std::fs::write(gamma_src.with_extension("pdf"), b"%PDF-old").unwrap();

    // ALFA fails on the office backend and falls back.
    let native = FakeBackend::new(BackendKind::Native).failing_on(&["ALFA"]);
    let library = FakeBackend::new(BackendKind::Library);
    let config = config(dir.path(), ExecutionMode::Sequential, 1);

    let report = convert_batch_with(&config, registry(vec![native, library]), CancelFlag::new())
        .await
        .unwrap();

    let s = &report.stats;
    assert_eq!(s.total, 5);
    assert_eq!(s.succeeded, 4);
    assert_eq!(s.skipped, 1);
    assert_eq!(s.failed, 0);
    assert!(s.is_consistent());
    assert_eq!(s.backend_usage.get(&BackendKind::Native), Some(&3));
    assert_eq!(s.backend_usage.get(&BackendKind::Library), Some(&1));
    assert_eq!(report.success_rate(), Some(1.0));
    assert!(report.recommendations().is_empty());

    let results = by_index(&report.results);
    assert_eq!(results[2].status, TaskStatus::Skipped);
    assert_eq!(
        std::fs::read(dir.path().join(format!("{}.pdf", NAMES[2]))).unwrap(),
        b"%PDF-old"
    );
    let alfa = results[0];
    assert_eq!(alfa.backend_used, Some(BackendKind::Library));
    assert_eq!(alfa.attempts.len(), 2);
    assert!(!alfa.attempts[0].success);
    assert!(alfa.attempts[1].success);
    for r in [results[1], results[3], results[4]] {
        assert_eq!(r.backend_used, Some(BackendKind::Native));
        assert_eq!(r.attempts.len(), 1);
    }
}

#[tokio::test]
async fn test_every_document_gets_exactly_one_result() {
    let dir = fixture();
    let native = FakeBackend::new(BackendKind::Native).failing_on(&["ALFA", "BETA"]);
    let config = config(dir.path(), ExecutionMode::BoundedSequentialSubmit, 2);

    let report = convert_batch_with(&config, registry(vec![native]), CancelFlag::new())
        .await
        .unwrap();

    let mut indices: Vec<usize> = report.results.iter().map(|r| r.task.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    assert_eq!(report.stats.failed, 2);
    assert_eq!(report.stats.succeeded, 3);
    assert!(!report.recommendations().is_empty());
    for r in report.failures() {
        assert!(!r.task.target.exists(), "failed task left a PDF behind");
        assert_eq!(r.errors().len(), 1);
    }
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = fixture();
    let config = config(dir.path(), ExecutionMode::Sequential, 1);

    let first = FakeBackend::new(BackendKind::Native);
    let report = convert_batch_with(&config, registry(vec![first]), CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(report.stats.succeeded, 5);

    // Make the first run's PDFs unambiguously newer than their sources.
    for name in NAMES {
        age(&dir.path().join(format!("{name}.docx")), 60);
    }

    let second = FakeBackend::new(BackendKind::Native);
    let calls = Arc::clone(&second.calls);
    let report = convert_batch_with(&config, registry(vec![second]), CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(report.stats.skipped, 5);
    assert_eq!(report.stats.succeeded, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.peak_open_contexts, 0);
}

#[tokio::test]
async fn test_missing_directory_is_a_discovery_error() {
    let config = BatchConfig::builder()
        .source_dir("/definitely/not/here")
        .build()
        .unwrap();
    let err = convert_batch_with(
        &config,
        registry(vec![FakeBackend::new(BackendKind::Native)]),
        CancelFlag::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BatchError::SourceDirNotFound { .. }));
    assert!(err.is_discovery());
}

#[tokio::test]
async fn test_no_matches_is_an_empty_batch() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), ExecutionMode::FullyParallel, 3);
    let report = convert_batch_with(
        &config,
        registry(vec![FakeBackend::new(BackendKind::Library)]),
        CancelFlag::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.stats.total, 0);
    assert!(report.results.is_empty());
    assert_eq!(report.success_rate(), None);
}

#[tokio::test]
async fn test_pdf_dir_receives_output() {
    let dir = fixture();
    let out = tempfile::tempdir().unwrap();
    let config = BatchConfig::builder()
        .source_dir(dir.path())
        .pdf_dir(out.path().join("pdf"))
        .mode(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let report = convert_batch_with(
        &config,
        registry(vec![FakeBackend::new(BackendKind::Native)]),
        CancelFlag::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.stats.succeeded, 5);
    for name in NAMES {
        assert!(out.path().join("pdf").join(format!("{name}.pdf")).is_file());
        assert!(!dir.path().join(format!("{name}.pdf")).exists());
    }
}

#[tokio::test]
async fn test_sibling_sources_never_share_a_pdf() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Anexo 9 X.doc"), b"\xD0\xCF").unwrap();
    std::fs::write(dir.path().join("Anexo 9 X.docx"), b"PK\x03\x04").unwrap();
    age(&dir.path().join("Anexo 9 X.doc"), 120);
    age(&dir.path().join("Anexo 9 X.docx"), 120);
    let config = BatchConfig::builder()
        .source_dir(dir.path())
        .pattern("Anexo 9*")
        .mode(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let report = convert_batch_with(
        &config,
        registry(vec![FakeBackend::new(BackendKind::Native)]),
        CancelFlag::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.stats.total, 1);
    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(report.stats.skipped, 0);
    assert!(report.results[0].task.source.ends_with("Anexo 9 X.doc"));

    // The PDF just produced is not picked up as a source on the next run.
    let rerun = convert_batch_with(
        &config,
        registry(vec![FakeBackend::new(BackendKind::Native)]),
        CancelFlag::new(),
    )
    .await
    .unwrap();
    assert_eq!(rerun.stats.total, 1);
    assert_eq!(rerun.stats.skipped, 1);
}

// ── Failure isolation ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_backend_does_not_stop_the_batch() {
    let dir = fixture();
    let native = FakeBackend::new(BackendKind::Native).panicking_on(&["BETA"]);
    let config = config(dir.path(), ExecutionMode::FullyParallel, 3);

    let report = convert_batch_with(&config, registry(vec![native]), CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.stats.total, 5);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.succeeded, 4);
    let beta = by_index(&report.results)[1];
    assert!(matches!(
        beta.errors()[0],
        BackendError::Panicked { detail } if detail.contains("BETA")
    ));
}

#[tokio::test]
async fn test_cancelled_batch_fails_remaining_tasks() {
    let dir = fixture();
    let cancel = CancelFlag::new();
    cancel.cancel();
    let native = FakeBackend::new(BackendKind::Native);
    let calls = Arc::clone(&native.calls);
    let config = config(dir.path(), ExecutionMode::BoundedSequentialSubmit, 2);

    let report = convert_batch_with(&config, registry(vec![native]), cancel)
        .await
        .unwrap();

    assert_eq!(report.stats.total, 5);
    assert_eq!(report.stats.failed, 5);
    assert!(report.stats.is_consistent());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(report
        .results
        .iter()
        .all(|r| r.task_error == Some(BackendError::Cancelled)));
}

// ── Execution strategies ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_contexts_stay_within_mode_bounds() {
    for (mode, workers, bound) in [
        (ExecutionMode::Sequential, 4, 1),
        (ExecutionMode::BoundedSequentialSubmit, 3, 3),
        (ExecutionMode::FullyParallel, 2, 2),
    ] {
        let dir = fixture();
        let native = FakeBackend::new(BackendKind::Native).slow(Duration::from_millis(30));
        let config = config(dir.path(), mode, workers);
        let report = convert_batch_with(&config, registry(vec![native]), CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.stats.succeeded, 5, "mode {mode}");
        assert!(
            report.peak_open_contexts >= 1 && report.peak_open_contexts <= bound,
            "mode {mode}: peak {} > {bound}",
            report.peak_open_contexts
        );
    }
}

#[tokio::test]
async fn test_sequential_results_in_submission_order() {
    let dir = fixture();
    let config = config(dir.path(), ExecutionMode::Sequential, 1);
    let report = convert_batch_with(
        &config,
        registry(vec![FakeBackend::new(BackendKind::Native)]),
        CancelFlag::new(),
    )
    .await
    .unwrap();
    let order: Vec<usize> = report.results.iter().map(|r| r.task.index).collect();
    assert_eq!(order, vec![1, 2, 3, 4, 5]);
}

// ── Replication ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mirror_receives_converted_and_skipped_pdfs() {
    let dir = fixture();
    let alfa_src = dir.path().join(format!("{}.docx", NAMES[0]));
    age(&alfa_src, 120);
    std::fs::write(alfa_src.with_extension("pdf"), b"%PDF-old").unwrap();

    let mirror = tempfile::tempdir().unwrap();
    let config = BatchConfig::builder()
        .source_dir(dir.path())
        .mirror_dir(mirror.path())
        .mode(ExecutionMode::Sequential)
        .build()
        .unwrap();
    let native = FakeBackend::new(BackendKind::Native).failing_on(&["EPSILON"]);

    let report = convert_batch_with(&config, registry(vec![native]), CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.stats.skipped, 1);
    assert_eq!(report.stats.succeeded, 3);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.replicated, 4);
    let mirrored: Vec<PathBuf> = std::fs::read_dir(mirror.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(mirrored.len(), 4);
    assert!(!mirror.path().join(format!("{}.pdf", NAMES[4])).exists());
}

#[tokio::test]
async fn test_mirror_into_pdf_directory_is_rejected() {
    let dir = fixture();
    let err = BatchConfig::builder()
        .source_dir(dir.path())
        .mirror_dir(dir.path())
        .build()
        .unwrap_err();
    assert!(matches!(err, BatchError::InvalidConfig(_)));

    // The sink itself refuses to copy a PDF onto itself.
    let pdf = dir.path().join(format!("{}.pdf", NAMES[0]));
    std::fs::write(&pdf, b"%PDF-1.7 kept").unwrap();
    let sink = pdfbatch::pipeline::replicate::MirrorSink::new(dir.path());
    assert!(sink.replicate(&pdf).is_err());
    assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-1.7 kept");
}

#[cfg(unix)]
#[tokio::test]
async fn test_mirror_failure_keeps_conversion_status() {
    let dir = fixture();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();
    let config = BatchConfig::builder()
        .source_dir(dir.path())
        .mirror_dir(blocker.join("mirror"))
        .mode(ExecutionMode::Sequential)
        .build()
        .unwrap();

    let report = convert_batch_with(
        &config,
        registry(vec![FakeBackend::new(BackendKind::Native)]),
        CancelFlag::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.stats.succeeded, 5);
    assert_eq!(report.stats.replicated, 0);
    assert!(report.results.iter().all(|r| r.replication_error.is_some()));
}

// ── Progress and journal ─────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    finished: Mutex<Vec<usize>>,
    backend_failures: AtomicUsize,
    completed: AtomicUsize,
}

impl BatchProgressCallback for Recorder {
    fn on_batch_start(&self, _total: usize, _mode: ExecutionMode, _workers: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_backend_failed(&self, _t: &pdfbatch::ConversionTask, _b: BackendKind, _e: &BackendError) {
        self.backend_failures.fetch_add(1, Ordering::SeqCst);
    }
    fn on_task_finished(&self, result: &ConversionResult, _total: usize) {
        self.finished.lock().unwrap().push(result.task.index);
    }
    fn on_batch_complete(&self, _stats: &pdfbatch::BatchStatistics) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callback_sees_each_task_once() {
    let dir = fixture();
    let recorder = Arc::new(Recorder::default());
    let config = BatchConfig::builder()
        .source_dir(dir.path())
        .mode(ExecutionMode::FullyParallel)
        .workers(3)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let native = FakeBackend::new(BackendKind::Native).failing_on(&["GAMMA"]);
    let library = FakeBackend::new(BackendKind::Library);

    convert_batch_with(&config, registry(vec![native, library]), CancelFlag::new())
        .await
        .unwrap();

    let mut finished = recorder.finished.lock().unwrap().clone();
    finished.sort_unstable();
    assert_eq!(finished, vec![1, 2, 3, 4, 5]);
    assert_eq!(recorder.started.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.backend_failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_journal_records_every_task() {
    let dir = fixture();
    let journal = dir.path().join("logs").join("run.jsonl");
    let config = BatchConfig::builder()
        .source_dir(dir.path())
        .journal_path(&journal)
        .mode(ExecutionMode::Sequential)
        .build()
        .unwrap();
    let native = FakeBackend::new(BackendKind::Native).failing_on(&["BETA"]);

    convert_batch_with(&config, registry(vec![native]), CancelFlag::new())
        .await
        .unwrap();

    let text = std::fs::read_to_string(&journal).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 5);
    let failed: Vec<_> = lines.iter().filter(|l| l["status"] == "failed").collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["attempts"][0]["error"]["kind"], "exit_failure");
}

#[test]
fn test_report_serialises_to_json() {
    let dir = fixture();
    let config = config(dir.path(), ExecutionMode::Sequential, 1);
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let report = runtime
        .block_on(convert_batch_with(
            &config,
            registry(vec![FakeBackend::new(BackendKind::Library)]),
            CancelFlag::new(),
        ))
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["stats"]["total"], 5);
    assert_eq!(json["stats"]["backend_usage"]["library"], 5);
    assert_eq!(json["mode"], "sequential");
}
