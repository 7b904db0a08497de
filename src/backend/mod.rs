//! Conversion backends: the interchangeable strategies that turn one source
//! document into one PDF.
//!
//! ## Sessions are thread-confined
//!
//! A backend is shared by every worker, but the state it needs to convert a
//! document lives in a [`BackendSession`]. Sessions are opened on the worker
//! thread that uses them and are deliberately not `Send`: the office suite
//! keeps its automation state in a per-process user profile, and handing a
//! live profile to another thread (or another concurrent task) is exactly
//! how the suite ends up corrupting its own lock files. One task, one
//! session, one private profile directory, released when the session drops.
//!
//! ## Variants
//!
//! | Kind | Type | Drives |
//! |------|------|--------|
//! | [`BackendKind::Native`] | [`office::OfficeBackend`] | `soffice --headless --convert-to pdf` |
//! | [`BackendKind::Library`] | [`library::LibraryBackend`] | a standalone converter such as `docx2pdf` |
//!
//! Both run inside a [`SessionWorkspace`] and deliver the PDF to its final
//! path with a temp-file-then-rename, so a killed converter never leaves a
//! truncated PDF behind.

pub mod library;
pub mod office;
mod process;

use crate::config::{BackendPlan, BatchConfig};
use crate::error::{BackendError, BatchError};
use crate::output::BackendKind;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use library::LibraryBackend;
pub use office::OfficeBackend;

// ── Traits ───────────────────────────────────────────────────────────────

/// A conversion strategy shared by all workers of a batch.
pub trait ConversionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Open a private conversion context on the calling thread.
    ///
    /// Called once per attempt. The returned session must be used and
    /// dropped on the same thread.
    fn open_session(&self, ctx: &SessionContext) -> Result<Box<dyn BackendSession>, BackendError>;
}

/// A per-task conversion context. Not `Send`.
pub trait BackendSession {
    /// Convert `source` into a PDF at `target`.
    ///
    /// On `Ok(())` the file at `target` is complete. On error `target` is
    /// left as it was before the call.
    fn convert(&mut self, source: &Path, target: &Path) -> Result<(), BackendError>;
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Batch-wide cancellation flag, set once on Ctrl-C and never cleared.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a session needs from the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Watchdog for one `convert` call. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub cancel: CancelFlag,
}

impl SessionContext {
    pub fn new(timeout_secs: Option<u64>, cancel: CancelFlag) -> Self {
        Self {
            timeout: timeout_secs.map(Duration::from_secs),
            cancel,
        }
    }
}

// ── Context accounting ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GaugeInner {
    open: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts open backend sessions and remembers the high-water mark.
#[derive(Debug, Clone, Default)]
pub struct ContextGauge(Arc<GaugeInner>);

impl ContextGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open session until the returned lease drops.
    pub fn enter(&self) -> ContextLease {
        let now = self.0.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(now, Ordering::SeqCst);
        ContextLease(self.clone())
    }

    pub fn open(&self) -> usize {
        self.0.open.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.0.peak.load(Ordering::SeqCst)
    }
}

/// RAII guard returned by [`ContextGauge::enter`].
#[derive(Debug)]
pub struct ContextLease(ContextGauge);

impl Drop for ContextLease {
    fn drop(&mut self) {
        (self.0).0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Ordered list of available backends; the order is the fallback order.
#[derive(Clone)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn ConversionBackend>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

impl BackendRegistry {
    /// Build a registry from explicit backends, tried in the given order.
    ///
    /// An empty list is rejected: a batch with nothing to convert with
    /// must fail before any task runs.
    pub fn new(backends: Vec<Arc<dyn ConversionBackend>>) -> Result<Self, BatchError> {
        if backends.is_empty() {
            return Err(BatchError::BackendUnavailable {
                plan: "custom".into(),
                hint: "The registry was given no backends.".into(),
            });
        }
        Ok(Self { backends })
    }

    /// Probe the system for the backends named by `config.backend_plan`.
    ///
    /// Backends that cannot be found are logged and left out; the call only
    /// fails when none remain.
    pub fn detect(config: &BatchConfig) -> Result<Self, BatchError> {
        let mut backends: Vec<Arc<dyn ConversionBackend>> = Vec::new();
        let mut misses: Vec<String> = Vec::new();

        for kind in plan_order(config.backend_plan) {
            match *kind {
                BackendKind::Native => match OfficeBackend::detect(config.office_program.as_deref()) {
                    Ok(b) => {
                        debug!("Native backend: {}", b.program().display());
                        backends.push(Arc::new(b));
                    }
                    Err(e) => {
                        warn!("Native backend unavailable: {}", e);
                        misses.push(e.to_string());
                    }
                },
                BackendKind::Library => {
                    match LibraryBackend::detect(
                        config.library_program.as_deref(),
                        config.library_args.clone(),
                    ) {
                        Ok(b) => {
                            debug!("Library backend: {}", b.program().display());
                            backends.push(Arc::new(b));
                        }
                        Err(e) => {
                            warn!("Library backend unavailable: {}", e);
                            misses.push(e.to_string());
                        }
                    }
                }
            }
        }

        if backends.is_empty() {
            return Err(BatchError::BackendUnavailable {
                plan: config.backend_plan.to_string(),
                hint: misses.join("\n"),
            });
        }

        let registry = Self { backends };
        info!("Backends in fallback order: {:?}", registry.kinds());
        Ok(registry)
    }

    pub fn backends(&self) -> &[Arc<dyn ConversionBackend>] {
        &self.backends
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.backends.iter().any(|b| b.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Backend kinds for a plan, in fallback order.
pub fn plan_order(plan: BackendPlan) -> &'static [BackendKind] {
    match plan {
        BackendPlan::NativeFirst => &[BackendKind::Native, BackendKind::Library],
        BackendPlan::LibraryFirst => &[BackendKind::Library, BackendKind::Native],
        BackendPlan::NativeOnly => &[BackendKind::Native],
        BackendPlan::LibraryOnly => &[BackendKind::Library],
    }
}

// ── Session workspace ────────────────────────────────────────────────────

/// Scratch directory owned by one session: a private office profile, a
/// staging directory for converter output, and converter logs.
///
/// Removed from disk when dropped.
#[derive(Debug)]
pub struct SessionWorkspace {
    root: tempfile::TempDir,
}

impl SessionWorkspace {
    pub fn create() -> Result<Self, BackendError> {
        let root = tempfile::Builder::new()
            .prefix("pdfbatch-")
            .tempdir()
            .map_err(|e| BackendError::io("creating session directory", e))?;
        for sub in ["profile", "out", "logs"] {
            std::fs::create_dir(root.path().join(sub))
                .map_err(|e| BackendError::io("creating session directory", e))?;
        }
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Private user-installation directory for the office suite.
    pub fn profile_dir(&self) -> PathBuf {
        self.root.path().join("profile")
    }

    /// Where converters write before delivery.
    pub fn out_dir(&self) -> PathBuf {
        self.root.path().join("out")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.path().join("logs")
    }

    /// Move a staged PDF to `target` atomically.
    ///
    /// The copy lands in a sibling temp file first, so readers of `target`
    /// only ever see the previous PDF or the complete new one.
    pub fn deliver(&self, staged: &Path, target: &Path) -> Result<(), BackendError> {
        if !staged.is_file() {
            return Err(BackendError::MissingOutput {
                path: staged.to_path_buf(),
            });
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackendError::io("creating PDF directory", e))?;
        }
        let tmp_path = target.with_extension("pdf.tmp");
        std::fs::copy(staged, &tmp_path).map_err(|e| BackendError::io("staging PDF", e))?;
        std::fs::rename(&tmp_path, target).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            BackendError::io("moving PDF into place", e)
        })?;
        Ok(())
    }
}

/// Staged output name: the source stem with a `.pdf` extension.
pub(crate) fn staged_name(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "output".into());
    let mut name = PathBuf::from(stem);
    name.set_extension("pdf");
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(BackendKind);

    impl ConversionBackend for Named {
        fn kind(&self) -> BackendKind {
            self.0
        }
        fn open_session(&self, _ctx: &SessionContext) -> Result<Box<dyn BackendSession>, BackendError> {
            Err(BackendError::Cancelled)
        }
    }

    #[test]
    fn empty_registry_is_rejected() {
        let err = BackendRegistry::new(Vec::new()).unwrap_err();
        assert!(matches!(err, BatchError::BackendUnavailable { .. }));
    }

    #[test]
    fn registry_keeps_order() {
        let reg = BackendRegistry::new(vec![
            Arc::new(Named(BackendKind::Library)),
            Arc::new(Named(BackendKind::Native)),
        ])
        .unwrap();
        assert_eq!(reg.kinds(), vec![BackendKind::Library, BackendKind::Native]);
        assert!(reg.contains(BackendKind::Native));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn plan_orders() {
        assert_eq!(
            plan_order(BackendPlan::NativeFirst),
            &[BackendKind::Native, BackendKind::Library]
        );
        assert_eq!(plan_order(BackendPlan::LibraryOnly), &[BackendKind::Library]);
    }

    #[test]
    fn detect_with_missing_programs_fails() {
        let config = BatchConfig::builder()
            .backend_plan(BackendPlan::NativeOnly)
            .office_program("/definitely/not/soffice")
            .build()
            .unwrap();
        let err = BackendRegistry::detect(&config).unwrap_err();
        match err {
            BatchError::BackendUnavailable { plan, .. } => assert_eq!(plan, "native-only"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn gauge_tracks_peak() {
        let gauge = ContextGauge::new();
        {
            let _a = gauge.enter();
            let _b = gauge.enter();
            assert_eq!(gauge.open(), 2);
        }
        let _c = gauge.enter();
        assert_eq!(gauge.open(), 1);
        assert_eq!(gauge.peak(), 2);
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let ws = SessionWorkspace::create().unwrap();
        let root = ws.path().to_path_buf();
        assert!(ws.profile_dir().is_dir());
        assert!(ws.out_dir().is_dir());
        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn deliver_replaces_target_atomically() {
        let ws = SessionWorkspace::create().unwrap();
        let staged = ws.out_dir().join("a.pdf");
        std::fs::write(&staged, b"%PDF-new").unwrap();

        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("nested").join("a.pdf");
        ws.deliver(&staged, &target).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-new");
        assert!(!target.with_extension("pdf.tmp").exists());
    }

    #[test]
    fn deliver_without_staged_file_is_missing_output() {
        let ws = SessionWorkspace::create().unwrap();
        let err = ws
            .deliver(&ws.out_dir().join("none.pdf"), Path::new("/tmp/none.pdf"))
            .unwrap_err();
        assert!(matches!(err, BackendError::MissingOutput { .. }));
    }

    #[test]
    fn staged_name_uses_stem() {
        assert_eq!(
            staged_name(Path::new("/in/Anexo 9 A.docx")),
            PathBuf::from("Anexo 9 A.pdf")
        );
    }
}
