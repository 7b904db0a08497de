//! Configuration types for a batch conversion run.
//!
//! Every knob lives in [`BatchConfig`], built via [`BatchConfigBuilder`] and
//! validated once in [`BatchConfigBuilder::build`]. The orchestrator never
//! asks the operator anything after that point.

use crate::error::BatchError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Upper bound on the worker count. More concurrent office processes than
/// this make the automation layer unreliable.
pub const MAX_WORKERS: usize = 6;

/// Default file-name pattern for source documents.
pub const DEFAULT_PATTERN: &str = "Anexo 9*.docx";

/// Placeholder replaced by the source path in [`BatchConfig::library_args`].
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Placeholder replaced by the PDF path in [`BatchConfig::library_args`].
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Configuration for one batch run.
///
/// # Example
/// ```rust
/// use pdfbatch::{BatchConfig, ExecutionMode};
///
/// let config = BatchConfig::builder()
///     .source_dir("/srv/salidas")
///     .mode(ExecutionMode::FullyParallel)
///     .workers(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 4);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Directory scanned for source documents. Default: `.`.
    pub source_dir: PathBuf,

    /// File-name glob, matched case-insensitively. Default: `Anexo 9*.docx`.
    pub pattern: String,

    /// Where PDFs are written. `None` writes each PDF next to its source.
    pub pdf_dir: Option<PathBuf>,

    /// How tasks are dispatched. Default: [`ExecutionMode::BoundedSequentialSubmit`].
    pub mode: ExecutionMode,

    /// Worker pool size, 1–[`MAX_WORKERS`]. Default: 2.
    pub workers: usize,

    /// Which backends are registered, and in what order. Default: [`BackendPlan::NativeFirst`].
    pub backend_plan: BackendPlan,

    /// Mirror directory receiving a copy of every produced PDF. `None` disables replication.
    pub mirror_dir: Option<PathBuf>,

    /// Watchdog for a single backend attempt, in seconds. Default: 300.
    ///
    /// An office process can hang forever on a broken document; when the
    /// watchdog fires the process is killed and the next backend is tried.
    /// `None` waits indefinitely.
    pub task_timeout_secs: Option<u64>,

    /// Append one JSON line per finished task to this file.
    pub journal_path: Option<PathBuf>,

    /// Explicit office executable. `None` probes the system.
    pub office_program: Option<PathBuf>,

    /// Explicit standalone converter executable. `None` probes the system.
    pub library_program: Option<PathBuf>,

    /// Argument template for the standalone converter. Default: `["{input}", "{output}"]`.
    pub library_args: Vec<String>,

    /// Observer for per-task events. Called from a single writer task.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            pattern: DEFAULT_PATTERN.to_string(),
            pdf_dir: None,
            mode: ExecutionMode::default(),
            workers: 2,
            backend_plan: BackendPlan::default(),
            mirror_dir: None,
            task_timeout_secs: Some(300),
            journal_path: None,
            office_program: None,
            library_program: None,
            library_args: vec![INPUT_PLACEHOLDER.to_string(), OUTPUT_PLACEHOLDER.to_string()],
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("source_dir", &self.source_dir)
            .field("pattern", &self.pattern)
            .field("pdf_dir", &self.pdf_dir)
            .field("mode", &self.mode)
            .field("workers", &self.workers)
            .field("backend_plan", &self.backend_plan)
            .field("mirror_dir", &self.mirror_dir)
            .field("task_timeout_secs", &self.task_timeout_secs)
            .field("journal_path", &self.journal_path)
            .field("office_program", &self.office_program)
            .field("library_program", &self.library_program)
            .field("library_args", &self.library_args)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// `true` when produced PDFs are copied to a mirror directory.
    pub fn replicates(&self) -> bool {
        self.mirror_dir.is_some()
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.source_dir = dir.into();
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.pattern = pattern.into();
        self
    }

    pub fn pdf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdf_dir = Some(dir.into());
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.clamp(1, MAX_WORKERS);
        self
    }

    pub fn backend_plan(mut self, plan: BackendPlan) -> Self {
        self.config.backend_plan = plan;
        self
    }

    pub fn mirror_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.mirror_dir = Some(dir.into());
        self
    }

    pub fn task_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.task_timeout_secs = secs.filter(|s| *s > 0);
        self
    }

    pub fn journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.journal_path = Some(path.into());
        self
    }

    pub fn office_program(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.office_program = Some(path.into());
        self
    }

    pub fn library_program(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.library_program = Some(path.into());
        self
    }

    pub fn library_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.library_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.pattern.trim().is_empty() {
            return Err(BatchError::InvalidConfig("pattern must not be empty".into()));
        }
        if let Err(e) = glob::Pattern::new(&c.pattern) {
            return Err(BatchError::InvalidConfig(format!(
                "invalid pattern '{}': {}",
                c.pattern, e
            )));
        }
        if c.workers == 0 || c.workers > MAX_WORKERS {
            return Err(BatchError::InvalidConfig(format!(
                "workers must be 1–{MAX_WORKERS}, got {}",
                c.workers
            )));
        }
        if !c.library_args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER)) {
            return Err(BatchError::InvalidConfig(format!(
                "library_args must contain {OUTPUT_PLACEHOLDER}"
            )));
        }
        if let Some(mirror) = &c.mirror_dir {
            let pdf_dir = c.pdf_dir.as_ref().unwrap_or(&c.source_dir);
            if resolve(mirror) == resolve(pdf_dir) {
                return Err(BatchError::InvalidConfig(format!(
                    "mirror_dir '{}' is the directory the PDFs are written to",
                    mirror.display()
                )));
            }
        }
        Ok(self.config)
    }
}

/// Canonical form when the directory exists, else the absolute form.
fn resolve(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir)
        .or_else(|_| std::path::absolute(dir))
        .unwrap_or_else(|_| dir.to_path_buf())
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How tasks are dispatched to the coordinator.
///
/// | Mode | Concurrency | Result order |
/// |------|-------------|--------------|
/// | `Sequential` | one task, one context | submission |
/// | `FullyParallel` | up to `workers` tasks | completion |
/// | `BoundedSequentialSubmit` | one task in flight, pool of `workers` | submission |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// A single worker walks the list. Safest with the native backend.
    Sequential,
    /// Every task is submitted at once to a pool of `workers`.
    /// Meant for the library backend; concurrent office processes are unreliable.
    FullyParallel,
    /// Tasks go to the pool one at a time; the submitter waits for each. (default)
    #[default]
    BoundedSequentialSubmit,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::FullyParallel => "fully-parallel",
            ExecutionMode::BoundedSequentialSubmit => "bounded",
        })
    }
}

/// Which backends the registry contains, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPlan {
    /// Office application first, standalone converter as fallback. (default)
    #[default]
    NativeFirst,
    /// Standalone converter first, office application as fallback.
    LibraryFirst,
    NativeOnly,
    LibraryOnly,
}

impl fmt::Display for BackendPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendPlan::NativeFirst => "native-first",
            BackendPlan::LibraryFirst => "library-first",
            BackendPlan::NativeOnly => "native-only",
            BackendPlan::LibraryOnly => "library-only",
        })
    }
}
