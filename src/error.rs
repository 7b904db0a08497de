//! Error types for the pdfbatch library.
//!
//! Three error types reflect three failure scopes:
//!
//! * [`BatchError`]: **Fatal**: the batch cannot start at all (source
//!   directory missing, no backend available, bad configuration). Returned as
//!   `Err(BatchError)` from the top-level `convert_batch*` functions before any
//!   task runs.
//!
//! * [`BackendError`]: **Non-fatal**: one backend failed one task. The
//!   coordinator records it and falls through to the next backend; it only
//!   reaches the operator inside a [`crate::output::ConversionResult`] when
//!   every backend failed.
//!
//! * [`ReplicationError`]: **Non-fatal**: the mirror copy failed. It never
//!   changes the task's conversion status.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfbatch library.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Discovery errors ──────────────────────────────────────────────────
    /// The source directory does not exist.
    #[error("Source directory not found: '{path}'\nCheck the path exists and is readable.")]
    SourceDirNotFound { path: PathBuf },

    /// The source path exists but is a file.
    #[error("Source path is not a directory: '{path}'")]
    NotADirectory { path: PathBuf },

    /// The directory exists but could not be listed.
    #[error("Failed to read source directory '{path}': {source}")]
    DiscoveryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// No conversion backend could be registered for the requested plan.
    #[error("No conversion backend available for plan '{plan}'.\n{hint}")]
    BackendUnavailable { plan: String, hint: String },

    // ── Journal errors ────────────────────────────────────────────────────
    /// Could not open or append to the result journal.
    #[error("Failed to write result journal '{path}': {source}")]
    JournalWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// `true` for the discovery class of errors (missing or unreadable source).
    pub fn is_discovery(&self) -> bool {
        matches!(
            self,
            BatchError::SourceDirNotFound { .. }
                | BatchError::NotADirectory { .. }
                | BatchError::DiscoveryIo { .. }
        )
    }
}

/// A non-fatal error from a single backend attempt on a single task.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendError {
    /// The converter process could not be started.
    #[error("failed to launch '{program}': {detail}")]
    LaunchFailed { program: String, detail: String },

    /// The converter exited unsuccessfully.
    #[error("converter exited with {}: {stderr}", exit_label(.code))]
    ExitFailure { code: Option<i32>, stderr: String },

    /// The converter reported success but produced no PDF.
    #[error("converter produced no output at '{path}'")]
    MissingOutput { path: PathBuf },

    /// The per-task watchdog fired and the converter was killed.
    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The batch was cancelled before or during this attempt.
    #[error("conversion cancelled")]
    Cancelled,

    /// Filesystem error while preparing the session or delivering the PDF.
    #[error("I/O error: {detail}")]
    Io { detail: String },

    /// The backend panicked; the task was isolated and marked failed.
    #[error("backend panicked: {detail}")]
    Panicked { detail: String },
}

impl BackendError {
    pub(crate) fn io(context: &str, err: std::io::Error) -> Self {
        BackendError::Io {
            detail: format!("{context}: {err}"),
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "a signal".to_string(),
    }
}

/// A non-fatal error while copying a produced PDF to the mirror directory.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("cannot create mirror directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot copy '{from}' to '{to}': {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{path}' has no file name")]
    NoFileName { path: PathBuf },

    #[error("mirror copy of '{path}' would overwrite the PDF itself")]
    SameFile { path: PathBuf },
}
