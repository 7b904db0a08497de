//! # pdfbatch
//!
//! Batch-convert word-processor documents in a directory to PDF, with
//! interchangeable conversion backends, a choice of execution strategies,
//! idempotent re-runs and optional replication to a mirror directory.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source dir + pattern
//!  │
//!  ├─ 1. Discover  matching documents → ConversionTask (1-based index)
//!  ├─ 2. Dispatch  Sequential | FullyParallel | BoundedSequentialSubmit
//!  ├─ 3. Convert   skip if PDF is newer, else backends in fallback order
//!  │               (headless office suite, standalone converter)
//!  ├─ 4. Mirror    copy the PDF to the replication directory
//!  └─ 5. Report    statistics, success rate, throughput, hints
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfbatch::{convert_batch, BatchConfig, ExecutionMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .source_dir("/srv/salidas")
//!         .mode(ExecutionMode::Sequential)
//!         .mirror_dir("/mnt/share/pdf")
//!         .build()?;
//!     let report = convert_batch(&config).await?;
//!     eprintln!(
//!         "{} converted, {} skipped, {} failed",
//!         report.stats.succeeded, report.stats.skipped, report.stats.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfbatch` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfbatch = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a mode
//!
//! | Mode | Use with |
//! |------|----------|
//! | `sequential` | the office suite on a loaded machine; most reliable |
//! | `bounded` | default; one document at a time through a small pool |
//! | `fully-parallel` | the standalone converter; fastest, least reliable with office |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod discovery;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stats;
pub mod strategy;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    BackendRegistry, BackendSession, CancelFlag, ContextGauge, ConversionBackend, LibraryBackend,
    OfficeBackend, SessionContext,
};
pub use config::{BackendPlan, BatchConfig, BatchConfigBuilder, ExecutionMode};
pub use convert::{convert_batch, convert_batch_sync, convert_batch_with, discover};
pub use error::{BackendError, BatchError, ReplicationError};
pub use output::{
    BackendKind, BackendOutcome, BatchReport, BatchStatistics, ConversionResult, ConversionTask,
    TaskStatus,
};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
