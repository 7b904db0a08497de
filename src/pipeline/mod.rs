//! Per-task pipeline stages.
//!
//! ```text
//! ConversionTask
//!   │
//!   ├─ 1. Skip      PDF already newer than its source
//!   ├─ 2. Convert   backends in fallback order, one session per attempt
//!   ├─ 3. Verify    target file exists
//!   └─ 4. Mirror    copy to the replication directory (non-fatal)
//! ```

pub mod coordinator;
pub mod replicate;
