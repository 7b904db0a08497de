//! Per-task conversion: idempotence check, ordered backend fallback, and
//! replication of the produced PDF.
//!
//! [`ConversionCoordinator::run`] is blocking and runs entirely on the
//! calling worker thread, so every backend session it opens is created,
//! used and dropped on that one thread.

use super::replicate::MirrorSink;
use crate::backend::{BackendRegistry, ContextGauge, ConversionBackend, SessionContext};
use crate::error::BackendError;
use crate::output::{BackendOutcome, ConversionResult, ConversionTask, TaskStatus};
use crate::progress::{ProgressEvent, ProgressSender};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;
use tracing::debug;

pub struct ConversionCoordinator {
    registry: BackendRegistry,
    session: SessionContext,
    gauge: ContextGauge,
    events: ProgressSender,
    mirror: Option<MirrorSink>,
}

impl ConversionCoordinator {
    pub fn new(
        registry: BackendRegistry,
        session: SessionContext,
        gauge: ContextGauge,
        events: ProgressSender,
    ) -> Self {
        Self {
            registry,
            session,
            gauge,
            events,
            mirror: None,
        }
    }

    /// Copy every PDF this coordinator produces (or finds up to date) to `sink`.
    pub fn with_mirror(mut self, sink: MirrorSink) -> Self {
        self.mirror = Some(sink);
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn gauge(&self) -> &ContextGauge {
        &self.gauge
    }

    /// Convert one task to completion. Blocking.
    ///
    /// Always returns a result with a terminal status; backend failures and
    /// backend panics become `Failed`, never an early return.
    pub fn run(&self, task: &ConversionTask) -> ConversionResult {
        let started = Instant::now();
        self.events.send(ProgressEvent::TaskStarted { task: task.clone() });

        let mut result = self.convert(task);
        if result.has_pdf() {
            self.replicate(&mut result);
        }
        result.duration_ms = started.elapsed().as_millis() as u64;

        self.finish(&result);
        result
    }

    /// [`run`](Self::run), turning a panic anywhere in the task into a
    /// `Failed` result.
    pub fn run_isolated(&self, task: &ConversionTask) -> ConversionResult {
        match catch_unwind(AssertUnwindSafe(|| self.run(task))) {
            Ok(result) => result,
            Err(payload) => self.abort(
                task.clone(),
                BackendError::Panicked {
                    detail: panic_message(payload.as_ref()),
                },
            ),
        }
    }

    /// Record a task that ended without reaching a normal result.
    pub(crate) fn abort(&self, task: ConversionTask, error: BackendError) -> ConversionResult {
        let result = ConversionResult::aborted(task, error);
        self.finish(&result);
        result
    }

    fn finish(&self, result: &ConversionResult) {
        self.events.send(ProgressEvent::TaskFinished {
            result: Box::new(result.clone()),
        });
    }

    fn convert(&self, task: &ConversionTask) -> ConversionResult {
        if self.session.cancel.is_cancelled() {
            return ConversionResult::aborted(task.clone(), BackendError::Cancelled);
        }
        if is_up_to_date(&task.source, &task.target) {
            debug!("[{}] PDF is newer than source, skipping", task.index);
            return ConversionResult::new(task.clone(), TaskStatus::Skipped);
        }

        let mut result = ConversionResult::new(task.clone(), TaskStatus::Failed);
        for backend in self.registry.backends() {
            if self.session.cancel.is_cancelled() {
                result.task_error = Some(BackendError::Cancelled);
                break;
            }

            let kind = backend.kind();
            let started = Instant::now();
            let outcome = self.attempt(backend.as_ref(), task);
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => {
                    result.attempts.push(BackendOutcome {
                        backend: kind,
                        success: true,
                        error: None,
                        duration_ms,
                    });
                    result.status = TaskStatus::Succeeded;
                    result.backend_used = Some(kind);
                    return result;
                }
                Err(error) => {
                    self.events.send(ProgressEvent::BackendFailed {
                        task: task.clone(),
                        backend: kind,
                        error: error.clone(),
                    });
                    result.attempts.push(BackendOutcome {
                        backend: kind,
                        success: false,
                        error: Some(error),
                        duration_ms,
                    });
                }
            }
        }
        result
    }

    /// One backend, one session, one lease on the context gauge.
    fn attempt(&self, backend: &dyn ConversionBackend, task: &ConversionTask) -> Result<(), BackendError> {
        let _lease = self.gauge.enter();
        let run = || -> Result<(), BackendError> {
            let mut session = backend.open_session(&self.session)?;
            session.convert(&task.source, &task.target)?;
            Ok(())
        };
        match catch_unwind(AssertUnwindSafe(run)) {
            Ok(Ok(())) if task.target.is_file() => Ok(()),
            Ok(Ok(())) => Err(BackendError::MissingOutput {
                path: task.target.clone(),
            }),
            Ok(Err(e)) => Err(e),
            Err(payload) => Err(BackendError::Panicked {
                detail: panic_message(payload.as_ref()),
            }),
        }
    }

    fn replicate(&self, result: &mut ConversionResult) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        match mirror.replicate(&result.task.target) {
            Ok(destination) => {
                self.events.send(ProgressEvent::Replicated {
                    task: result.task.clone(),
                    destination: destination.clone(),
                });
                result.replicated = true;
                result.mirror_path = Some(destination);
            }
            Err(e) => {
                let error = e.to_string();
                self.events.send(ProgressEvent::ReplicationFailed {
                    task: result.task.clone(),
                    error: error.clone(),
                });
                result.replication_error = Some(error);
            }
        }
    }
}

/// `true` when `target` exists and was modified strictly after `source`.
pub fn is_up_to_date(source: &Path, target: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified());
    match (modified(source), modified(target)) {
        (Ok(src), Ok(pdf)) => pdf > src,
        _ => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
