//! Supervised execution of an external converter.
//!
//! The child runs in its own process group (unix) so that the helper
//! processes an office suite forks are killed together with it. The
//! supervisor polls the child, and kills it when the watchdog fires or the
//! batch is cancelled. A [`ChildGuard`] kills the child on every other exit
//! path, including unwinding.

use super::SessionContext;
use crate::error::BackendError;
use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Characters of stderr kept in an [`BackendError::ExitFailure`].
const STDERR_TAIL: usize = 1_000;

/// Run `command` to completion under the session's watchdog.
///
/// Output goes to `stdout.log` / `stderr.log` in `log_dir`; the tail of
/// stderr is attached to exit failures.
pub(crate) fn run_supervised(
    mut command: Command,
    program: &str,
    ctx: &SessionContext,
    log_dir: &Path,
) -> Result<(), BackendError> {
    let stdout = File::create(log_dir.join("stdout.log"))
        .map_err(|e| BackendError::io("creating converter log", e))?;
    let stderr_path = log_dir.join("stderr.log");
    let stderr = File::create(&stderr_path)
        .map_err(|e| BackendError::io("creating converter log", e))?;

    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().map_err(|e| BackendError::LaunchFailed {
        program: program.to_string(),
        detail: e.to_string(),
    })?;
    debug!("Spawned {} (pid {})", program, child.id());
    let mut guard = ChildGuard::new(child);
    let started = Instant::now();

    loop {
        match guard.child.try_wait() {
            Ok(Some(status)) => {
                guard.finished = true;
                if status.success() {
                    return Ok(());
                }
                return Err(BackendError::ExitFailure {
                    code: status.code(),
                    stderr: read_tail(&stderr_path),
                });
            }
            Ok(None) => {}
            Err(e) => return Err(BackendError::io("waiting for converter", e)),
        }

        if ctx.cancel.is_cancelled() {
            guard.kill();
            return Err(BackendError::Cancelled);
        }
        if let Some(limit) = ctx.timeout {
            if started.elapsed() >= limit {
                warn!("{} exceeded {}s, killing it", program, limit.as_secs());
                guard.kill();
                return Err(BackendError::Timeout {
                    secs: limit.as_secs(),
                });
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Kills the child (and its process group) unless it already exited.
struct ChildGuard {
    child: Child,
    finished: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            finished: false,
        }
    }

    fn kill(&mut self) {
        if self.finished {
            return;
        }
        #[cfg(unix)]
        {
            // The child leads its own group, so its pid is the group id.
            let pgid = self.child.id() as libc::pid_t;
            // SAFETY: only sends a signal to a group this process created.
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    warn!("Could not kill process group {}: {}", pgid, err);
                }
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.finished = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

fn read_tail(path: &Path) -> String {
    let bytes = std::fs::read(path).unwrap_or_default();
    let text = String::from_utf8_lossy(&bytes);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL {
        return text.to_string();
    }
    text.chars().skip(count - STDERR_TAIL).collect()
}
