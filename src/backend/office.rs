//! Native backend: a headless office suite invoked once per attempt.
//!
//! Every session points the suite at its own throw-away user profile via
//! `-env:UserInstallation`. Without that, a second `soffice` started while
//! the first is still running hands its work to the first instance and
//! exits immediately, and a crashed instance leaves a lock behind that
//! makes every later conversion fail.

use super::process::run_supervised;
use super::{staged_name, BackendSession, ConversionBackend, SessionContext, SessionWorkspace};
use crate::error::BackendError;
use crate::output::BackendKind;
use office_probe::{locate, ProbeError, OFFICE};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct OfficeBackend {
    program: PathBuf,
}

impl OfficeBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `explicit` when given, otherwise probe the system.
    pub fn detect(explicit: Option<&Path>) -> Result<Self, ProbeError> {
        match explicit {
            Some(path) if office_probe::is_executable(path) => Ok(Self::new(path)),
            Some(path) => Err(ProbeError::OverrideMissing {
                var: OFFICE.env_var,
                path: path.to_path_buf(),
            }),
            None => locate(&OFFICE).map(Self::new),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ConversionBackend for OfficeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn open_session(&self, ctx: &SessionContext) -> Result<Box<dyn BackendSession>, BackendError> {
        Ok(Box::new(OfficeSession {
            program: self.program.clone(),
            workspace: SessionWorkspace::create()?,
            ctx: ctx.clone(),
        }))
    }
}

struct OfficeSession {
    program: PathBuf,
    workspace: SessionWorkspace,
    ctx: SessionContext,
}

impl BackendSession for OfficeSession {
    fn convert(&mut self, source: &Path, target: &Path) -> Result<(), BackendError> {
        let out_dir = self.workspace.out_dir();
        let mut command = Command::new(&self.program);
        command
            .args(office_args(&self.workspace.profile_dir(), &out_dir))
            .arg(source)
            .current_dir(self.workspace.path());

        run_supervised(
            command,
            &self.program.display().to_string(),
            &self.ctx,
            &self.workspace.log_dir(),
        )?;

        // soffice exits 0 even when it could not load the document.
        let staged = out_dir.join(staged_name(source));
        if !staged.is_file() {
            return Err(BackendError::MissingOutput {
                path: target.to_path_buf(),
            });
        }
        self.workspace.deliver(&staged, target)
    }
}

/// Arguments preceding the source path.
fn office_args(profile: &Path, out_dir: &Path) -> Vec<String> {
    vec![
        "--headless".into(),
        "--invisible".into(),
        "--norestore".into(),
        "--nolockcheck".into(),
        "--nodefault".into(),
        "--nologo".into(),
        format!("-env:UserInstallation={}", file_url(profile)),
        "--convert-to".into(),
        "pdf".into(),
        "--outdir".into(),
        out_dir.display().to_string(),
    ]
}

/// `file://` URL for a local directory, as the suite expects for
/// `UserInstallation`.
fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut url = String::from("file://");
    if !raw.starts_with('/') {
        // C:/Users/... becomes file:///C:/Users/...
        url.push('/');
    }
    for c in raw.chars() {
        match c {
            ' ' => url.push_str("%20"),
            '%' => url.push_str("%25"),
            '#' => url.push_str("%23"),
            '?' => url.push_str("%3F"),
            _ => url.push(c),
        }
    }
    url
}
