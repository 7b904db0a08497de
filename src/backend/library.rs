//! Library backend: a standalone converter that takes an input and an
//! output path, such as `docx2pdf <input> <output>`.
//!
//! The argument list is a template; `{input}` and `{output}` are replaced
//! per task. The converter writes into the session's staging directory and
//! the PDF is delivered from there, same as the native backend.

use super::process::run_supervised;
use super::{staged_name, BackendSession, ConversionBackend, SessionContext, SessionWorkspace};
use crate::config::{INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER};
use crate::error::BackendError;
use crate::output::BackendKind;
use office_probe::{locate, ProbeError, CONVERTER};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct LibraryBackend {
    program: PathBuf,
    args: Vec<String>,
}

impl LibraryBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn detect(explicit: Option<&Path>, args: Vec<String>) -> Result<Self, ProbeError> {
        match explicit {
            Some(path) if office_probe::is_executable(path) => Ok(Self::new(path, args)),
            Some(path) => Err(ProbeError::OverrideMissing {
                var: CONVERTER.env_var,
                path: path.to_path_buf(),
            }),
            None => locate(&CONVERTER).map(|p| Self::new(p, args)),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ConversionBackend for LibraryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Library
    }

    fn open_session(&self, ctx: &SessionContext) -> Result<Box<dyn BackendSession>, BackendError> {
        Ok(Box::new(LibrarySession {
            program: self.program.clone(),
            args: self.args.clone(),
            workspace: SessionWorkspace::create()?,
            ctx: ctx.clone(),
        }))
    }
}

struct LibrarySession {
    program: PathBuf,
    args: Vec<String>,
    workspace: SessionWorkspace,
    ctx: SessionContext,
}

impl BackendSession for LibrarySession {
    fn convert(&mut self, source: &Path, target: &Path) -> Result<(), BackendError> {
        let staged = self.workspace.out_dir().join(staged_name(source));
        let mut command = Command::new(&self.program);
        command
            .args(expand_args(&self.args, source, &staged))
            .current_dir(self.workspace.path());

        run_supervised(
            command,
            &self.program.display().to_string(),
            &self.ctx,
            &self.workspace.log_dir(),
        )?;

        if !staged.is_file() {
            return Err(BackendError::MissingOutput {
                path: target.to_path_buf(),
            });
        }
        self.workspace.deliver(&staged, target)
    }
}

fn expand_args(template: &[String], input: &Path, output: &Path) -> Vec<String> {
    let input = input.display().to_string();
    let output = output.display().to_string();
    template
        .iter()
        .map(|a| {
            a.replace(INPUT_PLACEHOLDER, &input)
                .replace(OUTPUT_PLACEHOLDER, &output)
        })
        .collect()
}
