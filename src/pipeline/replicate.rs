//! Mirror replication: copy each produced PDF into a secondary directory.
//!
//! A failed copy is reported but never changes a task's conversion status.
//! The copy keeps the PDF's modification time so that the mirror sorts and
//! diffs the same way as the primary directory.

use crate::error::ReplicationError;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MirrorSink {
    dir: PathBuf,
}

impl MirrorSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `pdf` into the mirror directory, creating it if needed.
    ///
    /// Returns the destination path. An existing file of the same name is
    /// overwritten.
    pub fn replicate(&self, pdf: &Path) -> Result<PathBuf, ReplicationError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ReplicationError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let name = pdf.file_name().ok_or_else(|| ReplicationError::NoFileName {
            path: pdf.to_path_buf(),
        })?;
        let destination = self.dir.join(name);
        if same_file(pdf, &destination) {
            return Err(ReplicationError::SameFile {
                path: pdf.to_path_buf(),
            });
        }

        std::fs::copy(pdf, &destination).map_err(|source| ReplicationError::Copy {
            from: pdf.to_path_buf(),
            to: destination.clone(),
            source,
        })?;

        if let Err(e) = preserve_mtime(pdf, &destination) {
            debug!("Could not keep mtime on {}: {}", destination.display(), e);
        }
        Ok(destination)
    }
}

/// Both paths resolve to one existing file. `fs::copy` onto itself truncates.
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn preserve_mtime(from: &Path, to: &Path) -> std::io::Result<()> {
    let modified = std::fs::metadata(from)?.modified()?;
    File::options().write(true).open(to)?.set_modified(modified)
}
