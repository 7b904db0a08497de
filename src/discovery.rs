//! File discovery: turn a directory and a name pattern into conversion tasks.
//!
//! Only regular files directly inside the directory are considered; the
//! pattern is matched against the file name alone, case-insensitively, so
//! `Anexo 9*.docx` also finds `ANEXO 9 ….DOCX` copied from Windows shares.
//! Word owner files (`~$…`) left behind by an open editor are ignored, and
//! so are PDFs, which are outputs and never sources.
//!
//! Each task owns its target. When two sources share a stem (`X.doc` and
//! `X.docx`) only the first in name order is kept and the rest are dropped
//! with a warning, so no task is ever skipped against a sibling's PDF.
//!
//! Tasks are sorted by file name so ordinals are stable between runs, but
//! callers must not rely on any particular order.

use crate::error::BatchError;
use crate::output::ConversionTask;
use glob::{MatchOptions, Pattern};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Enumerate source documents in `root` whose names match `pattern`.
///
/// PDFs are targeted next to each source unless `pdf_dir` is given.
///
/// # Errors
/// - [`BatchError::SourceDirNotFound`] when `root` does not exist
/// - [`BatchError::NotADirectory`] when `root` is a file
/// - [`BatchError::InvalidConfig`] for a malformed pattern
///
/// No match is not an error: the result is simply empty.
pub fn discover(
    root: &Path,
    pattern: &str,
    pdf_dir: Option<&Path>,
) -> Result<Vec<ConversionTask>, BatchError> {
    if !root.exists() {
        return Err(BatchError::SourceDirNotFound {
            path: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(BatchError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let matcher = Pattern::new(pattern)
        .map_err(|e| BatchError::InvalidConfig(format!("invalid pattern '{pattern}': {e}")))?;

    let entries = std::fs::read_dir(root).map_err(|source| BatchError::DiscoveryIo {
        path: root.to_path_buf(),
        source,
    })?;

    let mut sources: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BatchError::DiscoveryIo {
            path: root.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("~$") || !matcher.matches_with(&name, MATCH_OPTIONS) {
            continue;
        }
        if is_pdf(Path::new(&*name)) {
            debug!("Ignoring PDF '{}' matched by '{}'", name, pattern);
            continue;
        }
        // Follows symlinks: a link to a document counts as a document.
        let path = entry.path();
        if path.is_file() {
            sources.push(path);
        }
    }
    sources.sort();

    debug!(
        "Discovered {} file(s) matching '{}' in {}",
        sources.len(),
        pattern,
        root.display()
    );

    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut tasks = Vec::with_capacity(sources.len());
    for source in sources {
        let target = target_for(&source, pdf_dir);
        if !claimed.insert(target.clone()) {
            warn!(
                "Dropping {}: its PDF {} already belongs to another document",
                source.display(),
                target.display()
            );
            continue;
        }
        tasks.push(ConversionTask {
            index: tasks.len() + 1,
            source,
            target,
        });
    }
    Ok(tasks)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// The PDF path for `source`: same stem, `.pdf` extension, in `pdf_dir` if given.
pub fn target_for(source: &Path, pdf_dir: Option<&Path>) -> PathBuf {
    let file_name = source.with_extension("pdf");
    match (pdf_dir, file_name.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => file_name,
    }
}
