//! # office-probe
//!
//! Locate the external executables that `pdfbatch` drives to turn
//! word-processor documents into PDF: a headless office suite (`soffice`)
//! and a standalone converter (`docx2pdf` or a compatible tool).
//!
//! ## How it works
//!
//! [`locate`] resolves a [`ProgramSpec`] in three steps, first match wins:
//!
//! 1. The program's environment variable (`PDFBATCH_OFFICE` /
//!    `PDFBATCH_CONVERTER`). When set, it must point at an executable file;
//!    a dangling override is reported instead of silently ignored.
//! 2. `PATH`, through [`which`], trying each executable name in turn
//!    (`PATHEXT` extensions on Windows, so `docx2pdf.cmd` is found too).
//! 3. Well-known install locations for the current platform.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use office_probe::{locate, OFFICE};
//!
//! match locate(&OFFICE) {
//!     Ok(path) => println!("office suite at {}", path.display()),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```
//!
//! ## Platform install locations
//!
//! | OS      | Office suite                                          |
//! |---------|-------------------------------------------------------|
//! | Windows | `%ProgramFiles%\LibreOffice\program\soffice.exe`      |
//! | macOS   | `/Applications/LibreOffice.app/Contents/MacOS/soffice` |
//! | Linux   | `/usr/lib/libreoffice/program/soffice`, `/opt/libreoffice*/program/soffice` |

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by office-probe lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The override variable is set but does not name an executable file.
    #[error("{var} points to '{path}', which is not an executable file")]
    OverrideMissing { var: &'static str, path: PathBuf },

    /// Nothing matched on PATH or in the platform install locations.
    #[error("{label} not found (looked for {names} on PATH and in {searched} install locations)\nSet {var} to the executable path.")]
    NotFound {
        label: &'static str,
        names: String,
        searched: usize,
        var: &'static str,
    },
}

// ── Program descriptions ─────────────────────────────────────────────────────

/// Describes one external program and where it usually lives.
#[derive(Debug, Clone, Copy)]
pub struct ProgramSpec {
    /// Human-readable name used in errors.
    pub label: &'static str,
    /// Environment variable that overrides the lookup.
    pub env_var: &'static str,
    /// Executable base names, most specific first.
    pub names: &'static [&'static str],
    /// Platform-specific candidate files checked after `PATH`.
    pub install_locations: fn() -> Vec<PathBuf>,
}

/// LibreOffice (or any `soffice`-compatible suite) in headless mode.
pub const OFFICE: ProgramSpec = ProgramSpec {
    label: "Office suite (soffice)",
    env_var: "PDFBATCH_OFFICE",
    names: &["soffice", "libreoffice"],
    install_locations: office_install_locations,
};

/// Standalone document converter taking `<input> <output>` arguments.
pub const CONVERTER: ProgramSpec = ProgramSpec {
    label: "Document converter (docx2pdf)",
    env_var: "PDFBATCH_CONVERTER",
    names: &["docx2pdf"],
    install_locations: converter_install_locations,
};

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolve `spec` against the live process environment.
pub fn locate(spec: &ProgramSpec) -> Result<PathBuf, ProbeError> {
    let env_override = std::env::var_os(spec.env_var);
    let path_var = std::env::var_os("PATH");
    locate_in(
        spec,
        env_override.as_deref(),
        path_var.as_deref(),
        &(spec.install_locations)(),
    )
}

/// Resolve `spec` against explicit inputs instead of the process environment.
pub fn locate_in(
    spec: &ProgramSpec,
    env_override: Option<&OsStr>,
    path_var: Option<&OsStr>,
    install_locations: &[PathBuf],
) -> Result<PathBuf, ProbeError> {
    if let Some(raw) = env_override.filter(|v| !v.is_empty()) {
        let path = PathBuf::from(raw);
        if is_executable(&path) {
            return Ok(path);
        }
        return Err(ProbeError::OverrideMissing {
            var: spec.env_var,
            path,
        });
    }

    if let Some(path_var) = path_var {
        for name in spec.names {
            if let Some(found) = find_on_path(name, path_var) {
                return Ok(found);
            }
        }
    }

    if let Some(found) = install_locations.iter().find(|p| is_executable(p)) {
        return Ok(found.clone());
    }

    Err(ProbeError::NotFound {
        label: spec.label,
        names: spec.names.join("/"),
        searched: install_locations.len(),
        var: spec.env_var,
    })
}

/// Search every directory of a `PATH`-style value for `name`.
pub fn find_on_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    which::which_in(name, Some(path_var), cwd).ok()
}

/// `true` when `path` is a regular file the current user may execute.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn executable_name(name: &str) -> OsString {
    if cfg!(windows) && Path::new(name).extension().is_none() {
        OsString::from(format!("{name}.exe"))
    } else {
        OsString::from(name)
    }
}

fn office_install_locations() -> Vec<PathBuf> {
    let mut out = Vec::new();
    match std::env::consts::OS {
        "windows" => {
            for var in ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"] {
                if let Some(base) = std::env::var_os(var) {
                    out.push(
                        PathBuf::from(base)
                            .join("LibreOffice")
                            .join("program")
                            .join("soffice.exe"),
                    );
                }
            }
        }
        "macos" => {
            let bundle = Path::new("LibreOffice.app/Contents/MacOS/soffice");
            out.push(Path::new("/Applications").join(bundle));
            if let Some(home) = dirs::home_dir() {
                out.push(home.join("Applications").join(bundle));
            }
        }
        _ => {
            out.push(PathBuf::from("/usr/lib/libreoffice/program/soffice"));
            out.push(PathBuf::from("/usr/lib64/libreoffice/program/soffice"));
            out.push(PathBuf::from("/snap/bin/libreoffice"));
            // Upstream tarballs install as /opt/libreoffice<version>/.
            if let Ok(entries) = std::fs::read_dir("/opt") {
                let mut versioned: Vec<PathBuf> = entries
                    .flatten()
                    .filter(|e| e.file_name().to_string_lossy().starts_with("libreoffice"))
                    .map(|e| e.path().join("program").join("soffice"))
                    .collect();
                versioned.sort();
                versioned.reverse();
                out.extend(versioned);
            }
        }
    }
    out
}

fn converter_install_locations() -> Vec<PathBuf> {
    let mut out = Vec::new();
    // pipx / `pip install --user` put console scripts here.
    if let Some(home) = dirs::home_dir() {
        out.push(home.join(".local").join("bin").join(executable_name("docx2pdf")));
    }
    if cfg!(windows) {
        if let Some(data) = dirs::data_dir() {
            out.push(data.join("Python").join("Scripts").join("docx2pdf.exe"));
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(executable_name(name));
        fs::write(&path, b"#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn finds_program_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let expected = make_executable(dir.path(), "soffice");
        let path_var = std::env::join_paths([dir.path()]).unwrap();

        let found = locate_in(&OFFICE, None, Some(&path_var), &[]).unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn second_name_is_tried() {
        let dir = tempfile::tempdir().unwrap();
        let expected = make_executable(dir.path(), "libreoffice");
        let path_var = std::env::join_paths([dir.path()]).unwrap();

        let found = locate_in(&OFFICE, None, Some(&path_var), &[]).unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn override_wins_over_path() {
        let on_path = tempfile::tempdir().unwrap();
        make_executable(on_path.path(), "docx2pdf");
        let pinned = tempfile::tempdir().unwrap();
        let expected = make_executable(pinned.path(), "my-converter");
        let path_var = std::env::join_paths([on_path.path()]).unwrap();

        let found = locate_in(
            &CONVERTER,
            Some(expected.as_os_str()),
            Some(&path_var),
            &[],
        )
        .unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn dangling_override_is_an_error() {
        let err = locate_in(
            &OFFICE,
            Some(OsStr::new("/definitely/not/here/soffice")),
            None,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ProbeError::OverrideMissing { var: "PDFBATCH_OFFICE", .. }));
    }

    #[test]
    fn install_location_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let expected = make_executable(dir.path(), "soffice");
        let empty = tempfile::tempdir().unwrap();
        let path_var = std::env::join_paths([empty.path()]).unwrap();

        let found = locate_in(&OFFICE, None, Some(&path_var), &[expected.clone()]).unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn not_found_names_the_override_variable() {
        let empty = tempfile::tempdir().unwrap();
        let path_var = std::env::join_paths([empty.path()]).unwrap();

        let err = locate_in(&CONVERTER, None, Some(&path_var), &[]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("docx2pdf"), "got: {msg}");
        assert!(msg.contains("PDFBATCH_CONVERTER"), "got: {msg}");
    }

    #[test]
    fn directories_are_not_executables() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(executable_name("soffice"))).unwrap();
        let path_var = std::env::join_paths([dir.path()]).unwrap();
        assert!(find_on_path("soffice", &path_var).is_none());
    }

    #[test]
    fn earlier_path_entry_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let expected = make_executable(first.path(), "docx2pdf");
        make_executable(second.path(), "docx2pdf");
        let path_var = std::env::join_paths([first.path(), second.path()]).unwrap();

        assert_eq!(find_on_path("docx2pdf", &path_var), Some(expected));
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_on_path_falls_through() {
        let first = tempfile::tempdir().unwrap();
        fs::write(first.path().join("soffice"), b"not runnable").unwrap();
        let second = tempfile::tempdir().unwrap();
        let expected = make_executable(second.path(), "soffice");
        let path_var = std::env::join_paths([first.path(), second.path()]).unwrap();

        let found = locate_in(&OFFICE, None, Some(&path_var), &[]).unwrap();
        assert_eq!(found, expected);
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("soffice"), b"not runnable").unwrap();
        assert!(!is_executable(&dir.path().join("soffice")));
    }
}
