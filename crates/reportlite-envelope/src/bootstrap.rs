//! Environment bootstrap: directory tree and application source.

use reportlite_core::config::PathsConfig;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{EnvelopeError, Result};
use crate::privilege::Privileged;

/// The three directory roots the envelope owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub app_root: PathBuf,
    pub venv_root: PathBuf,
    pub home: PathBuf,
}

impl Layout {
    pub fn from_config(paths: &PathsConfig) -> Self {
        Self {
            app_root: paths.app_root.clone(),
            venv_root: paths.venv_root.clone(),
            home: paths.home.clone(),
        }
    }

    pub fn roots(&self) -> [&Path; 3] {
        [&self.app_root, &self.venv_root, &self.home]
    }
}

/// Create every root (and missing parents). Existing directories are kept.
pub fn create_layout(_proof: &Privileged, layout: &Layout) -> Result<()> {
    for root in layout.roots() {
        fs::create_dir_all(root).map_err(|source| EnvelopeError::DirectoryCreate {
            path: root.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Recursively copy the application source tree into `dest`, preserving
/// file modes and symlinks. When `dest` lies inside `src` it is skipped.
/// Returns the number of files copied.
pub fn copy_source(_proof: &Privileged, src: &Path, dest: &Path) -> Result<usize> {
    let copy_err = |reason: String| EnvelopeError::SourceCopy {
        from: src.to_path_buf(),
        to: dest.to_path_buf(),
        reason,
    };

    let src = src
        .canonicalize()
        .map_err(|e| copy_err(format!("cannot resolve source: {e}")))?;
    let dest_canon = dest.canonicalize().unwrap_or_else(|_| dest.to_path_buf());
    if src == dest_canon {
        return Ok(0);
    }

    let mut copied = 0usize;
    let walker = WalkDir::new(&src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.path() != dest_canon);
    for entry in walker {
        let entry = entry.map_err(|e| copy_err(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(&src)
            .map_err(|e| copy_err(e.to_string()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|source| EnvelopeError::DirectoryCreate {
                path: target.clone(),
                source,
            })?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| copy_err(e.to_string()))?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target).map_err(|e| copy_err(e.to_string()))?;
            }
            std::os::unix::fs::symlink(&link, &target)
                .map_err(|e| copy_err(format!("{}: {e}", target.display())))?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|e| copy_err(format!("{}: {e}", rel.display())))?;
            copied += 1;
        }
    }
    Ok(copied)
}
