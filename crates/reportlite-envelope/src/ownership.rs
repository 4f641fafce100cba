//! Recursive ownership transfer and ownership inspection.

use std::os::unix::fs::{lchown, MetadataExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{EnvelopeError, Result};
use crate::identity::Identity;
use crate::privilege::Privileged;

/// Re-own every entry under each root (roots included) to `identity`.
/// Symlinks are re-owned themselves and never followed. Returns the number of
/// entries changed.
pub fn transfer_ownership(
    _proof: &Privileged,
    roots: &[&Path],
    identity: &Identity,
) -> Result<usize> {
    let mut count = 0usize;
    for root in roots {
        if !root.exists() {
            return Err(EnvelopeError::OwnershipTransfer {
                path: root.to_path_buf(),
                reason: "path does not exist".to_string(),
            });
        }
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| EnvelopeError::OwnershipTransfer {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
                reason: e.to_string(),
            })?;
            lchown(entry.path(), Some(identity.uid), Some(identity.gid)).map_err(|e| {
                EnvelopeError::OwnershipTransfer {
                    path: entry.path().to_path_buf(),
                    reason: e.to_string(),
                }
            })?;
            count += 1;
        }
        tracing::debug!(root = %root.display(), owner = %identity.name, "Ownership transferred");
    }
    Ok(count)
}

/// Entries under `root` whose owner is not `uid`.
pub fn find_foreign_owned(root: &Path, uid: u32) -> anyhow::Result<Vec<PathBuf>> {
    let mut foreign = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        let meta = entry.path().symlink_metadata()?;
        if meta.uid() != uid {
            foreign.push(entry.into_path());
        }
    }
    Ok(foreign)
}
