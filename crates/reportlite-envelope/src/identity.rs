//! Unprivileged identity: one group plus one system user bound to the
//! envelope's home directory.

use nix::unistd::{Gid, Group, Uid, User};
use reportlite_core::config::IdentityConfig;
use reportlite_core::stamp::BuildStamp;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{EnvelopeError, Result};
use crate::privilege::Privileged;

const NOLOGIN_CANDIDATES: &[&str] = &["/usr/sbin/nologin", "/usr/bin/nologin", "/sbin/nologin"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
}

impl Identity {
    /// Resolve an existing user from the identity database.
    pub fn lookup(name: &str) -> Result<Option<Self>> {
        let user = User::from_name(name).map_err(|e| EnvelopeError::IdentityCreate {
            name: name.to_string(),
            reason: format!("cannot query user database: {e}"),
        })?;
        let Some(user) = user else {
            return Ok(None);
        };
        let group = Group::from_gid(user.gid)
            .ok()
            .flatten()
            .map(|g| g.name)
            .unwrap_or_else(|| user.gid.as_raw().to_string());
        Ok(Some(Self {
            name: user.name,
            group,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
            shell: user.shell,
        }))
    }

    /// The identity recorded in the build stamp. The live user database must
    /// still agree with the stamped uid/gid.
    pub fn from_stamp(stamp: &BuildStamp) -> Result<Self> {
        let identity = Self::lookup(&stamp.user)?.ok_or_else(|| EnvelopeError::PrivilegeDrop {
            user: stamp.user.clone(),
            reason: "user recorded in the build stamp no longer exists".to_string(),
        })?;
        if identity.uid != stamp.uid || identity.gid != stamp.gid {
            return Err(EnvelopeError::IdentityConflict {
                name: stamp.user.clone(),
                detail: format!(
                    "stamp records uid:gid {}:{}, user database has {}:{}",
                    stamp.uid, stamp.gid, identity.uid, identity.gid
                ),
            });
        }
        Ok(identity)
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    pub fn nix_uid(&self) -> Uid {
        Uid::from_raw(self.uid)
    }

    pub fn nix_gid(&self) -> Gid {
        Gid::from_raw(self.gid)
    }
}

/// Create the group and user when absent. An existing user must match the
/// requested group, home and shell. Returns the identity and whether it was created.
pub fn ensure_identity(
    _proof: &Privileged,
    cfg: &IdentityConfig,
    home: &Path,
) -> Result<(Identity, bool)> {
    let shell = resolve_shell(&cfg.shell).ok_or_else(|| EnvelopeError::IdentityCreate {
        name: cfg.user.clone(),
        reason: format!("login shell {} does not exist", cfg.shell),
    })?;

    // An existing user is checked before anything is created, so a conflict
    // leaves the identity database untouched.
    if let Some(existing) = Identity::lookup(&cfg.user)? {
        let problems = conflicts(&existing, &cfg.group, home, &shell);
        if !problems.is_empty() {
            return Err(EnvelopeError::IdentityConflict {
                name: cfg.user.clone(),
                detail: problems.join("; "),
            });
        }
        tracing::debug!(user = %existing.name, uid = existing.uid, "Identity already present");
        return Ok((existing, false));
    }

    let gid = ensure_group(&cfg.group, &cfg.user)?;
    tracing::debug!(group = %cfg.group, gid = gid.as_raw(), "Group ready");

    let home_arg = home.to_string_lossy().to_string();
    let shell_arg = shell.to_string_lossy().to_string();
    let output = Command::new("useradd")
        .args([
            "-r",
            "-M",
            "-g",
            cfg.group.as_str(),
            "-d",
            home_arg.as_str(),
            "-s",
            shell_arg.as_str(),
            cfg.user.as_str(),
        ])
        .output()
        .map_err(|e| EnvelopeError::IdentityCreate {
            name: cfg.user.clone(),
            reason: format!("failed to execute useradd: {e}"),
        })?;
    if !output.status.success() {
        return Err(EnvelopeError::IdentityCreate {
            name: cfg.user.clone(),
            reason: format!(
                "useradd failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let created = Identity::lookup(&cfg.user)?.ok_or_else(|| EnvelopeError::IdentityCreate {
        name: cfg.user.clone(),
        reason: "user still unresolved after useradd".to_string(),
    })?;
    if created.is_root() {
        return Err(EnvelopeError::IdentityConflict {
            name: cfg.user.clone(),
            detail: "resolves to uid 0".to_string(),
        });
    }
    Ok((created, true))
}

fn ensure_group(group: &str, user: &str) -> Result<Gid> {
    let lookup = |g: &str| {
        Group::from_name(g).map_err(|e| EnvelopeError::IdentityCreate {
            name: user.to_string(),
            reason: format!("cannot query group database for '{g}': {e}"),
        })
    };
    if let Some(existing) = lookup(group)? {
        return Ok(existing.gid);
    }

    let output = Command::new("groupadd")
        .args(["-r", group])
        .output()
        .map_err(|e| EnvelopeError::IdentityCreate {
            name: user.to_string(),
            reason: format!("failed to execute groupadd: {e}"),
        })?;
    if !output.status.success() {
        return Err(EnvelopeError::IdentityCreate {
            name: user.to_string(),
            reason: format!(
                "groupadd failed for '{group}': {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    lookup(group)?
        .map(|g| g.gid)
        .ok_or_else(|| EnvelopeError::IdentityCreate {
            name: user.to_string(),
            reason: format!("group '{group}' still unresolved after groupadd"),
        })
}

/// Attribute mismatches between an existing user and the requested one.
fn conflicts(existing: &Identity, group: &str, home: &Path, shell: &Path) -> Vec<String> {
    let mut problems = Vec::new();
    if existing.is_root() {
        problems.push("resolves to uid 0".to_string());
    }
    if existing.group != group {
        problems.push(format!(
            "primary group is '{}', expected '{}'",
            existing.group, group
        ));
    }
    if existing.home != home {
        problems.push(format!(
            "home is {}, expected {}",
            existing.home.display(),
            home.display()
        ));
    }
    if existing.shell != shell {
        problems.push(format!(
            "shell is {}, expected {}",
            existing.shell.display(),
            shell.display()
        ));
    }
    problems
}

/// The configured shell if present; a missing nologin falls back to whichever
/// nologin the base image ships.
fn resolve_shell(shell: &str) -> Option<PathBuf> {
    let requested = PathBuf::from(shell);
    if requested.exists() {
        return Some(requested);
    }
    if requested.file_name().map_or(false, |n| n == "nologin") {
        return NOLOGIN_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists());
    }
    None
}
