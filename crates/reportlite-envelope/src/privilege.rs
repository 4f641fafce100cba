//! The privileged/unprivileged boundary.
//!
//! Build-stage functions take `&Privileged`; run-stage functions take
//! `&Unprivileged`. The only way to obtain an `Unprivileged` is
//! [`drop_privileges`], which leaves the process unable to regain root, so
//! nothing that runs after it (including every spawned task) is privileged.

use nix::unistd::{self, Uid};
use std::path::{Path, PathBuf};

use crate::error::{EnvelopeError, Result};
use crate::identity::Identity;

/// Proof that the current process runs with elevated privileges.
#[derive(Debug)]
pub struct Privileged {
    _private: (),
}

impl Privileged {
    pub fn acquire() -> Result<Self> {
        let euid = unistd::geteuid();
        if !euid.is_root() {
            return Err(EnvelopeError::NotPrivileged {
                euid: euid.as_raw(),
            });
        }
        Ok(Self { _private: () })
    }

    /// Lets tests drive build-stage code that does not touch the identity database.
    #[cfg(test)]
    pub(crate) fn assume_for_tests() -> Self {
        Self { _private: () }
    }
}

/// Whether the current process has an effective uid of 0.
pub fn is_privileged() -> bool {
    unistd::geteuid().is_root()
}

/// Proof that the process has permanently switched to the unprivileged identity.
#[derive(Debug, Clone)]
pub struct Unprivileged {
    user: String,
    uid: u32,
    gid: u32,
    home: PathBuf,
}

impl Unprivileged {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    #[cfg(test)]
    pub(crate) fn current_for_tests() -> Self {
        Self {
            user: std::env::var("USER").unwrap_or_else(|_| "test".to_string()),
            uid: unistd::getuid().as_raw(),
            gid: unistd::getgid().as_raw(),
            home: std::env::temp_dir(),
        }
    }
}

/// Switch the whole process to `identity` for the rest of its lifetime.
///
/// As root: supplementary groups, gid, then uid are replaced. Already running
/// as `identity` (e.g. the image declares the user): accepted unchanged. Any
/// other uid is an error.
pub fn drop_privileges(identity: &Identity) -> Result<Unprivileged> {
    let fail = |reason: String| EnvelopeError::PrivilegeDrop {
        user: identity.name.clone(),
        reason,
    };

    if identity.is_root() {
        return Err(fail("target identity resolves to uid 0".to_string()));
    }

    let uid = identity.nix_uid();
    let gid = identity.nix_gid();
    let euid = unistd::geteuid();

    if euid.is_root() {
        unistd::setgroups(&[gid]).map_err(|e| fail(format!("setgroups: {e}")))?;
        unistd::setgid(gid).map_err(|e| fail(format!("setgid({gid}): {e}")))?;
        unistd::setuid(uid).map_err(|e| fail(format!("setuid({uid}): {e}")))?;
        tracing::debug!(user = %identity.name, uid = identity.uid, gid = identity.gid, "Dropped privileges");
    } else if euid != uid || unistd::getuid() != uid {
        return Err(fail(format!(
            "process runs as uid {}, which is neither root nor the target uid {}",
            euid, uid
        )));
    }

    if unistd::geteuid() != uid || unistd::getuid() != uid {
        return Err(fail("uid did not change".to_string()));
    }
    if unistd::getegid() != gid || unistd::getgid() != gid {
        return Err(fail(format!(
            "process gid is {}, expected {}",
            unistd::getegid(),
            gid
        )));
    }
    if unistd::setuid(Uid::from_raw(0)).is_ok() {
        return Err(fail("root privileges could be regained".to_string()));
    }

    Ok(Unprivileged {
        user: identity.name.clone(),
        uid: identity.uid,
        gid: identity.gid,
        home: identity.home.clone(),
    })
}
