//! Envelope error taxonomy.
//!
//! Every build-stage variant is fatal: the build aborts and no stamp is
//! written, so an incomplete build never yields a runnable artifact.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = EnvelopeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Build stage requires root privileges (effective uid {euid})")]
    NotPrivileged { euid: u32 },

    #[error("Cannot create directory {}: {source}", path.display())]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot copy application source {} -> {}: {reason}", from.display(), to.display())]
    SourceCopy {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    #[error("Identity '{name}' already exists with conflicting attributes: {detail}")]
    IdentityConflict { name: String, detail: String },

    #[error("Cannot create identity '{name}': {reason}")]
    IdentityCreate { name: String, reason: String },

    #[error("Isolated runtime construction failed at {}: {reason}", root.display())]
    RuntimeConstruction { root: PathBuf, reason: String },

    #[error("Isolated runtime version probe failed for {}: {reason}", interpreter.display())]
    RuntimeProbe { interpreter: PathBuf, reason: String },

    #[error("Isolated runtime reports Python {found}, expected {expected}")]
    VersionMismatch { expected: String, found: String },

    #[error("Dependency installation failed ({step}): {stderr}")]
    DependencyInstall { step: String, stderr: String },

    #[error("Ownership transfer failed for {}: {reason}", path.display())]
    OwnershipTransfer { path: PathBuf, reason: String },

    #[error("Privilege drop to '{user}' failed: {reason}")]
    PrivilegeDrop { user: String, reason: String },

    #[error("Failed to start task {}: {source}", program.display())]
    TaskSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schedule '{expr}': {reason}")]
    Schedule { expr: String, reason: String },
}
