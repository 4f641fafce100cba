//! Build stamp: the immutable record the privileged build stage hands to the
//! unprivileged run stage.
//!
//! A build removes any previous stamp before it starts and writes the new one
//! only after every other stage succeeded, atomically. A run stage without a
//! readable stamp has nothing to run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const STAMP_FILE_NAME: &str = ".reportlite-build.json";
pub const STAMP_VERSION: u32 = 1;

/// How the container runs the task. Fixed at build time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Run the task once; exit with its status
    #[default]
    OneShot,
    /// Keep a foreground scheduler alive; run the task at each trigger
    Scheduled,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneShot => f.write_str("one-shot"),
            Self::Scheduled => f.write_str("scheduled"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "one-shot" | "oneshot" | "once" => Ok(Self::OneShot),
            "scheduled" | "cron" => Ok(Self::Scheduled),
            other => anyhow::bail!("Unknown execution mode: {} (expected one-shot or scheduled)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStamp {
    pub version: u32,
    pub built_at: DateTime<Utc>,
    pub app_root: PathBuf,
    pub venv_root: PathBuf,
    pub home: PathBuf,
    /// Task script relative to `app_root`
    pub task: String,
    pub user: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
    /// Version reported by the isolated interpreter at build time, e.g. "3.7.17"
    pub python_version: String,
    pub manifest_digest: String,
    /// Sorted `pip freeze` output after installation
    pub installed: Vec<String>,
    pub mode: ExecutionMode,
}

impl BuildStamp {
    pub fn path(app_root: &Path) -> PathBuf {
        app_root.join(STAMP_FILE_NAME)
    }

    pub fn task_path(&self) -> PathBuf {
        self.app_root.join(&self.task)
    }

    pub fn load(app_root: &Path) -> Result<Self> {
        let path = Self::path(app_root);
        let content = fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read build stamp {} (was `reportlite build` run?)",
                path.display()
            )
        })?;
        let stamp: BuildStamp = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build stamp JSON: {}", path.display()))?;
        if stamp.version != STAMP_VERSION {
            anyhow::bail!(
                "Unsupported build stamp version {} in {} (expected {})",
                stamp.version,
                path.display(),
                STAMP_VERSION
            );
        }
        Ok(stamp)
    }

    pub fn write(&self) -> Result<PathBuf> {
        self.write_with(|_| Ok(()))
    }

    /// Write to a temporary file, run `prepare` on it (e.g. to set its owner),
    /// then rename it into place. Readers see either no stamp or a complete one.
    pub fn write_with<F>(&self, prepare: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let path = Self::path(&self.app_root);
        let tmp = self.app_root.join(format!("{STAMP_FILE_NAME}.tmp"));
        let data = serde_json::to_string_pretty(self)?;
        let staged = fs::write(&tmp, data)
            .with_context(|| format!("Failed to write build stamp: {}", tmp.display()))
            .and_then(|()| prepare(&tmp))
            .and_then(|()| {
                fs::rename(&tmp, &path).with_context(|| {
                    format!("Failed to move build stamp into place: {}", path.display())
                })
            });
        if let Err(e) = staged {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        tracing::debug!(path = %path.display(), mode = %self.mode, "Build stamp written");
        Ok(path)
    }

    /// Delete the stamp under `app_root`, if any. Returns whether one existed.
    pub fn remove(app_root: &Path) -> Result<bool> {
        let path = Self::path(app_root);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove previous build stamp: {}", path.display())),
        }
    }
}
