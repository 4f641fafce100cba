//! Resolve the task invocation once, from the build stamp.
//!
//! Both execution modes spawn exactly this command, so the scheduled path and
//! the one-shot path always use the isolated interpreter.

use reportlite_core::stamp::BuildStamp;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::env::RuntimeLayout;
use crate::privilege::Unprivileged;

/// Standard system paths, searched after the isolated runtime's `bin`.
pub const SYSTEM_PATH: &[&str] = &[
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCommand {
    pub interpreter: PathBuf,
    pub script: PathBuf,
    pub working_dir: PathBuf,
    pub env: Vec<(String, OsString)>,
}

impl TaskCommand {
    pub fn resolve(stamp: &BuildStamp, identity: &Unprivileged) -> Self {
        let runtime = RuntimeLayout::new(&stamp.venv_root);
        Self {
            interpreter: runtime.python(),
            script: stamp.task_path(),
            working_dir: stamp.app_root.clone(),
            env: task_env(&runtime, identity.user(), identity.home()),
        }
    }

    /// A fresh `Command` for one invocation. The task takes no arguments.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script).current_dir(&self.working_dir);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

/// Executable search path: isolated runtime first, then system paths in order.
pub fn search_path(runtime: &RuntimeLayout) -> OsString {
    let mut path = runtime.bin_dir().into_os_string();
    for p in SYSTEM_PATH {
        path.push(":");
        path.push(p);
    }
    path
}

fn task_env(runtime: &RuntimeLayout, user: &str, home: &Path) -> Vec<(String, OsString)> {
    vec![
        ("PYTHONDONTWRITEBYTECODE".to_string(), "1".into()),
        ("PYTHONUNBUFFERED".to_string(), "1".into()),
        ("VIRTUAL_ENV".to_string(), runtime.root().as_os_str().to_owned()),
        ("PATH".to_string(), search_path(runtime)),
        ("HOME".to_string(), home.as_os_str().to_owned()),
        ("USER".to_string(), user.into()),
        ("LOGNAME".to_string(), user.into()),
    ]
}
