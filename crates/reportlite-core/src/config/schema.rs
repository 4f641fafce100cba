//! Configuration structs grouped by concern, loaded from the environment.

use super::env_keys::{identity as id_keys, observability as obv_keys, paths, runtime};
use super::loader::{env_bool, env_optional, env_or, load_dotenv};
use std::path::PathBuf;

pub const DEFAULT_APP_ROOT: &str = "/app";
pub const DEFAULT_VENV_ROOT: &str = "/opt/venv";
pub const DEFAULT_HOME: &str = "/home/appuser";
pub const DEFAULT_TASK: &str = "monthly-report.py";
pub const DEFAULT_REQUIREMENTS: &str = "requirements.txt";
pub const DEFAULT_USER: &str = "appuser";
pub const DEFAULT_SHELL: &str = "/usr/sbin/nologin";

/// Filesystem layout of the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    /// Application root; all app files and the build stamp live here
    pub app_root: PathBuf,
    /// Isolated runtime (virtualenv) root
    pub venv_root: PathBuf,
    /// Home directory of the unprivileged identity
    pub home: PathBuf,
    /// Task script, relative to `app_root`
    pub task: String,
    /// Dependency manifest (build time only)
    pub requirements: PathBuf,
    /// Application source tree copied into `app_root` at build time
    pub source: PathBuf,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            app_root: PathBuf::from(env_or(
                paths::REPORTLITE_APP_ROOT,
                paths::APP_ROOT_ALIASES,
                || DEFAULT_APP_ROOT.to_string(),
            )),
            venv_root: PathBuf::from(env_or(paths::REPORTLITE_VENV, paths::VENV_ALIASES, || {
                DEFAULT_VENV_ROOT.to_string()
            })),
            home: PathBuf::from(env_or(paths::REPORTLITE_HOME, &[], || {
                DEFAULT_HOME.to_string()
            })),
            task: env_or(paths::REPORTLITE_TASK, &[], || DEFAULT_TASK.to_string()),
            requirements: PathBuf::from(env_or(paths::REPORTLITE_REQUIREMENTS, &[], || {
                DEFAULT_REQUIREMENTS.to_string()
            })),
            source: PathBuf::from(env_or(paths::REPORTLITE_SOURCE, &[], || ".".to_string())),
        }
    }

    /// Task script as an absolute path under the application root.
    pub fn task_path(&self) -> PathBuf {
        self.app_root.join(&self.task)
    }
}

/// The unprivileged identity created at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub user: String,
    pub group: String,
    pub shell: String,
}

impl IdentityConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let user = env_or(id_keys::REPORTLITE_USER, &[], || DEFAULT_USER.to_string());
        // Group defaults to the user name (user-private group).
        let group = env_or(id_keys::REPORTLITE_GROUP, &[], || user.clone());
        let shell = env_or(id_keys::REPORTLITE_SHELL, &[], || DEFAULT_SHELL.to_string());
        Self { user, group, shell }
    }

    /// Override the user name. A user-private group follows the new name;
    /// an explicitly different group is kept.
    pub fn with_user(mut self, user: String) -> Self {
        if self.group == self.user {
            self.group = user.clone();
        }
        self.user = user;
        self
    }
}

/// Base interpreter selection and version pin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Explicit base interpreter; discovered on PATH when unset
    pub base_python: Option<PathBuf>,
    /// Pinned interpreter version, e.g. "3.7" or "3.7.17"
    pub expected_version: Option<String>,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            base_python: env_optional(runtime::REPORTLITE_BASE_PYTHON, &[]).map(PathBuf::from),
            expected_version: env_optional(
                runtime::REPORTLITE_PYTHON_VERSION,
                runtime::PYTHON_VERSION_ALIASES,
            ),
        }
    }
}

/// Logging configuration: quiet, log_level, log_json
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            load_dotenv();
            Self {
                quiet: env_bool(obv_keys::REPORTLITE_QUIET, &[], false),
                log_level: env_or(
                    obv_keys::REPORTLITE_LOG_LEVEL,
                    obv_keys::LOG_LEVEL_ALIASES,
                    || "reportlite=info".to_string(),
                ),
                log_json: env_bool(obv_keys::REPORTLITE_LOG_JSON, &[], false),
            }
        })
    }
}
