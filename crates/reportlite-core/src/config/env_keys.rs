//! Environment variable keys and aliases.
//!
//! Primary keys use the `REPORTLITE_*` prefix. Aliases cover the plain names
//! commonly set in container images.

/// Filesystem layout
pub mod paths {
    pub const REPORTLITE_APP_ROOT: &str = "REPORTLITE_APP_ROOT";
    pub const APP_ROOT_ALIASES: &[&str] = &["APP_HOME"];

    pub const REPORTLITE_VENV: &str = "REPORTLITE_VENV";
    pub const VENV_ALIASES: &[&str] = &["VIRTUAL_ENV"];

    pub const REPORTLITE_HOME: &str = "REPORTLITE_HOME";

    pub const REPORTLITE_TASK: &str = "REPORTLITE_TASK";

    pub const REPORTLITE_REQUIREMENTS: &str = "REPORTLITE_REQUIREMENTS";

    pub const REPORTLITE_SOURCE: &str = "REPORTLITE_SOURCE";
}

/// Unprivileged identity
pub mod identity {
    pub const REPORTLITE_USER: &str = "REPORTLITE_USER";
    pub const REPORTLITE_GROUP: &str = "REPORTLITE_GROUP";
    pub const REPORTLITE_SHELL: &str = "REPORTLITE_SHELL";
}

/// Isolated runtime
pub mod runtime {
    pub const REPORTLITE_BASE_PYTHON: &str = "REPORTLITE_BASE_PYTHON";
    pub const REPORTLITE_PYTHON_VERSION: &str = "REPORTLITE_PYTHON_VERSION";
    pub const PYTHON_VERSION_ALIASES: &[&str] = &["PYTHON_VERSION"];
}

/// Logging
pub mod observability {
    pub const REPORTLITE_QUIET: &str = "REPORTLITE_QUIET";

    pub const REPORTLITE_LOG_LEVEL: &str = "REPORTLITE_LOG_LEVEL";
    pub const LOG_LEVEL_ALIASES: &[&str] = &["LOG_LEVEL"];

    pub const REPORTLITE_LOG_JSON: &str = "REPORTLITE_LOG_JSON";
}
