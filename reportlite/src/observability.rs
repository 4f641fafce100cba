//! Observability: tracing init.
//!
//! Uses config::ObservabilityConfig for REPORTLITE_QUIET, REPORTLITE_LOG_LEVEL
//! and REPORTLITE_LOG_JSON. Logs go to stderr; stdout belongs to the task.

use reportlite_core::config::ObservabilityConfig;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Initialize tracing. Call at process startup.
/// When REPORTLITE_QUIET=1, only WARN and above are logged.
pub fn init_tracing() {
    let cfg = ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "reportlite=warn".to_string()
    } else {
        normalize_level(&cfg.log_level)
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

/// A bare level such as `DEBUG` (the task's own LOG_LEVEL convention) is
/// scoped to the `reportlite*` targets; anything else is used as a filter.
fn normalize_level(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    match lower.as_str() {
        "trace" | "debug" | "info" | "warn" | "warning" | "error" => {
            let lvl = if lower == "warning" { "warn" } else { lower.as_str() };
            format!("reportlite={lvl}")
        }
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_levels_are_scoped() {
        assert_eq!(normalize_level("DEBUG"), "reportlite=debug");
        assert_eq!(normalize_level("warning"), "reportlite=warn");
        assert_eq!(normalize_level("reportlite=trace"), "reportlite=trace");
    }
}
