//! Quiet-mode aware logging. When REPORTLITE_QUIET=1, suppress info-level
//! progress lines. Uses `tracing::info!` so output goes through the subscriber.

#[macro_export]
macro_rules! info_log {
    ($($arg:tt)*) => {{
        if !$crate::log::is_quiet() {
            tracing::info!($($arg)*);
        }
    }};
}

pub fn is_quiet() -> bool {
    reportlite_core::config::ObservabilityConfig::from_env().quiet
}
