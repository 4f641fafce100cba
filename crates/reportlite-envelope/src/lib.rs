//! Build-and-run envelope for a single periodic batch task.
//!
//! The build stage runs privileged and produces an immutable artifact
//! (directory layout, identity, isolated runtime, installed dependencies,
//! build stamp). The run stage consumes that artifact only after dropping to
//! the unprivileged identity, then runs the task once or on a cron trigger.

pub mod bootstrap;
pub mod common;
pub mod env;
pub mod error;
pub mod identity;
pub mod log;
pub mod ownership;
pub mod privilege;
pub mod runner;
pub mod runtime_resolver;
pub mod schedule;

pub use error::EnvelopeError;
