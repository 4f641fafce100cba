//! Isolated runtime: construction, version probe, dependency installation.
//!
//! The build stage creates the virtualenv and installs the manifest into it;
//! the run stage only ever reads `RuntimeLayout` paths.

pub mod builder;

pub use builder::RuntimeLayout;
