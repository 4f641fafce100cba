//! ReportLite configuration layer
//!
//! Every environment variable the envelope reads goes through this module;
//! stage code consumes typed structs instead of calling `std::env::var`.
//!
//! - `loader`: env_or, env_optional, env_bool, `.env` loading
//! - `schema`: PathsConfig, IdentityConfig, RuntimeConfig, ObservabilityConfig
//! - `env_keys`: key constants and aliases

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, load_dotenv, load_dotenv_from_dir};
pub use schema::{IdentityConfig, ObservabilityConfig, PathsConfig, RuntimeConfig};
