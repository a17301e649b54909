//! Parsing and validation of `tessera.toml` project configuration files.
//!
//! This crate reads the project configuration file and produces a strongly-typed
//! [`ProjectConfig`] (blocks, validators, cache settings) together with the raw
//! document the revalidation engine fingerprints.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, LoadedConfig, CONFIG_FILE};
pub use types::*;
