// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: semantic checks (known dependencies, acyclic, budgets).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_base_dir, default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig};
pub use validate::validate_raw_config;
