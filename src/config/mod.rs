// src/config/mod.rs

//! Configuration loading and validation for eltflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk and apply `ELTFLOW_*` overrides (`loader.rs`).
//! - Validate it into a task graph (`validate.rs`).
//! - Turn source and tool sections into adapters (`adapters.rs`).

pub mod adapters;
pub mod loader;
pub mod model;
pub mod validate;

pub use adapters::build_adapters;
pub use loader::{
    apply_env_overrides, default_config_path, load_and_validate, load_from_path,
    resolve_relative_paths,
};
pub use model::{ConfigFile, PipelineSettings, RawConfigFile, SourceConfig, TaskConfig};
pub use validate::parse_duration;
