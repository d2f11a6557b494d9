// src/errors.rs

//! Crate-wide error type.
//!
//! Task-level failures never surface here; they are `AdapterError`s inside
//! the executor and end up in the ledger. What does surface either stops a
//! run before it starts (config, graph, schedule) or aborts it (ledger and
//! watermark writes).

use thiserror::Error;

use crate::dag::graph::GraphError;
use crate::state::StateError;

#[derive(Error, Debug)]
pub enum EltflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid task graph: {0}")]
    Graph(#[from] GraphError),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid schedule '{expression}': {message}")]
    Schedule { expression: String, message: String },

    #[error("State store error: {0}")]
    State(#[from] StateError),

    /// The run ledger could not be written; durability is lost for the run.
    #[error("Ledger write failed: {0}")]
    LedgerWrite(#[source] StateError),

    /// A watermark could not be advanced after a successful extract.
    #[error("Watermark write failed for source '{source_name}': {reason}")]
    WatermarkWrite { source_name: String, reason: String },

    #[error("Run '{0}' already finished")]
    RunAlreadyFinished(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EltflowError>;
