// src/state/error.rs

//! State backend error types.

/// Errors produced by [`RunLedger`](super::RunLedger) and
/// [`WatermarkStore`](super::WatermarkStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,

    /// A stored value could not be decoded.
    #[error("corrupt state: {0}")]
    Corrupt(String),

    /// The ledger already holds a terminal entry for this attempt.
    #[error("attempt {attempt_number} of task '{task}' in run '{run_id}' is already terminal")]
    AttemptAlreadyTerminal {
        run_id: String,
        task: String,
        attempt_number: u32,
    },

    /// A new attempt number did not exceed the ones already recorded.
    #[error("attempt {attempt_number} of task '{task}' in run '{run_id}' is out of order (latest is {latest})")]
    AttemptOutOfOrder {
        run_id: String,
        task: String,
        attempt_number: u32,
        latest: u32,
    },

    #[error("run '{0}' not found")]
    UnknownRun(String),

    /// Terminal runs are immutable.
    #[error("run '{0}' is already terminal")]
    RunAlreadyTerminal(String),
}

pub type Result<T> = std::result::Result<T, StateError>;
