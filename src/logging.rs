// src/logging.rs

//! Logging setup for `eltflow` using `tracing` + `tracing-subscriber`.
//!
//! Level resolution, first match wins:
//! 1. `--log-level` on the command line
//! 2. the `ELTFLOW_LOG` environment variable (e.g. "info", "debug")
//! 3. `info`
//!
//! Output always goes to STDERR; stdout is reserved for dry-run and history
//! listings. `--log-format json` switches to one JSON object per event.

use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::{LogFormat, LogLevel};

/// Environment variable consulted when `--log-level` is absent.
pub const LOG_ENV_VAR: &str = "ELTFLOW_LOG";

/// Install the global subscriber. Call once, before any run starts.
pub fn init_logging(cli_level: Option<LogLevel>, format: LogFormat) -> Result<()> {
    let level = resolve_level(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    let builder = fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };

    installed.map_err(|e| anyhow!("installing tracing subscriber: {e}"))
}

/// CLI flag beats environment, environment beats the `info` default.
pub fn resolve_level(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Level {
    if let Some(lvl) = cli_level {
        return lvl.into();
    }
    env_value.and_then(parse_level_str).unwrap_or(Level::INFO)
}

impl From<LogLevel> for Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
