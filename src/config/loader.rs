// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{EltflowError, Result};

/// Prefix of the environment variables that override `[pipeline]` keys.
pub const ENV_PREFIX: &str = "ELTFLOW_";

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (graph correctness, adapter references). Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Apply `ELTFLOW_*` overrides to the `[pipeline]` section.
///
/// Recognised keys: `MAX_CONCURRENCY`, `DEFAULT_RETRY_COUNT`,
/// `DEFAULT_BACKOFF_BASE_MS`, `STATE_PATH`, `CATCHUP`. `lookup` is injected
/// so tests don't touch the process environment.
pub fn apply_env_overrides(
    mut raw: RawConfigFile,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RawConfigFile> {
    let var = |key: &str| {
        let name = format!("{ENV_PREFIX}{key}");
        lookup(&name).map(|value| (name, value))
    };

    if let Some((name, value)) = var("MAX_CONCURRENCY") {
        raw.pipeline.max_concurrency = parse_var(&name, &value)?;
    }
    if let Some((name, value)) = var("DEFAULT_RETRY_COUNT") {
        raw.pipeline.default_retry_count = parse_var(&name, &value)?;
    }
    if let Some((name, value)) = var("DEFAULT_BACKOFF_BASE_MS") {
        raw.pipeline.default_backoff_base_ms = parse_var(&name, &value)?;
    }
    if let Some((name, value)) = var("CATCHUP") {
        raw.pipeline.catchup = parse_var(&name, &value)?;
    }
    if let Some((name, value)) = var("STATE_PATH") {
        debug!(%name, %value, "state path overridden from environment");
        raw.pipeline.state_path = Some(PathBuf::from(value));
    }

    Ok(raw)
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    debug!(%name, %value, "config value overridden from environment");
    value.trim().parse().map_err(|e| {
        EltflowError::ConfigError(format!("invalid value '{value}' for {name}: {e}"))
    })
}

/// Load a configuration file from path, apply environment overrides and
/// validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde`) and `ELTFLOW_*` overrides.
/// - Checks for:
///   - unknown `after` references and cycles,
///   - tasks referencing unconfigured sources or tools,
///   - malformed schedules, durations and quality thresholds.
///
/// Relative `[transform]` directories are taken relative to the directory
/// holding the config file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let raw_config = apply_env_overrides(raw_config, |key| std::env::var(key).ok())?;
    let raw_config = resolve_relative_paths(raw_config, path.parent().unwrap_or(Path::new("")));
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Rebase relative `project_dir` and `profiles_dir` onto `base`.
pub fn resolve_relative_paths(mut cfg: RawConfigFile, base: &Path) -> RawConfigFile {
    if let Some(transform) = cfg.transform.as_mut() {
        if transform.project_dir.is_relative() {
            transform.project_dir = base.join(&transform.project_dir);
        }
        if let Some(dir) = transform.profiles_dir.as_mut().filter(|d| d.is_relative()) {
            *dir = base.join(&*dir);
        }
        debug!(project_dir = %transform.project_dir.display(), "dbt project resolved");
    }
    cfg
}

/// `Eltflow.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Eltflow.toml")
}
