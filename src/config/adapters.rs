// src/config/adapters.rs

use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapters::{
    Adapters, AirbyteSyncAdapter, CommandMetricAdapter, CommandSyncAdapter, DbtAdapter,
    SyncAdapter,
};
use crate::config::model::{ConfigFile, SourceConfig};
use crate::config::validate::parse_duration;
use crate::errors::{EltflowError, Result};

/// Instantiate the adapters a validated config refers to.
///
/// Only sources that some task syncs are built, so an unused Airbyte source
/// with a missing token does not block the run.
pub fn build_adapters(cfg: &ConfigFile) -> Result<Adapters> {
    build_adapters_with(cfg, |key| std::env::var(key).ok())
}

/// Same as [`build_adapters`] with an injected environment lookup.
pub fn build_adapters_with(
    cfg: &ConfigFile,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Adapters> {
    let mut adapters = Adapters::new();

    for (name, source) in &cfg.sources {
        let used = cfg
            .graph
            .nodes()
            .any(|node| node.sync_source() == Some(name.as_str()));
        if !used {
            debug!(source = %name, "source not referenced by any task; skipping");
            continue;
        }
        adapters = adapters.with_sync(name.as_str(), build_source(name, source, &lookup)?);
    }

    if let Some(transform) = &cfg.transform {
        let mut dbt = DbtAdapter::new(transform.dbt_bin.as_str(), transform.project_dir.as_path());
        if let Some(dir) = &transform.profiles_dir {
            dbt = dbt.with_profiles_dir(dir.as_path());
        }
        if let Some(target) = &transform.target {
            dbt = dbt.with_target(target.as_str());
        }
        adapters = adapters.with_transform(Arc::new(dbt));
    }

    if let Some(metrics) = &cfg.metrics {
        adapters = adapters.with_metrics(Arc::new(CommandMetricAdapter::new(metrics.cmd.as_str())));
    }

    Ok(adapters)
}

fn build_source(
    name: &str,
    source: &SourceConfig,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn SyncAdapter>> {
    match source {
        SourceConfig::Command { cmd } => Ok(Arc::new(CommandSyncAdapter::new(cmd.as_str()))),
        SourceConfig::Airbyte {
            base_url,
            connection_id,
            api_token_env,
            poll_interval,
        } => {
            let mut adapter = AirbyteSyncAdapter::new(base_url.as_str(), connection_id.as_str())
                .map_err(|e| EltflowError::ConfigError(format!("source '{name}': {e}")))?;

            if let Some(var) = api_token_env {
                match lookup(var) {
                    Some(token) => adapter = adapter.with_api_token(token),
                    None => warn!(source = %name, env = %var, "API token variable is not set"),
                }
            }
            if let Some(interval) = poll_interval {
                let interval = parse_duration(interval).map_err(|e| {
                    EltflowError::ConfigError(format!("source '{name}' poll_interval: {e}"))
                })?;
                adapter = adapter.with_poll_interval(interval);
            }
            Ok(Arc::new(adapter))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::RawConfigFile;

    fn config(toml: &str) -> ConfigFile {
        let raw: RawConfigFile = toml::from_str(toml).unwrap();
        ConfigFile::try_from(raw).unwrap()
    }

    #[test]
    fn builds_only_referenced_sources() {
        let cfg = config(
            r#"
[pipeline]
id = "p"

[sources.orders]
kind = "command"
cmd = "echo '{}'"

[sources.unused]
kind = "airbyte"
base_url = "http://localhost:8001"
connection_id = "abc"
api_token_env = "NOT_SET"

[transform]
project_dir = "dbt"

[task.extract]
kind = "sync"
source = "orders"

[task.build]
kind = "transform"
after = ["extract"]
"#,
        );

        let adapters = build_adapters_with(&cfg, |_| None).unwrap();
        assert!(adapters.sync.contains_key("orders"));
        assert!(!adapters.sync.contains_key("unused"));
        assert!(adapters.transform.is_some());
        assert!(adapters.metrics.is_none());
    }
}
