// tests/config_loading.rs

mod common;
use crate::common::TestResult;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eltflow::config::{
    ConfigFile, apply_env_overrides, build_adapters, load_and_validate, load_from_path,
};
use eltflow::dag::{GraphError, TaskAction, TransformOp};
use eltflow::errors::EltflowError;
use eltflow::quality::Comparator;

fn write_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("Eltflow.toml");
    fs::write(&path, contents).expect("write config");
    path
}

fn sample_config_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("Eltflow.toml")
}

const MINIMAL: &str = r#"
[pipeline]
id = "p"

[sources.orders]
kind = "command"
cmd = "echo"

[task.extract]
kind = "sync"
source = "orders"
"#;

#[test]
fn sample_config_validates() -> TestResult {
    let cfg = load_and_validate(sample_config_path())?;

    assert_eq!(cfg.pipeline.id, "marketplace_elt_pipeline");
    assert_eq!(cfg.pipeline.max_concurrency, 4);
    assert_eq!(cfg.graph.len(), 8);

    let batches: Vec<BTreeSet<String>> = cfg.graph.topological_batches().collect();
    let first: Vec<&str> = batches[0].iter().map(String::as_str).collect();
    assert_eq!(first, vec!["dbt_deps", "extract_customers", "extract_orders"]);
    assert_eq!(batches.len(), 5);

    let gate = cfg.graph.node("quality_gate").expect("gate exists");
    match &gate.action {
        TaskAction::QualityGate { checks } => {
            assert_eq!(checks.len(), 3);
            assert_eq!(checks[2].comparator, Comparator::Between);
        }
        other => panic!("expected a quality gate, got {other:?}"),
    }
    assert_eq!(gate.retry_policy.max_attempts, 1);

    let extract = cfg.graph.node("extract_orders").expect("extract exists");
    assert_eq!(extract.retry_policy.max_attempts, 3);
    assert_eq!(extract.timeout, Some(Duration::from_secs(30 * 60)));
    assert_eq!(extract.group.as_deref(), Some("extract_load"));

    let deps = cfg.graph.node("dbt_deps").expect("deps exists");
    assert!(matches!(
        deps.action,
        TaskAction::Transform { op: TransformOp::Deps, .. }
    ));

    let freshness = cfg.graph.node("source_freshness").expect("freshness check exists");
    assert!(matches!(
        freshness.action,
        TaskAction::Transform { op: TransformOp::Freshness, .. }
    ));
    assert_eq!(freshness.group.as_deref(), Some("quality"));
    let second: Vec<&str> = batches[1].iter().map(String::as_str).collect();
    assert_eq!(second, vec!["dbt_staging", "source_freshness"]);
    Ok(())
}

#[test]
fn transform_dirs_resolve_next_to_the_config_file() -> TestResult {
    let cfg = load_and_validate(sample_config_path())?;
    let transform = cfg.transform.expect("sample config has a [transform] section");
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));

    assert_eq!(transform.project_dir, root.join("dbt"));
    assert_eq!(transform.profiles_dir, Some(root.join("dbt/profiles")));
    Ok(())
}

#[test]
fn sample_config_builds_every_adapter() -> TestResult {
    let cfg = load_and_validate(sample_config_path())?;
    let adapters = build_adapters(&cfg)?;

    let mut sources: Vec<&String> = adapters.sync.keys().collect();
    sources.sort();
    assert_eq!(sources, vec!["customers", "orders"]);
    assert!(adapters.transform.is_some());
    assert!(adapters.metrics.is_some());
    Ok(())
}

#[test]
fn minimal_config_gets_defaults() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(dir.path(), MINIMAL);

    let cfg = ConfigFile::try_from(load_from_path(&path)?)?;

    assert_eq!(cfg.pipeline.schedule, "@hourly");
    assert_eq!(cfg.pipeline.max_concurrency, 4);
    assert!(!cfg.pipeline.catchup);
    assert!(cfg.pipeline.state_path.is_none());
    let extract = cfg.graph.node("extract").expect("extract exists");
    assert_eq!(extract.retry_policy.max_attempts, 2);
    assert_eq!(extract.retry_policy.backoff_base, Duration::from_secs(1));
    Ok(())
}

#[test]
fn env_overrides_apply_before_validation() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(dir.path(), MINIMAL);

    let raw = apply_env_overrides(load_from_path(&path)?, |key| match key {
        "ELTFLOW_MAX_CONCURRENCY" => Some("1".to_string()),
        "ELTFLOW_DEFAULT_RETRY_COUNT" => Some("4".to_string()),
        _ => None,
    })?;
    let cfg = ConfigFile::try_from(raw)?;

    assert_eq!(cfg.pipeline.max_concurrency, 1);
    let extract = cfg.graph.node("extract").expect("extract exists");
    assert_eq!(extract.retry_policy.max_attempts, 5);
    Ok(())
}

#[test]
fn invalid_env_override_names_the_variable() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(dir.path(), MINIMAL);

    let err = apply_env_overrides(load_from_path(&path)?, |key| {
        (key == "ELTFLOW_MAX_CONCURRENCY").then(|| "lots".to_string())
    })
    .unwrap_err();

    assert!(err.to_string().contains("ELTFLOW_MAX_CONCURRENCY"), "got: {err}");
    Ok(())
}

#[test]
fn cycle_in_config_is_a_graph_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        r#"
[pipeline]
id = "p"

[transform]
project_dir = "dbt"

[task.a]
kind = "transform"
after = ["b"]

[task.b]
kind = "transform"
after = ["a"]
"#,
    );

    let err = ConfigFile::try_from(load_from_path(&path)?).unwrap_err();
    assert!(
        matches!(err, EltflowError::Graph(GraphError::Cycle(_))),
        "got: {err:?}"
    );
    Ok(())
}

#[test]
fn unknown_dependency_is_a_graph_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        &format!("{MINIMAL}\n[task.load]\nkind = \"sync\"\nsource = \"orders\"\nafter = [\"nope\"]\n"),
    );

    let err = ConfigFile::try_from(load_from_path(&path)?).unwrap_err();
    assert!(
        matches!(
            err,
            EltflowError::Graph(GraphError::UnknownDependency { ref dependency, .. }) if dependency == "nope"
        ),
        "got: {err:?}"
    );
    Ok(())
}

#[test]
fn invalid_schedule_is_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        &MINIMAL.replace("id = \"p\"", "id = \"p\"\nschedule = \"every tuesday\""),
    );

    let err = ConfigFile::try_from(load_from_path(&path)?).unwrap_err();
    assert!(matches!(err, EltflowError::Schedule { .. }), "got: {err:?}");
    Ok(())
}

#[test]
fn unknown_keys_are_rejected_at_parse_time() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        &MINIMAL.replace("id = \"p\"", "id = \"p\"\nmax_parallelism = 3"),
    );

    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, EltflowError::TomlError(_)), "got: {err:?}");
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_from_path("/definitely/not/here/Eltflow.toml").unwrap_err();
    assert!(matches!(err, EltflowError::IoError(_)), "got: {err:?}");
}
