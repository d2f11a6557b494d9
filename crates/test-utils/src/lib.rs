//! Shared fixtures for eltflow's integration tests.
//!
//! - [`builders`]: the marketplace graph, triggers and a [`builders::PipelineHarness`]
//!   over in-memory state.
//! - [`fake_adapters`]: scripted sync/transform/metric adapters that log
//!   every call with timestamps.
//! - [`fake_executor`]: an `ExecutorBackend` that never touches adapters.

pub mod builders;
pub mod fake_adapters;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

/// Upper bound for any single pipeline run in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Output is captured per test and only shown for failures. `RUST_LOG`
/// overrides the default `eltflow=debug,warn`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("eltflow=debug,warn"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("pipeline did not finish within {TEST_TIMEOUT:?}"),
    }
}
