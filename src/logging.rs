//! `tracing` initialization for binaries and tests that want human-readable output. The
//! core itself never calls this — reconcile logic only emits through `tracing`'s
//! ambient subscriber.

use tracing_subscriber::EnvFilter;

/// Initializes `tracing` logging with options from the environment variable named by
/// `env`. Callers are expected to pick a variable name specific to their deployment,
/// e.g. `FLEET_PLACEMENT_LOG`.
pub fn initialize_logging(env: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env(env))
        .init();
}
