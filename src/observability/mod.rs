//! Observability: Prometheus metrics and logging initialization.

pub mod metrics;

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber from `RUST_LOG`, falling
/// back to `info` for this crate when unset.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "configbutler=info".into()))
        .init();
}
