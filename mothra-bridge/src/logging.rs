//! tracing subscriber setup for hosts that load the bridge as a shared library.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber. RUST_LOG wins over `default_filter`. No-op if a global
/// subscriber is already set (the embedding process may have its own).
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
