use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (e.g. `"market_assistant_core=info"`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
