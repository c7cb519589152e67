//! Observability utilities.

mod tracing;

pub use self::tracing::{ArtifactSpanAttributes, SpanTimer, StageSpanAttributes};

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` fmt subscriber filtered by `filter`, unless `RUST_LOG`
/// is set, in which case it wins.
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

/// Like [`init_tracing`], with JSON-formatted output.
pub fn init_json_tracing(filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
