//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (for example `"info"` or `"emberlink=debug"`).
///
/// Returns `false` if a global subscriber was already installed, which
/// makes repeated calls from tests harmless.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
