//! Tracing setup for embedding applications.

use tracing_subscriber::EnvFilter;

/// Installs a global tracing subscriber with env-filter support.
///
/// Filtering follows `RUST_LOG` when set and defaults to `info`. Returns
/// `false` when a subscriber was already installed, so repeated
/// initialization is harmless.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init()
        .is_ok()
}
