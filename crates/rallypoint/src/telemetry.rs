//! Log output setup.
//!
//! Library code only emits `tracing` events. Binaries call
//! [`init_tracing`] once at startup to print them.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered by `RUST_LOG`, defaulting to
/// `info`.
///
/// Returns `false` if a global subscriber was already installed (a second
/// call, or the host set up its own). That is not an error.
pub fn init_tracing() -> bool {
    init_tracing_with("info")
}

/// Like [`init_tracing`], with a custom fallback when `RUST_LOG` is unset.
pub fn init_tracing_with(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
