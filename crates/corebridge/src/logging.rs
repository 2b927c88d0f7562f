//! Log output setup.
//!
//! The bridge emits `tracing` events at the native boundary:
//!
//! | Level | Events |
//! |-------|--------|
//! | trace | native call issued, handle and buffer frees |
//! | debug | duplicate callbacks, deferred frees |
//! | warn  | callbacks for unknown calls, caught callback panics, leaked handles |
//!
//! Hosts with their own subscriber need nothing from this module. `init()`
//! is for binaries and tests that want output without wiring one up.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive, e.g. `corebridge=debug`.
pub const LOG_ENV: &str = "COREBRIDGE_LOG";

const DEFAULT_FILTER: &str = "info";

/// Install a fmt subscriber filtered by `COREBRIDGE_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
/// Returns `true` if this call installed the subscriber.
pub fn init() -> bool {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        assert!(tracing::dispatcher::has_been_set());
        // Installed by the call above or an earlier test; never twice.
        assert!(!init());
    }
}
