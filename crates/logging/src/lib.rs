//! RibbonWorm Logging
//!
//! Subscriber setup shared by the binary and tests. `RUST_LOG` overrides
//! the default filter.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter with `--verbose`
pub const VERBOSE_FILTER: &str = "info,ribbonworm=debug";

/// Default filter otherwise
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(verbose: bool) {
    init_logging_with_filter(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER });
}

/// Same as [`init_logging`] with an explicit fallback filter
pub fn init_logging_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
