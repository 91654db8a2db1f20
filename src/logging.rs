//! Tracing setup for applications embedding the memory subsystem.
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! host installs a subscriber, either its own or the one from [`init`].

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber filtered at `level`, usually
/// `CairnConfig::logging.level`.
///
/// `RUST_LOG` takes precedence when set. Safe to call more than once; later
/// calls are ignored if a global subscriber already exists.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
