//! Tracing setup for the binary.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber on stderr, leaving stdout for the report.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `warn` when `quiet`.
pub fn init(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
