//! Logging setup shared by both binaries.

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber: env-filtered, plain text,
/// written to stderr so stdout stays free for any future machine-readable
/// output. Default filter directive is `info` when `RUST_LOG` is unset.
pub fn init() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();
}
