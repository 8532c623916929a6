//! Logging setup.
//!
//! Grounded on the teacher's `src/app.rs`/`src/telemetry/log.rs`: a single
//! `tracing_subscriber::fmt` initialization driven by `RUST_LOG`, plus a helper that
//! logs an `anyhow`/`thiserror` cause chain instead of only its `Display` (matching
//! `spec.md` §7's "user-visible failures appear in the logger with the structured cause
//! chain preserved").

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. Safe to call once at process start;
/// intended for the demonstration binary and integration tests, not for library use
/// embedded in a larger router (which will have already installed its own subscriber).
pub fn init() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.try_init();
}

/// Renders an error's full `source()` chain, one `caused by:` line per level, so the
/// original cause survives log truncation instead of being collapsed into the
/// outermost `Display`.
pub fn cause_chain(err: &(dyn std::error::Error + 'static)) -> String {
	let mut out = err.to_string();
	let mut cur = err.source();
	while let Some(source) = cur {
		out.push_str(&format!("\ncaused by: {source}"));
		cur = source.source();
	}
	out
}

pub fn log_failure(context: &str, err: &(dyn std::error::Error + 'static)) {
	tracing::warn!(error = %cause_chain(err), "{context}");
}
