//! Tracing subscriber construction and flush.

// std
use std::io::Write;
// crates.io
use tracing_subscriber::EnvFilter;
// self
use crate::_prelude::*;

/// Install the global tracing subscriber.
///
/// The filter follows `RUST_LOG` and defaults to `info`; `json` switches the
/// output to structured lines.
pub fn init(json: bool) -> Result<()> {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
	let installed =
		if json { builder.json().try_init() } else { builder.try_init() };

	installed.map_err(|err| Error::Validation { field: "telemetry", reason: err.to_string() })
}

/// Synchronize buffered log output; the last step before connections close.
pub fn flush() {
	let _ = std::io::stdout().flush();
	let _ = std::io::stderr().flush();
}
