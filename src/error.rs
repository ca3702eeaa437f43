//! Crate-wide error types and `Result` alias.

// std
use std::sync::Arc;
// crates.io
use http::StatusCode;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the weather gateway.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Redis(#[from] redis::RedisError),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	/// Result of a coalesced fetch shared between the leader and its waiters.
	#[error(transparent)]
	Shared(#[from] Arc<Error>),

	#[error("Invalid location {0:?}.")]
	InvalidLocation(String),
	#[error("Rate limit exceeded.")]
	RateLimited,
	#[error("Circuit breaker is open.")]
	CircuitOpen,
	#[error("Coalesced fetch aborted before completing.")]
	CoalesceAborted,
	#[error("Request timed out after {0:?}.")]
	Timeout(std::time::Duration),
	#[error("Upstream rejected the configured API key.")]
	InvalidApiKey,
	#[error("Location '{0}' not known upstream.")]
	LocationNotFound(String),
	#[error("Upstream rate limited the gateway.")]
	UpstreamRateLimited,
	#[error("Upstream HTTP status {status}: {body:?}")]
	HttpStatus { status: StatusCode, body: Option<String> },
	#[error("Weather lookup for '{location}' failed: {source}")]
	Upstream { location: String, source: Box<Error> },

	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Cache warm failed for {failed} of {total} keys: {detail}")]
	Warm { failed: usize, total: usize, detail: String },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Walk through wrapper variants to the underlying classification.
	pub fn root(&self) -> &Error {
		match self {
			Error::Shared(inner) => inner.root(),
			Error::Upstream { source, .. } => source.root(),
			other => other,
		}
	}

	/// Whether another upstream attempt may succeed.
	///
	/// 401 and 404 classifications are final for a given key and configuration;
	/// everything transport-shaped (timeouts, 5xx, upstream throttling) is worth
	/// retrying.
	pub fn is_retryable(&self) -> bool {
		match self.root() {
			Error::InvalidApiKey | Error::LocationNotFound(_) => false,
			Error::Timeout(_)
			| Error::UpstreamRateLimited
			| Error::HttpStatus { .. }
			| Error::Reqwest(_) => true,
			_ => false,
		}
	}

	/// Whether the error is an upstream classification that triggers stale fallback.
	pub fn is_upstream(&self) -> bool {
		matches!(
			self.root(),
			Error::CircuitOpen
				| Error::CoalesceAborted
				| Error::Timeout(_)
				| Error::InvalidApiKey
				| Error::LocationNotFound(_)
				| Error::UpstreamRateLimited
				| Error::HttpStatus { .. }
				| Error::Upstream { .. }
				| Error::Reqwest(_)
		)
	}

	/// Upper-snake wire code used in the error envelope.
	pub fn code(&self) -> &'static str {
		match self.root() {
			Error::InvalidLocation(_) => "INVALID_LOCATION",
			Error::RateLimited => "RATE_LIMITED",
			_ => "UPSTREAM_UNAVAILABLE",
		}
	}

	/// HTTP status carried by the error envelope.
	///
	/// Non-retryable upstream classifications deliberately collapse into 503 so
	/// upstream diagnostics never leak to clients; the precise kind is logged.
	pub fn status(&self) -> StatusCode {
		match self.root() {
			Error::InvalidLocation(_) => StatusCode::BAD_REQUEST,
			Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
			_ => StatusCode::SERVICE_UNAVAILABLE,
		}
	}
}
