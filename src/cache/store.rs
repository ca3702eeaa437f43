//! Store contract shared by the in-memory and remote cache backends.

// crates.io
use async_trait::async_trait;
// self
use crate::{_prelude::*, record::WeatherRecord};

/// Outcome of a freshness-gated lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
	/// No usable entry.
	Miss,
	/// Entry present and within its freshness window.
	Fresh(WeatherRecord),
}

/// Outcome of a stale-tolerant lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum StaleLookup {
	/// Entry absent or aged past the grace window.
	Miss,
	/// Entry within `expires_at + max_stale_age`; still-fresh entries qualify
	/// too — the caller decides whether to flag the serve as stale.
	Stale(WeatherRecord),
}

/// Capability contract the weather service requires from a cache backend.
///
/// Failure semantics: a `get`/`get_stale` error is reported but never fatal to
/// the request (the service proceeds as on a miss); `set` is best-effort and
/// callers swallow its errors.
#[async_trait]
pub trait WeatherStore: Send + Sync + std::fmt::Debug {
	/// Look up a fresh entry; expired entries behave as a miss and are eagerly
	/// removed where the backend allows.
	async fn get(&self, key: &str) -> Result<Lookup>;

	/// Look up an entry no older than `max_stale_age` past its expiry.
	async fn get_stale(&self, key: &str, max_stale_age: Duration) -> Result<StaleLookup>;

	/// Store a record with `expires_at = now + ttl`.
	async fn set(&self, key: &str, record: &WeatherRecord, ttl: Duration) -> Result<()>;

	/// Liveness probe; errors when the backend is unreachable.
	async fn ping(&self) -> Result<()>;

	/// Whether [`Self::ping`] reflects a real backend and belongs in health output.
	fn ping_configured(&self) -> bool {
		false
	}
}
