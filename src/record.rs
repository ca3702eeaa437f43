//! Domain value and cache envelope for one weather observation.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// One weather observation as served to clients and stored in the cache.
///
/// Immutable once constructed; the wire form uses lowerCamelCase names and
/// omits `stale` unless the record was served from the stale fallback path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherRecord {
	/// Normalized (lowercase) location the record answers for.
	pub location: String,
	/// Temperature in metric units.
	pub temperature: f64,
	/// Human-readable conditions summary.
	pub conditions: String,
	/// Relative humidity percentage.
	pub humidity: u32,
	/// Wind speed in metric units.
	pub wind_speed: f64,
	/// Wall-clock time of the upstream fetch.
	pub timestamp: DateTime<Utc>,
	/// Set only when the record was served from stale fallback.
	#[serde(default, skip_serializing_if = "is_false")]
	pub stale: bool,
}

/// Cache envelope wrapping a record together with its logical expiry.
///
/// `expiresAt` travels inside the serialized value so a remote backend can
/// distinguish fresh from stale-but-servable independently of its own
/// expiration semantics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
	/// Cached observation.
	pub record: WeatherRecord,
	/// Wall-clock instant past which the entry is no longer fresh.
	pub expires_at: DateTime<Utc>,
}
impl CacheEntry {
	/// Wrap a record with `expires_at = now + ttl`.
	pub fn new(record: WeatherRecord, ttl: Duration) -> Self {
		let expires_at = Utc::now()
			+ chrono::TimeDelta::from_std(ttl).unwrap_or_else(|_| chrono::TimeDelta::hours(1));

		Self { record, expires_at }
	}

	/// Whether the entry is still within its freshness window.
	pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
		now < self.expires_at
	}

	/// Whether an expired entry is still within the stale grace window.
	pub fn is_servable(&self, now: DateTime<Utc>, max_stale_age: Duration) -> bool {
		let grace = chrono::TimeDelta::from_std(max_stale_age).unwrap_or(chrono::TimeDelta::zero());

		now <= self.expires_at + grace
	}
}

fn is_false(value: &bool) -> bool {
	!*value
}
