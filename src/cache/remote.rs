//! Remote key-value cache backend.

// crates.io
use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time;
// self
use crate::{
	_prelude::*,
	cache::store::{Lookup, StaleLookup, WeatherStore},
	record::{CacheEntry, WeatherRecord},
};

/// Fixed key namespace on the remote backend.
const KEY_PREFIX: &str = "weather:";
/// Largest TTL the backend accepts.
const BACKEND_MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
/// TTL applied when the requested one is invalid.
const BACKEND_DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Redis-backed store.
///
/// Values are serialized [`CacheEntry`] JSON carrying `expiresAt`, so staleness
/// is computed from the entry itself rather than the backend's own expiry.
#[derive(Debug)]
pub struct RedisStore {
	client: redis::Client,
	op_timeout: Duration,
}
impl RedisStore {
	/// Connect to the backend at `addr` (e.g. `redis://127.0.0.1:6379`).
	///
	/// `idle_connections` is accepted for configuration parity; the multiplexed
	/// client keeps a single connection and the hint is logged and ignored.
	pub fn connect(addr: &str, op_timeout: Duration, idle_connections: u32) -> Result<Self> {
		let client = redis::Client::open(addr)?;

		if idle_connections > 1 {
			tracing::debug!(
				idle_connections,
				"idle-connection hint ignored; using one multiplexed connection"
			);
		}

		Ok(Self { client, op_timeout })
	}

	async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
		self.bounded(self.client.get_multiplexed_async_connection()).await
	}

	async fn bounded<T>(
		&self,
		fut: impl std::future::Future<Output = redis::RedisResult<T>>,
	) -> Result<T> {
		match time::timeout(self.op_timeout, fut).await {
			Ok(result) => result.map_err(Error::from),
			Err(_) =>
				Err(Error::Cache(format!("remote cache operation exceeded {:?}", self.op_timeout))),
		}
	}

	fn key(location: &str) -> String {
		format!("{KEY_PREFIX}{location}")
	}

	async fn fetch_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
		let mut conn = self.connection().await?;
		let payload: Option<String> = self.bounded(conn.get(Self::key(key))).await?;

		match payload {
			Some(json) => Ok(Some(serde_json::from_str(&json)?)),
			None => Ok(None),
		}
	}
}
#[async_trait]
impl WeatherStore for RedisStore {
	async fn get(&self, key: &str) -> Result<Lookup> {
		let now = Utc::now();

		match self.fetch_entry(key).await? {
			Some(entry) if entry.is_fresh(now) => Ok(Lookup::Fresh(entry.record)),
			Some(_) => {
				// Logically expired but still retained by the backend.
				let mut conn = self.connection().await?;

				self.bounded(conn.del::<_, ()>(Self::key(key))).await?;

				Ok(Lookup::Miss)
			},
			None => Ok(Lookup::Miss),
		}
	}

	async fn get_stale(&self, key: &str, max_stale_age: Duration) -> Result<StaleLookup> {
		let now = Utc::now();

		match self.fetch_entry(key).await? {
			Some(entry) if entry.is_servable(now, max_stale_age) =>
				Ok(StaleLookup::Stale(entry.record)),
			_ => Ok(StaleLookup::Miss),
		}
	}

	async fn set(&self, key: &str, record: &WeatherRecord, ttl: Duration) -> Result<()> {
		let entry = CacheEntry::new(record.clone(), ttl);
		let payload = serde_json::to_string(&entry)?;
		let backend_ttl = backend_ttl(ttl);
		let mut conn = self.connection().await?;

		self.bounded(conn.set_ex::<_, _, ()>(Self::key(key), payload, backend_ttl.as_secs()))
			.await?;

		Ok(())
	}

	async fn ping(&self) -> Result<()> {
		let mut conn = self.connection().await?;
		let _: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;

		Ok(())
	}

	fn ping_configured(&self) -> bool {
		true
	}
}

/// TTL forwarded to the backend: equals the requested TTL, capped at the backend
/// maximum and defaulted when the request is invalid.
fn backend_ttl(requested: Duration) -> Duration {
	if requested.is_zero() {
		BACKEND_DEFAULT_TTL
	} else {
		requested.min(BACKEND_MAX_TTL)
	}
}
