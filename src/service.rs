//! Request orchestration: fresh cache, coalesced fetch, write-through, stale fallback.

// self
use crate::{
	_prelude::*,
	cache::store::{Lookup, StaleLookup, WeatherStore},
	coalesce::Coalescer,
	context::RequestContext,
	metrics::{self, GatewayCounters},
	record::WeatherRecord,
	upstream::UpstreamClient,
};

/// Normalize a raw location into its cache key.
pub fn normalize_location(raw: &str) -> String {
	raw.trim().to_lowercase()
}

/// Orchestrates one weather lookup across the cache, coalescer, and upstream.
#[derive(Debug)]
pub struct WeatherService {
	store: Arc<dyn WeatherStore>,
	upstream: Arc<UpstreamClient>,
	coalescer: Option<Coalescer>,
	ttl: Duration,
	stale_max_age: Duration,
	counters: Arc<GatewayCounters>,
}
impl WeatherService {
	/// Wire the service; `stale_max_age` of zero disables stale fallback and a
	/// `None` coalescer runs every fetch uncoalesced.
	pub fn new(
		store: Arc<dyn WeatherStore>,
		upstream: Arc<UpstreamClient>,
		coalescer: Option<Coalescer>,
		ttl: Duration,
		stale_max_age: Duration,
		counters: Arc<GatewayCounters>,
	) -> Self {
		Self { store, upstream, coalescer, ttl, stale_max_age, counters }
	}

	/// Backing store handle, shared with the health evaluator.
	pub fn store(&self) -> Arc<dyn WeatherStore> {
		self.store.clone()
	}

	/// Answer one lookup: normalize, probe fresh cache, coalesce an upstream
	/// fetch with write-through, and fall back to stale data on failure.
	#[tracing::instrument(skip(self, ctx), fields(correlation_id = ctx.correlation_id().unwrap_or_default()))]
	pub async fn get_weather(
		&self,
		ctx: &RequestContext,
		raw_location: &str,
	) -> Result<WeatherRecord> {
		let key = normalize_location(raw_location);

		match self.store.get(&key).await {
			Ok(Lookup::Fresh(record)) => {
				metrics::record_cache_lookup("fresh");
				self.counters.record_cache_hit();

				return Ok(record);
			},
			Ok(Lookup::Miss) => {
				metrics::record_cache_lookup("miss");
				self.counters.record_cache_miss();
			},
			Err(err) => {
				// Cache trouble never fails the request; proceed as a miss.
				tracing::debug!(key = %key, error = %err, "cache probe failed");
				metrics::record_cache_lookup("miss");
				self.counters.record_cache_miss();
			},
		}

		let fetch = self.fetch_and_store(ctx, key.clone());
		let fetched = match &self.coalescer {
			Some(coalescer) => coalescer.run(&key, ctx, fetch).await,
			None => fetch.await,
		};

		match fetched {
			Ok(record) => Ok(record),
			Err(err) => {
				if !self.stale_max_age.is_zero()
					&& let Some(stale) = self.stale_fallback(&key).await
				{
					tracing::warn!(key = %key, error = %err, "serving stale record after upstream failure");

					return Ok(stale);
				}

				Err(wrap_with_location(err, &key))
			},
		}
	}

	// Built as an owned future so the coalescer can promote it to a detached
	// leader task; the cache write happens before the result is published.
	fn fetch_and_store(
		&self,
		ctx: &RequestContext,
		key: String,
	) -> impl std::future::Future<Output = Result<WeatherRecord>> + Send + 'static {
		let store = self.store.clone();
		let upstream = self.upstream.clone();
		let counters = self.counters.clone();
		let ttl = self.ttl;
		let ctx = ctx.detached();

		async move {
			let result = upstream.current_weather(&ctx, &key).await;

			counters.record_upstream(result.is_err());

			let record = result?;

			if let Err(err) = store.set(&key, &record, ttl).await {
				tracing::debug!(key = %key, error = %err, "cache write-through failed");
			}

			Ok(record)
		}
	}

	async fn stale_fallback(&self, key: &str) -> Option<WeatherRecord> {
		match self.store.get_stale(key, self.stale_max_age).await {
			Ok(StaleLookup::Stale(mut record)) => {
				record.stale = true;
				metrics::record_cache_lookup("stale");
				self.counters.record_cache_stale();

				Some(record)
			},
			Ok(StaleLookup::Miss) => None,
			Err(err) => {
				tracing::debug!(key = %key, error = %err, "stale probe failed");

				None
			},
		}
	}
}

fn wrap_with_location(err: Error, key: &str) -> Error {
	match err {
		wrapped @ (Error::Upstream { .. } | Error::Shared(_)) => wrapped,
		other => Error::Upstream { location: key.to_owned(), source: Box::new(other) },
	}
}
