//! Single-flight coalescing of concurrent fetches for one key.

// std
use std::{
	collections::HashMap,
	sync::Mutex,
};
// crates.io
use tokio::{sync::broadcast, time};
// self
use crate::{_prelude::*, context::RequestContext, record::WeatherRecord};

type SharedResult = std::result::Result<WeatherRecord, Arc<Error>>;

/// At-most-one concurrent fetch per key; concurrent requesters share the result.
///
/// The leader's work runs as a detached background task, so a waiter hitting its
/// own deadline never cancels the in-flight fetch — later waiters still receive
/// the eventual result. No result caching happens here; the fetch closure is
/// expected to populate the cache before it resolves.
#[derive(Clone, Debug)]
pub struct Coalescer {
	in_flight: Arc<Mutex<HashMap<String, broadcast::Sender<SharedResult>>>>,
	wait_cap: Duration,
}
impl Coalescer {
	/// Create a coalescer whose waiters give up after `wait_cap` at the latest.
	pub fn new(wait_cap: Duration) -> Self {
		Self { in_flight: Arc::new(Mutex::new(HashMap::new())), wait_cap }
	}

	/// Join or start the in-flight fetch for `key` and wait for its result.
	///
	/// The wait is bounded by the smaller of the caller's remaining budget and
	/// the configured coalesce timeout; exceeding it returns [`Error::Timeout`]
	/// for this caller only.
	pub async fn run<F>(&self, key: &str, ctx: &RequestContext, fetch: F) -> Result<WeatherRecord>
	where
		F: std::future::Future<Output = Result<WeatherRecord>> + Send + 'static,
	{
		let mut rx = {
			let mut in_flight = self.in_flight.lock().expect("coalescer lock poisoned");

			match in_flight.get(key) {
				Some(tx) => {
					tracing::debug!(key, "joining in-flight fetch");

					tx.subscribe()
				},
				None => {
					let (tx, rx) = broadcast::channel(1);

					in_flight.insert(key.to_owned(), tx);
					self.spawn_leader(key.to_owned(), fetch);

					rx
				},
			}
		};
		let wait = ctx.remaining().map_or(self.wait_cap, |remaining| remaining.min(self.wait_cap));

		match time::timeout(wait, rx.recv()).await {
			Ok(Ok(Ok(record))) => Ok(record),
			Ok(Ok(Err(shared))) => Err(Error::Shared(shared)),
			Ok(Err(_)) => Err(Error::CoalesceAborted),
			Err(_) => Err(Error::Timeout(wait)),
		}
	}

	fn spawn_leader<F>(&self, key: String, fetch: F)
	where
		F: std::future::Future<Output = Result<WeatherRecord>> + Send + 'static,
	{
		let in_flight = self.in_flight.clone();

		tokio::spawn(async move {
			let result = fetch.await.map_err(Arc::new);
			// Unregister and publish atomically so every subscriber observes the
			// result and the next arrival starts a fresh fetch.
			let tx = {
				let mut in_flight = in_flight.lock().expect("coalescer lock poisoned");

				in_flight.remove(&key)
			};

			if let Some(tx) = tx {
				let _ = tx.send(result);
			}
		});
	}
}
