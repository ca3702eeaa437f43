//! In-process cache backend.

// std
use std::collections::HashMap;
// crates.io
use async_trait::async_trait;
use tokio::sync::Mutex;
// self
use crate::{
	_prelude::*,
	cache::store::{Lookup, StaleLookup, WeatherStore},
	record::{CacheEntry, WeatherRecord},
};

/// Mutex-guarded in-memory map of cache entries.
///
/// The map is shared across request workers, so every access goes through the
/// lock; expired entries are removed on the read that observes them.
#[derive(Debug, Default)]
pub struct InMemoryStore {
	entries: Mutex<HashMap<String, CacheEntry>>,
}
impl InMemoryStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of retained entries, expired or not. Test use.
	pub async fn len(&self) -> usize {
		self.entries.lock().await.len()
	}

	/// Whether the store holds no entries.
	pub async fn is_empty(&self) -> bool {
		self.entries.lock().await.is_empty()
	}
}
#[async_trait]
impl WeatherStore for InMemoryStore {
	async fn get(&self, key: &str) -> Result<Lookup> {
		let now = Utc::now();
		let mut entries = self.entries.lock().await;

		match entries.get(key) {
			Some(entry) if entry.is_fresh(now) => Ok(Lookup::Fresh(entry.record.clone())),
			Some(_) => {
				entries.remove(key);

				Ok(Lookup::Miss)
			},
			None => Ok(Lookup::Miss),
		}
	}

	async fn get_stale(&self, key: &str, max_stale_age: Duration) -> Result<StaleLookup> {
		let now = Utc::now();
		let entries = self.entries.lock().await;

		match entries.get(key) {
			Some(entry) if entry.is_servable(now, max_stale_age) =>
				Ok(StaleLookup::Stale(entry.record.clone())),
			_ => Ok(StaleLookup::Miss),
		}
	}

	async fn set(&self, key: &str, record: &WeatherRecord, ttl: Duration) -> Result<()> {
		let entry = CacheEntry::new(record.clone(), ttl);
		let mut entries = self.entries.lock().await;

		entries.insert(key.to_owned(), entry);

		Ok(())
	}

	async fn ping(&self) -> Result<()> {
		Ok(())
	}
}
