//! Periodic prefetching of an operator-declared hot set of locations.

// crates.io
use tokio::{task::JoinSet, time};
// self
use crate::{_prelude::*, context::RequestContext, lifecycle::LifecycleFlag, service::WeatherService};

/// Prefetches a fixed key set through the service so first requests hit cache.
#[derive(Debug)]
pub struct CacheWarmer {
	service: Arc<WeatherService>,
	keys: Vec<String>,
	budget: Duration,
	interval: Duration,
}
impl CacheWarmer {
	/// Build a warmer over `keys` with a per-round time `budget` and periodic
	/// `interval`.
	pub fn new(
		service: Arc<WeatherService>,
		keys: Vec<String>,
		budget: Duration,
		interval: Duration,
	) -> Self {
		Self { service, keys, budget, interval }
	}

	/// Fetch every key concurrently under one time budget, aggregating errors.
	pub async fn warm_all(&self) -> Result<()> {
		let total = self.keys.len();

		if total == 0 {
			return Ok(());
		}

		let mut tasks = JoinSet::new();

		for key in self.keys.clone() {
			let service = self.service.clone();
			let ctx = RequestContext::new().with_timeout(self.budget);

			tasks.spawn(async move {
				service.get_weather(&ctx, &key).await.map_err(|err| (key, err))
			});
		}

		let mut failures = Vec::new();

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok(Ok(_)) => {},
				Ok(Err((key, err))) => failures.push(format!("{key}: {err}")),
				Err(err) => failures.push(format!("warm task aborted: {err}")),
			}
		}

		if failures.is_empty() {
			Ok(())
		} else {
			Err(Error::Warm { failed: failures.len(), total, detail: failures.join("; ") })
		}
	}

	/// Run an initial warm and repeat at the fixed interval until shutdown,
	/// logging rather than returning warm errors.
	pub async fn run_periodic(self, lifecycle: Arc<LifecycleFlag>) {
		let mut ticker = time::interval(self.interval);

		// The first tick fires immediately and performs the initial warm.
		loop {
			ticker.tick().await;

			if lifecycle.is_shutting_down() {
				return;
			}

			match self.warm_all().await {
				Ok(()) => tracing::debug!(keys = self.keys.len(), "cache warm complete"),
				Err(err) => tracing::warn!(error = %err, "cache warm failed"),
			}
		}
	}
}
