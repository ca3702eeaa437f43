//! Process lifecycle singletons: shutdown flag, in-flight accounting, runtime wiring.

// std
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
// crates.io
use tokio::time;
// self
use crate::{_prelude::*, metrics::GatewayCounters, recovery::RecoveryHandle, traffic::TrafficTracker};

/// Process-wide "shutting down" flag, set on signal receipt or by the test-mode
/// shutdown action.
#[derive(Debug, Default)]
pub struct LifecycleFlag(AtomicBool);
impl LifecycleFlag {
	/// Fresh flag in the running state.
	pub fn new() -> Self {
		Self::default()
	}

	/// Mark the process as shutting down.
	pub fn begin_shutdown(&self) {
		if !self.0.swap(true, Ordering::SeqCst) {
			tracing::info!("lifecycle flag set; draining");
		}
	}

	/// Clear the flag. Test-mode reset only.
	pub fn clear(&self) {
		self.0.store(false, Ordering::SeqCst);
	}

	/// Whether shutdown has been requested.
	pub fn is_shutting_down(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Counter of requests currently being served.
///
/// Clones share one counter, so the tracker can be handed to middleware while
/// the shutdown path polls the same count.
#[derive(Clone, Debug, Default)]
pub struct InFlightTracker {
	count: Arc<AtomicU64>,
}
impl InFlightTracker {
	/// Fresh tracker at zero.
	pub fn new() -> Self {
		Self::default()
	}

	/// Begin serving one request; the returned guard decrements on drop.
	pub fn start(&self) -> InFlightGuard {
		self.count.fetch_add(1, Ordering::SeqCst);

		InFlightGuard(self.count.clone())
	}

	/// Requests currently in flight.
	pub fn count(&self) -> u64 {
		self.count.load(Ordering::SeqCst)
	}

	/// Poll at `check_interval` until the count reaches zero or `timeout` expires.
	pub async fn wait_for_zero(&self, timeout: Duration, check_interval: Duration) -> Result<()> {
		let deadline = Instant::now() + timeout;

		loop {
			if self.count() == 0 {
				return Ok(());
			}
			if Instant::now() >= deadline {
				return Err(Error::Timeout(timeout));
			}

			time::sleep(check_interval.min(deadline.saturating_duration_since(Instant::now())))
				.await;
		}
	}
}

/// RAII guard holding one in-flight slot.
#[derive(Debug)]
pub struct InFlightGuard(Arc<AtomicU64>);
impl Drop for InFlightGuard {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

/// Process-wide shared state, constructed once at startup and threaded into every
/// component that needs it.
#[derive(Debug)]
pub struct Runtime {
	/// Shared sliding-window outcome tracker.
	pub traffic: Arc<TrafficTracker>,
	/// Shutdown flag.
	pub lifecycle: Arc<LifecycleFlag>,
	/// In-flight request accounting.
	pub in_flight: InFlightTracker,
	/// Degraded-recovery signalling and testing overrides.
	pub recovery: RecoveryHandle,
	/// Atomic counters backing the test-mode snapshot.
	pub counters: Arc<GatewayCounters>,
	started_at: Instant,
}
impl Runtime {
	/// Construct the runtime with fresh state.
	pub fn new(recovery: RecoveryHandle) -> Arc<Self> {
		Arc::new(Self {
			traffic: Arc::new(TrafficTracker::new()),
			lifecycle: Arc::new(LifecycleFlag::new()),
			in_flight: InFlightTracker::new(),
			recovery,
			counters: GatewayCounters::new(),
			started_at: Instant::now(),
		})
	}

	/// How long the process has been running.
	pub fn uptime(&self) -> Duration {
		self.started_at.elapsed()
	}
}
