//! Circuit breaker guarding the upstream call path.

// std
use std::sync::Mutex;
// self
use crate::_prelude::*;

/// Observer invoked on every state transition, for metrics and logging.
pub type TransitionObserver = dyn Fn(CircuitState, CircuitState) + Send + Sync;

/// Circuit breaker states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
	/// Normal operation; calls pass through.
	Closed,
	/// Tripped; calls are rejected until the timeout elapses.
	Open,
	/// Probing; limited calls decide between reopening and closing.
	HalfOpen,
}
impl CircuitState {
	/// Lowercase label for logs and metrics.
	pub fn as_str(&self) -> &'static str {
		match self {
			CircuitState::Closed => "closed",
			CircuitState::Open => "open",
			CircuitState::HalfOpen => "half_open",
		}
	}
}

#[derive(Debug)]
struct BreakerState {
	state: CircuitState,
	failure_count: u32,
	success_count: u32,
	last_failure_at: Option<Instant>,
}

/// Three-state guard around a fallible async call.
///
/// The guarded future always runs outside the state lock; only the acquire and
/// record steps mutate under it.
pub struct CircuitBreaker {
	failure_threshold: u32,
	success_threshold: u32,
	timeout: Duration,
	state: Mutex<BreakerState>,
	observer: Option<Box<TransitionObserver>>,
}
impl CircuitBreaker {
	/// Build a breaker with the given thresholds and open-state timeout.
	pub fn new(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
		Self {
			failure_threshold: failure_threshold.max(1),
			success_threshold: success_threshold.max(1),
			timeout,
			state: Mutex::new(BreakerState {
				state: CircuitState::Closed,
				failure_count: 0,
				success_count: 0,
				last_failure_at: None,
			}),
			observer: None,
		}
	}

	/// Attach a transition observer.
	pub fn with_observer<F>(mut self, observer: F) -> Self
	where
		F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
	{
		self.observer = Some(Box::new(observer));

		self
	}

	/// Current state, accounting only for recorded outcomes (an elapsed open
	/// timeout shows as `Open` until the next call probes).
	pub fn state(&self) -> CircuitState {
		self.state.lock().expect("breaker lock poisoned").state
	}

	/// Run `fut` under the breaker, recording its outcome.
	pub async fn call<T, F>(&self, fut: F) -> Result<T>
	where
		F: std::future::Future<Output = Result<T>>,
	{
		self.try_acquire()?;

		let result = fut.await;

		match &result {
			Ok(_) => self.record_success(),
			Err(_) => self.record_failure(),
		}

		result
	}

	fn try_acquire(&self) -> Result<()> {
		let mut guard = self.state.lock().expect("breaker lock poisoned");

		match guard.state {
			CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
			CircuitState::Open => {
				let elapsed = guard
					.last_failure_at
					.map(|at| at.elapsed())
					.unwrap_or(self.timeout);

				if elapsed >= self.timeout {
					guard.success_count = 0;
					self.transition(&mut guard, CircuitState::HalfOpen);

					Ok(())
				} else {
					Err(Error::CircuitOpen)
				}
			},
		}
	}

	fn record_success(&self) {
		let mut guard = self.state.lock().expect("breaker lock poisoned");

		match guard.state {
			CircuitState::Closed => guard.failure_count = 0,
			CircuitState::HalfOpen => {
				guard.success_count += 1;

				if guard.success_count >= self.success_threshold {
					guard.failure_count = 0;
					self.transition(&mut guard, CircuitState::Closed);
				}
			},
			CircuitState::Open => {},
		}
	}

	fn record_failure(&self) {
		let mut guard = self.state.lock().expect("breaker lock poisoned");

		guard.last_failure_at = Some(Instant::now());

		match guard.state {
			CircuitState::Closed => {
				guard.failure_count += 1;

				if guard.failure_count >= self.failure_threshold {
					self.transition(&mut guard, CircuitState::Open);
				}
			},
			CircuitState::HalfOpen => self.transition(&mut guard, CircuitState::Open),
			CircuitState::Open => {},
		}
	}

	fn transition(&self, guard: &mut BreakerState, to: CircuitState) {
		let from = guard.state;

		guard.state = to;

		tracing::debug!(from = from.as_str(), to = to.as_str(), "circuit breaker transition");

		if let Some(observer) = &self.observer {
			observer(from, to);
		}
	}
}
impl std::fmt::Debug for CircuitBreaker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CircuitBreaker")
			.field("failure_threshold", &self.failure_threshold)
			.field("success_threshold", &self.success_threshold)
			.field("timeout", &self.timeout)
			.field("state", &self.state)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;

	async fn fail(breaker: &CircuitBreaker) -> Result<()> {
		breaker.call(async { Err::<(), _>(Error::Timeout(Duration::from_secs(1))) }).await
	}

	async fn succeed(breaker: &CircuitBreaker) -> Result<()> {
		breaker.call(async { Ok(()) }).await
	}

	#[tokio::test(start_paused = true)]
	async fn opens_after_threshold_failures_and_rejects() {
		let breaker = CircuitBreaker::new(3, 1, Duration::from_secs(30));

		for _ in 0..3 {
			assert!(fail(&breaker).await.is_err());
		}

		assert_eq!(breaker.state(), CircuitState::Open);

		let invoked = AtomicUsize::new(0);
		let rejected = breaker
			.call(async {
				invoked.fetch_add(1, Ordering::SeqCst);

				Ok(())
			})
			.await;

		assert!(matches!(rejected, Err(Error::CircuitOpen)));
		assert_eq!(invoked.load(Ordering::SeqCst), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn half_open_probe_closes_after_success_threshold() {
		let breaker = CircuitBreaker::new(2, 2, Duration::from_secs(10));

		fail(&breaker).await.ok();
		fail(&breaker).await.ok();
		assert_eq!(breaker.state(), CircuitState::Open);

		tokio::time::advance(Duration::from_secs(10)).await;

		assert!(succeed(&breaker).await.is_ok());
		assert_eq!(breaker.state(), CircuitState::HalfOpen);
		assert!(succeed(&breaker).await.is_ok());
		assert_eq!(breaker.state(), CircuitState::Closed);
	}

	#[tokio::test(start_paused = true)]
	async fn half_open_failure_reopens() {
		let breaker = CircuitBreaker::new(1, 1, Duration::from_secs(5));

		fail(&breaker).await.ok();
		tokio::time::advance(Duration::from_secs(5)).await;
		fail(&breaker).await.ok();

		assert_eq!(breaker.state(), CircuitState::Open);
		assert!(matches!(succeed(&breaker).await, Err(Error::CircuitOpen)));
	}

	#[tokio::test(start_paused = true)]
	async fn closed_success_resets_the_failure_count() {
		let breaker = CircuitBreaker::new(2, 1, Duration::from_secs(5));

		fail(&breaker).await.ok();
		succeed(&breaker).await.ok();
		fail(&breaker).await.ok();

		assert_eq!(breaker.state(), CircuitState::Closed);
	}

	#[tokio::test(start_paused = true)]
	async fn observer_sees_transitions() {
		let transitions = Arc::new(AtomicUsize::new(0));
		let seen = transitions.clone();
		let breaker = CircuitBreaker::new(1, 1, Duration::from_secs(5))
			.with_observer(move |_, _| {
				seen.fetch_add(1, Ordering::SeqCst);
			});

		fail(&breaker).await.ok();
		tokio::time::advance(Duration::from_secs(5)).await;
		succeed(&breaker).await.ok();

		// closed -> open, open -> half_open, half_open -> closed
		assert_eq!(transitions.load(Ordering::SeqCst), 3);
	}
}
