//! Sliding-window traffic tracker feeding overload, idle, and degraded detection.

// std
use std::{
	collections::VecDeque,
	sync::Mutex,
};
// self
use crate::_prelude::*;

/// Upper bound on how long recorded outcomes are retained.
pub const RETENTION: Duration = Duration::from_secs(5 * 60);

/// Request outcome kinds tracked per window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
	/// Request answered successfully (fresh, coalesced, or stale).
	Success,
	/// Request failed on the upstream path.
	Error,
	/// Request shed by admission control.
	Denied,
}

#[derive(Debug, Default)]
struct OutcomeLog {
	success: VecDeque<Instant>,
	error: VecDeque<Instant>,
	denied: VecDeque<Instant>,
}
impl OutcomeLog {
	fn push(&mut self, outcome: Outcome, now: Instant, count: usize) {
		let log = match outcome {
			Outcome::Success => &mut self.success,
			Outcome::Error => &mut self.error,
			Outcome::Denied => &mut self.denied,
		};

		for _ in 0..count {
			log.push_back(now);
		}

		self.prune(now);
	}

	// Retention pruning is amortized into each write; entries are appended in
	// wall-clock order so the expired prefix is always at the front.
	fn prune(&mut self, now: Instant) {
		for log in [&mut self.success, &mut self.error, &mut self.denied] {
			while let Some(&oldest) = log.front() {
				if now.saturating_duration_since(oldest) > RETENTION {
					log.pop_front();
				} else {
					break;
				}
			}
		}
	}
}

/// Process-wide counter of per-outcome timestamps over sliding windows.
///
/// One storage, three windowed read facades: [`Self::overload_pressure`],
/// [`Self::idle_activity`], and [`Self::degraded_ratio`] give the health
/// evaluator call-site names without duplicating the log.
#[derive(Debug, Default)]
pub struct TrafficTracker {
	log: Mutex<OutcomeLog>,
}
impl TrafficTracker {
	/// Create an empty tracker.
	pub fn new() -> Self {
		Self::default()
	}

	/// Record a successful outcome at `now`.
	pub fn record_success(&self) {
		self.record(Outcome::Success, 1);
	}

	/// Record a failed outcome at `now`.
	pub fn record_error(&self) {
		self.record(Outcome::Error, 1);
	}

	/// Record an admission denial at `now`.
	pub fn record_denied(&self) {
		self.record(Outcome::Denied, 1);
	}

	/// Record `count` successful outcomes atomically; used by test injection.
	pub fn record_success_n(&self, count: usize) {
		self.record(Outcome::Success, count);
	}

	/// Record `count` failed outcomes atomically; used by test injection.
	pub fn record_error_n(&self, count: usize) {
		self.record(Outcome::Error, count);
	}

	fn record(&self, outcome: Outcome, count: usize) {
		let now = Instant::now();
		let mut log = self.log.lock().expect("traffic tracker lock poisoned");

		log.push(outcome, now, count);
	}

	/// Count of all outcomes recorded within `now - window`.
	pub fn request_count(&self, window: Duration) -> usize {
		let now = Instant::now();
		let log = self.log.lock().expect("traffic tracker lock poisoned");

		count_within(&log.success, now, window)
			+ count_within(&log.error, now, window)
			+ count_within(&log.denied, now, window)
	}

	/// Count of denials recorded within `now - window`.
	pub fn denial_count(&self, window: Duration) -> usize {
		let now = Instant::now();
		let log = self.log.lock().expect("traffic tracker lock poisoned");

		count_within(&log.denied, now, window)
	}

	/// Windowed `(errors, errors + successes)`.
	///
	/// Denials are excluded from the denominator so shedding traffic cannot
	/// inflate the error ratio.
	pub fn error_rate(&self, window: Duration) -> (usize, usize) {
		let now = Instant::now();
		let log = self.log.lock().expect("traffic tracker lock poisoned");
		let errors = count_within(&log.error, now, window);
		let successes = count_within(&log.success, now, window);

		(errors, errors + successes)
	}

	/// Overload facade: total admitted-or-denied traffic in the overload window.
	pub fn overload_pressure(&self, window: Duration) -> usize {
		self.request_count(window)
	}

	/// Idle facade: traffic observed in the idle-detection window.
	pub fn idle_activity(&self, window: Duration) -> usize {
		self.request_count(window)
	}

	/// Degraded facade: windowed error ratio inputs.
	pub fn degraded_ratio(&self, window: Duration) -> (usize, usize) {
		self.error_rate(window)
	}

	/// Drop every recorded outcome. Test and recovery use only.
	pub fn reset(&self) {
		let mut log = self.log.lock().expect("traffic tracker lock poisoned");

		*log = OutcomeLog::default();
	}
}

fn count_within(log: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
	log.iter().rev().take_while(|at| now.saturating_duration_since(**at) <= window).count()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn windows_count_only_recent_outcomes() {
		let tracker = TrafficTracker::new();

		tracker.record_success();
		tracker.record_error();
		tokio::time::advance(Duration::from_secs(90)).await;
		tracker.record_success();
		tracker.record_denied();

		assert_eq!(tracker.request_count(Duration::from_secs(60)), 2);
		assert_eq!(tracker.request_count(Duration::from_secs(120)), 4);
		assert_eq!(tracker.denial_count(Duration::from_secs(60)), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn denials_do_not_inflate_the_error_ratio() {
		let tracker = TrafficTracker::new();

		tracker.record_error_n(2);
		tracker.record_success();
		tracker.record_denied();
		tracker.record_denied();

		let (errors, total) = tracker.error_rate(Duration::from_secs(60));

		assert_eq!(errors, 2);
		assert_eq!(total, 3);
	}

	#[tokio::test(start_paused = true)]
	async fn retention_prunes_on_write() {
		let tracker = TrafficTracker::new();

		tracker.record_success();
		tokio::time::advance(RETENTION + Duration::from_secs(1)).await;
		tracker.record_success();

		assert_eq!(tracker.request_count(RETENTION), 1);
	}

	#[test]
	fn reset_empties_every_sequence() {
		let tracker = TrafficTracker::new();

		tracker.record_success_n(3);
		tracker.record_denied();
		tracker.reset();

		assert_eq!(tracker.request_count(RETENTION), 0);
		assert_eq!(tracker.denial_count(RETENTION), 0);
	}
}
