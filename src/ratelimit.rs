//! Token-bucket admission control for the weather route.

// std
use std::sync::Mutex;
// self
use crate::_prelude::*;

#[derive(Debug)]
struct Bucket {
	tokens: f64,
	refilled_at: Instant,
}

/// Token bucket gating admission with `rps` refill and `burst` capacity.
#[derive(Debug)]
pub struct RateLimiter {
	rps: f64,
	burst: f64,
	bucket: Mutex<Bucket>,
}
impl RateLimiter {
	/// Build a limiter; returns `None` when `rps <= 0`, meaning admission is
	/// unlimited and the limiter is simply absent.
	pub fn new(rps: f64, burst: u32) -> Option<Self> {
		if rps <= 0. {
			return None;
		}

		let burst = f64::from(burst.max(1));

		Some(Self {
			rps,
			burst,
			bucket: Mutex::new(Bucket { tokens: burst, refilled_at: Instant::now() }),
		})
	}

	/// Consume one token if available. Never blocks.
	pub fn allow(&self) -> bool {
		let now = Instant::now();
		let mut bucket = self.bucket.lock().expect("rate limiter lock poisoned");
		let elapsed = now.saturating_duration_since(bucket.refilled_at);

		bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rps).min(self.burst);
		bucket.refilled_at = now;

		if bucket.tokens >= 1. {
			bucket.tokens -= 1.;

			true
		} else {
			false
		}
	}

	/// Configured refill rate; feeds the overload-threshold formula.
	pub fn rps(&self) -> f64 {
		self.rps
	}
}
