//! Per-request context carrying the correlation id and deadline.

// self
use crate::_prelude::*;

/// Typed request context threaded from the HTTP layer into every suspension point.
///
/// The deadline bounds cache access, the coalescer wait, and upstream attempts;
/// the correlation id is echoed on the response and forwarded upstream.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
	correlation_id: Option<String>,
	deadline: Option<Instant>,
}
impl RequestContext {
	/// Context with neither a deadline nor a correlation id.
	pub fn new() -> Self {
		Self::default()
	}

	/// Attach a correlation id.
	pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
		self.correlation_id = Some(id.into());

		self
	}

	/// Bound the request by an absolute deadline.
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(deadline);

		self
	}

	/// Bound the request by a timeout from now.
	pub fn with_timeout(self, timeout: Duration) -> Self {
		self.with_deadline(Instant::now() + timeout)
	}

	/// Correlation id carried by the request, if any.
	pub fn correlation_id(&self) -> Option<&str> {
		self.correlation_id.as_deref()
	}

	/// Absolute deadline, if one was set.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Time remaining until the deadline; `None` when no deadline is set.
	///
	/// Once the deadline has passed this reports `Duration::ZERO` rather than
	/// an error; callers decide how an exhausted budget surfaces.
	pub fn remaining(&self) -> Option<Duration> {
		self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
	}

	/// Detach the deadline while keeping the correlation id.
	///
	/// Used when promoting a coalesced fetch to the background so the leader is
	/// not cancelled by the first caller's budget.
	pub fn detached(&self) -> Self {
		Self { correlation_id: self.correlation_id.clone(), deadline: None }
	}
}
