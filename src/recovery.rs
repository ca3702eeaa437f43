//! Fibonacci-interval upstream re-validation after the process degrades.

// std
use std::sync::{
	Mutex,
	atomic::{AtomicBool, Ordering},
};
// crates.io
use tokio::{
	sync::mpsc,
	time,
};
// self
use crate::{_prelude::*, lifecycle::Runtime};

/// Cap applied to each validation probe issued by the loop.
const VALIDATE_CAP: Duration = Duration::from_secs(10);

/// Fibonacci-spaced delays `initial * {1, 2, 3, 5, 8, 13, ...}`, ending before
/// the first value that would exceed `max`.
pub fn fibonacci_delays(initial: Duration, max: Duration) -> Vec<Duration> {
	let mut delays = Vec::new();

	if initial.is_zero() {
		return delays;
	}

	let (mut current, mut next) = (1u32, 2u32);

	loop {
		let delay = initial.saturating_mul(current);

		if delay > max {
			break;
		}

		delays.push(delay);

		let Some(sum) = current.checked_add(next) else { break };

		(current, next) = (next, sum);
	}

	delays
}

#[derive(Debug)]
struct RecoveryShared {
	tx: mpsc::Sender<()>,
	delays: Vec<Duration>,
	cursor: Mutex<usize>,
	disabled: AtomicBool,
	force_succeed_next: AtomicBool,
	force_fail_next: AtomicBool,
}

/// Shared handle for signalling degradation and driving the testing overrides.
///
/// The overrides mirror the recovery contract: `disabled` bypasses the loop
/// entirely, and the force flags are single-use, consumed on the next attempt.
#[derive(Clone, Debug)]
pub struct RecoveryHandle {
	inner: Arc<RecoveryShared>,
}
impl RecoveryHandle {
	/// Build the handle plus the signal receiver consumed by [`RecoveryLoop`].
	pub fn new(initial: Duration, max: Duration) -> (Self, mpsc::Receiver<()>) {
		// Single-slot: concurrent degradation signals collapse into one pending
		// recovery run.
		let (tx, rx) = mpsc::channel(1);
		let handle = Self {
			inner: Arc::new(RecoveryShared {
				tx,
				delays: fibonacci_delays(initial, max),
				cursor: Mutex::new(0),
				disabled: AtomicBool::new(false),
				force_succeed_next: AtomicBool::new(false),
				force_fail_next: AtomicBool::new(false),
			}),
		};

		(handle, rx)
	}

	/// Signal that the process was classified degraded; collapses with any
	/// signal already pending.
	pub fn notify_degraded(&self) {
		if self.inner.tx.try_send(()).is_ok() {
			tracing::debug!("recovery signalled");
		}
	}

	/// Delay schedule the loop walks through.
	pub fn delays(&self) -> &[Duration] {
		&self.inner.delays
	}

	/// Delay at the current cursor, if the schedule is not exhausted.
	pub fn current_delay(&self) -> Option<Duration> {
		let cursor = *self.inner.cursor.lock().expect("recovery cursor lock poisoned");

		self.inner.delays.get(cursor).copied()
	}

	/// Advance the cursor past one failed attempt; returns whether the schedule
	/// is now exhausted.
	pub fn advance_failure(&self) -> bool {
		let mut cursor = self.inner.cursor.lock().expect("recovery cursor lock poisoned");

		*cursor = cursor.saturating_add(1);

		*cursor >= self.inner.delays.len()
	}

	/// Rewind the cursor after a successful validation.
	pub fn reset_cursor(&self) {
		*self.inner.cursor.lock().expect("recovery cursor lock poisoned") = 0;
	}

	/// Disable or re-enable the loop.
	pub fn set_disabled(&self, disabled: bool) {
		self.inner.disabled.store(disabled, Ordering::SeqCst);
	}

	/// Whether the loop is bypassed.
	pub fn is_disabled(&self) -> bool {
		self.inner.disabled.load(Ordering::SeqCst)
	}

	/// Force the next attempt to succeed.
	pub fn force_succeed_next(&self) {
		self.inner.force_succeed_next.store(true, Ordering::SeqCst);
	}

	/// Force the next attempt to fail.
	pub fn force_fail_next(&self) {
		self.inner.force_fail_next.store(true, Ordering::SeqCst);
	}

	/// Reset cursor and overrides; test-mode `reset` action.
	pub fn reset(&self) {
		self.reset_cursor();
		self.inner.disabled.store(false, Ordering::SeqCst);
		self.inner.force_succeed_next.store(false, Ordering::SeqCst);
		self.inner.force_fail_next.store(false, Ordering::SeqCst);
	}

	fn take_force_succeed(&self) -> bool {
		self.inner.force_succeed_next.swap(false, Ordering::SeqCst)
	}

	fn take_force_fail(&self) -> bool {
		self.inner.force_fail_next.swap(false, Ordering::SeqCst)
	}
}

/// Background task that re-validates the upstream at Fibonacci-spaced intervals
/// once degradation is signalled; exhaustion sets the lifecycle flag.
#[derive(Debug)]
pub struct RecoveryLoop {
	handle: RecoveryHandle,
	signal: mpsc::Receiver<()>,
}
impl RecoveryLoop {
	/// Pair the loop with its handle's receiver.
	pub fn new(handle: RecoveryHandle, signal: mpsc::Receiver<()>) -> Self {
		Self { handle, signal }
	}

	/// Drive the loop until the runtime shuts down or every handle is dropped.
	pub async fn run<F, Fut>(mut self, runtime: Arc<Runtime>, validate: F)
	where
		F: Fn() -> Fut,
		Fut: std::future::Future<Output = Result<()>>,
	{
		while self.signal.recv().await.is_some() {
			if runtime.lifecycle.is_shutting_down() {
				break;
			}
			if self.handle.is_disabled() {
				tracing::debug!("recovery disabled; ignoring degradation signal");

				continue;
			}

			self.recover(&runtime, &validate).await;
		}
	}

	async fn recover<F, Fut>(&self, runtime: &Runtime, validate: &F)
	where
		F: Fn() -> Fut,
		Fut: std::future::Future<Output = Result<()>>,
	{
		tracing::info!(delays = self.handle.delays().len(), "recovery loop engaged");

		while let Some(delay) = self.handle.current_delay() {
			time::sleep(delay).await;

			if runtime.lifecycle.is_shutting_down() || self.handle.is_disabled() {
				return;
			}

			let outcome = if self.handle.take_force_succeed() {
				Ok(())
			} else if self.handle.take_force_fail() {
				Err(Error::Validation {
					field: "recovery",
					reason: "Forced failure override.".into(),
				})
			} else {
				match time::timeout(VALIDATE_CAP, validate()).await {
					Ok(result) => result,
					Err(_) => Err(Error::Timeout(VALIDATE_CAP)),
				}
			};

			match outcome {
				Ok(()) => {
					tracing::info!("upstream validation recovered; resetting traffic windows");
					runtime.traffic.reset();
					self.handle.reset_cursor();

					return;
				},
				Err(err) => {
					tracing::warn!(error = %err, ?delay, "recovery validation failed");

					if self.handle.advance_failure() {
						tracing::error!("recovery schedule exhausted; requesting shutdown");
						runtime.lifecycle.begin_shutdown();
						self.handle.reset_cursor();

						return;
					}
				},
			}
		}
	}
}
