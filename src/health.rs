//! Health-state classification for orchestrator routing and lifecycle decisions.

// std
use std::sync::Mutex;
// crates.io
use serde::Serialize;
// self
use crate::{
	_prelude::*,
	cache::store::WeatherStore,
	lifecycle::Runtime,
	metrics,
	upstream::UpstreamClient,
};

/// Operational states reported on the health endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthState {
	/// Reserved label for a process that has not evaluated health yet; never
	/// produced by the evaluator itself.
	Starting,
	/// Serving normally.
	Healthy,
	/// Not serving correctly (bad credentials or breached error ratio).
	Degraded,
	/// Admission pressure at or past capacity.
	Overloaded,
	/// Past warm-up with request rate below the low-traffic threshold.
	Idle,
	/// Drain in progress.
	ShuttingDown,
}
impl HealthState {
	/// Lowercase label for logs and metrics.
	pub fn as_str(&self) -> &'static str {
		match self {
			HealthState::Starting => "starting",
			HealthState::Healthy => "healthy",
			HealthState::Degraded => "degraded",
			HealthState::Overloaded => "overloaded",
			HealthState::Idle => "idle",
			HealthState::ShuttingDown => "shutting-down",
		}
	}

	/// HTTP status the health endpoint answers with for this state.
	pub fn http_status(&self) -> http::StatusCode {
		match self {
			HealthState::Degraded | HealthState::Overloaded | HealthState::ShuttingDown =>
				http::StatusCode::SERVICE_UNAVAILABLE,
			_ => http::StatusCode::OK,
		}
	}
}

/// Verdict of one subordinate check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
	/// Check passed.
	Healthy,
	/// Check failed.
	Unhealthy,
}

/// Subordinate check results published alongside the state.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecks {
	/// Upstream check; unhealthy exactly when the state is degraded.
	pub weather_api: CheckStatus,
	/// Cache liveness; present only when the backend has a real ping.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cache: Option<CheckStatus>,
}

/// Health endpoint payload.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
	/// Classified operational state.
	pub status: HealthState,
	/// Service name.
	pub service: &'static str,
	/// Service version.
	pub version: &'static str,
	/// Machine-readable cause for non-healthy states.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<&'static str>,
	/// Subordinate check results.
	pub checks: HealthChecks,
	/// Evaluation timestamp.
	pub timestamp: DateTime<Utc>,
}

/// Thresholds and windows driving the decision procedure.
#[derive(Clone, Debug)]
pub struct HealthPolicy {
	/// Window over which admission pressure is measured.
	pub overload_window: Duration,
	/// Percentage of the theoretical window capacity that flags overload.
	pub overload_threshold_pct: u32,
	/// Admission rate used for the overload capacity formula; `<= 0` disables
	/// the overload check.
	pub rps: f64,
	/// Window over which the error ratio is measured.
	pub degraded_window: Duration,
	/// Error percentage at which the process reports degraded.
	pub degraded_error_pct: u32,
	/// Window over which idleness is measured.
	pub idle_window: Duration,
	/// Request count below which the process reports idle.
	pub idle_threshold: usize,
	/// Warm-up period before idle detection engages.
	pub minimum_lifespan: Duration,
}

/// Point-in-time inputs to the pure decision procedure.
#[derive(Clone, Copy, Debug)]
pub struct HealthInputs {
	/// Lifecycle flag state.
	pub shutting_down: bool,
	/// Whether the live upstream credential check passed.
	pub api_key_ok: bool,
	/// Process uptime.
	pub uptime: Duration,
	/// Outcome count in the overload window.
	pub overload_pressure: usize,
	/// Outcome count in the idle window.
	pub idle_activity: usize,
	/// `(errors, errors + successes)` in the degraded window.
	pub error_ratio: (usize, usize),
}

/// Classifies the process into one of the health states, in strict priority
/// order, and logs transitions once per change.
#[derive(Debug)]
pub struct HealthEvaluator {
	policy: HealthPolicy,
	last: Mutex<Option<HealthState>>,
}
impl HealthEvaluator {
	/// Build an evaluator for the given policy.
	pub fn new(policy: HealthPolicy) -> Self {
		Self { policy, last: Mutex::new(None) }
	}

	/// Window used by the degraded check; exposed for the test-mode error rate.
	pub fn degraded_window(&self) -> Duration {
		self.policy.degraded_window
	}

	/// Pure decision procedure; the first matching condition wins.
	pub fn decide(&self, inputs: &HealthInputs) -> (HealthState, Option<&'static str>) {
		if inputs.shutting_down {
			return (HealthState::ShuttingDown, Some("signal"));
		}
		if !inputs.api_key_ok {
			return (HealthState::Degraded, Some("api_key_invalid"));
		}

		let policy = &self.policy;

		if policy.rps > 0. {
			let capacity = policy.rps
				* policy.overload_window.as_secs_f64()
				* (f64::from(policy.overload_threshold_pct) / 100.);

			if inputs.overload_pressure as f64 > capacity {
				return (HealthState::Overloaded, Some("overload_threshold"));
			}
		}
		if inputs.uptime >= policy.minimum_lifespan && inputs.idle_activity < policy.idle_threshold
		{
			return (HealthState::Idle, Some("low_traffic"));
		}

		let (errors, total) = inputs.error_ratio;

		if total > 0 && errors * 100 >= policy.degraded_error_pct as usize * total {
			return (HealthState::Degraded, Some("error_rate_breach"));
		}

		(HealthState::Healthy, None)
	}

	/// Gather live inputs, decide, and assemble the endpoint payload.
	pub async fn evaluate(
		&self,
		runtime: &Runtime,
		upstream: &UpstreamClient,
		store: &dyn WeatherStore,
	) -> HealthReport {
		let shutting_down = runtime.lifecycle.is_shutting_down();
		// Skip the live credential probe once draining; the first condition
		// already decides the state.
		let api_key_ok =
			if shutting_down { true } else { upstream.validate_api_key().await.is_ok() };
		let inputs = HealthInputs {
			shutting_down,
			api_key_ok,
			uptime: runtime.uptime(),
			overload_pressure: runtime.traffic.overload_pressure(self.policy.overload_window),
			idle_activity: runtime.traffic.idle_activity(self.policy.idle_window),
			error_ratio: runtime.traffic.degraded_ratio(self.policy.degraded_window),
		};
		let (status, reason) = self.decide(&inputs);
		let weather_api = if status == HealthState::Degraded {
			CheckStatus::Unhealthy
		} else {
			CheckStatus::Healthy
		};
		let cache = if store.ping_configured() {
			Some(match store.ping().await {
				Ok(()) => CheckStatus::Healthy,
				Err(err) => {
					tracing::debug!(error = %err, "cache ping failed");

					CheckStatus::Unhealthy
				},
			})
		} else {
			None
		};

		self.observe_transition(status, reason, runtime);

		HealthReport {
			status,
			service: "weather-gateway",
			version: env!("CARGO_PKG_VERSION"),
			reason,
			checks: HealthChecks { weather_api, cache },
			timestamp: Utc::now(),
		}
	}

	fn observe_transition(
		&self,
		status: HealthState,
		reason: Option<&'static str>,
		runtime: &Runtime,
	) {
		let mut last = self.last.lock().expect("health state lock poisoned");

		if *last == Some(status) {
			return;
		}

		tracing::info!(
			from = last.map(|state| state.as_str()).unwrap_or(HealthState::Starting.as_str()),
			to = status.as_str(),
			reason = reason.unwrap_or_default(),
			"health state transition"
		);
		metrics::record_health_transition(status.as_str());

		if status == HealthState::Degraded {
			runtime.recovery.notify_degraded();
		}

		*last = Some(status);
	}
}
