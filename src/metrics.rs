//! Metrics helpers and process-wide telemetry bookkeeping.

// std
use std::sync::{
	OnceLock,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REQUESTS_TOTAL: &str = "weather_requests_total";
const METRIC_CACHE_LOOKUPS_TOTAL: &str = "weather_cache_lookups_total";
const METRIC_UPSTREAM_ATTEMPTS_TOTAL: &str = "weather_upstream_attempts_total";
const METRIC_UPSTREAM_RETRIES_TOTAL: &str = "weather_upstream_retries_total";
const METRIC_DEADLINE_PROPAGATED_TOTAL: &str = "weather_upstream_deadline_propagated_total";
const METRIC_BREAKER_TRANSITIONS_TOTAL: &str = "weather_breaker_transitions_total";
const METRIC_RATE_LIMIT_DENIALS_TOTAL: &str = "weather_rate_limit_denials_total";
const METRIC_LOCATION_REQUESTS_TOTAL: &str = "weather_location_requests_total";
const METRIC_HEALTH_TRANSITIONS_TOTAL: &str = "weather_health_transitions_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the
/// recorder is installed.
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Validation { field: "metrics", reason: err.to_string() })?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record one finished request by outcome (`success` | `error` | `denied`).
pub fn record_request(outcome: &'static str) {
	metrics::counter!(METRIC_REQUESTS_TOTAL, outcome_labels(outcome).iter()).increment(1);
}

/// Record a cache probe result (`fresh` | `stale` | `miss`).
pub fn record_cache_lookup(result: &'static str) {
	let mut labels = LabelSet::new();

	labels.push(Label::new("result", result));

	metrics::counter!(METRIC_CACHE_LOOKUPS_TOTAL, labels.iter()).increment(1);
}

/// Record one upstream attempt by status (`success` | `error`).
pub fn record_upstream_attempt(status: &'static str) {
	let mut labels = LabelSet::new();

	labels.push(Label::new("status", status));

	metrics::counter!(METRIC_UPSTREAM_ATTEMPTS_TOTAL, labels.iter()).increment(1);
}

/// Record an upstream retry sleep.
pub fn record_upstream_retry() {
	metrics::counter!(METRIC_UPSTREAM_RETRIES_TOTAL).increment(1);
}

/// Record that a caller deadline shortened a per-attempt timeout.
pub fn record_deadline_propagated() {
	metrics::counter!(METRIC_DEADLINE_PROPAGATED_TOTAL).increment(1);
}

/// Record a circuit breaker transition.
pub fn record_breaker_transition(from: &'static str, to: &'static str) {
	let mut labels = LabelSet::new();

	labels.push(Label::new("from", from));
	labels.push(Label::new("to", to));

	metrics::counter!(METRIC_BREAKER_TRANSITIONS_TOTAL, labels.iter()).increment(1);
}

/// Record an admission denial.
pub fn record_rate_limit_denial() {
	metrics::counter!(METRIC_RATE_LIMIT_DENIALS_TOTAL).increment(1);
}

/// Record a per-location request when the location is on the tracked allow-list.
///
/// The allow-list bounds metric cardinality; untracked locations are dropped.
pub fn record_location_request(location: &str, tracked: &[String]) {
	if !tracked.iter().any(|candidate| candidate == location) {
		return;
	}

	let mut labels = LabelSet::new();

	labels.push(Label::new("location", location.to_owned()));

	metrics::counter!(METRIC_LOCATION_REQUESTS_TOTAL, labels.iter()).increment(1);
}

/// Record a health state transition.
pub fn record_health_transition(to: &'static str) {
	let mut labels = LabelSet::new();

	labels.push(Label::new("to", to));

	metrics::counter!(METRIC_HEALTH_TRANSITIONS_TOTAL, labels.iter()).increment(1);
}

fn outcome_labels(outcome: &'static str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("outcome", outcome));

	labels
}

/// Atomic per-process accumulator backing the test-mode counters snapshot.
#[derive(Debug, Default)]
pub struct GatewayCounters {
	requests: AtomicU64,
	successes: AtomicU64,
	errors: AtomicU64,
	denials: AtomicU64,
	cache_hits: AtomicU64,
	cache_stale: AtomicU64,
	cache_misses: AtomicU64,
	upstream_calls: AtomicU64,
	upstream_failures: AtomicU64,
}
impl GatewayCounters {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Count a successfully answered request.
	pub fn record_success(&self) {
		self.requests.fetch_add(1, Ordering::Relaxed);
		self.successes.fetch_add(1, Ordering::Relaxed);
	}

	/// Count a failed request.
	pub fn record_error(&self) {
		self.requests.fetch_add(1, Ordering::Relaxed);
		self.errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Count a shed request.
	pub fn record_denial(&self) {
		self.requests.fetch_add(1, Ordering::Relaxed);
		self.denials.fetch_add(1, Ordering::Relaxed);
	}

	/// Count a fresh cache hit.
	pub fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Count a stale fallback serve.
	pub fn record_cache_stale(&self) {
		self.cache_stale.fetch_add(1, Ordering::Relaxed);
	}

	/// Count a cache miss.
	pub fn record_cache_miss(&self) {
		self.cache_misses.fetch_add(1, Ordering::Relaxed);
	}

	/// Count one upstream fetch and whether it failed.
	pub fn record_upstream(&self, failed: bool) {
		self.upstream_calls.fetch_add(1, Ordering::Relaxed);

		if failed {
			self.upstream_failures.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Take a point-in-time snapshot for the test-mode endpoint.
	pub fn snapshot(&self) -> GatewayCountersSnapshot {
		GatewayCountersSnapshot {
			requests: self.requests.load(Ordering::Relaxed),
			successes: self.successes.load(Ordering::Relaxed),
			errors: self.errors.load(Ordering::Relaxed),
			denials: self.denials.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			cache_stale: self.cache_stale.load(Ordering::Relaxed),
			cache_misses: self.cache_misses.load(Ordering::Relaxed),
			upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
			upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of the gateway counters.
#[allow(missing_docs)]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCountersSnapshot {
	pub requests: u64,
	pub successes: u64,
	pub errors: u64,
	pub denials: u64,
	pub cache_hits: u64,
	pub cache_stale: u64,
	pub cache_misses: u64,
	pub upstream_calls: u64,
	pub upstream_failures: u64,
}

#[cfg(test)]
mod tests {
	// std
	use std::borrow::Borrow;
	// crates.io
	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};
	// self
	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter
			.snapshot()
			.into_vec()
			.into_iter()
			.map(|(key, _, _, value)| (key, value))
			.collect()
	}

	fn counter_value(
		snapshot: &[(CompositeKey, DebugValue)],
		name: &str,
		labels: &[(&str, &str)],
	) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& labels_match(key, labels))
				.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> =
			key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels == expected_sorted
	}

	#[test]
	fn records_request_outcomes() {
		let snapshot = capture_metrics(|| {
			record_request("success");
			record_request("success");
			record_request("denied");
		});

		assert_eq!(
			counter_value(&snapshot, "weather_requests_total", &[("outcome", "success")]),
			2
		);
		assert_eq!(
			counter_value(&snapshot, "weather_requests_total", &[("outcome", "denied")]),
			1
		);
	}

	#[test]
	fn location_counter_honours_the_allow_list() {
		let tracked = vec!["seattle".to_owned()];
		let snapshot = capture_metrics(|| {
			record_location_request("seattle", &tracked);
			record_location_request("untracked", &tracked);
		});

		assert_eq!(
			counter_value(&snapshot, "weather_location_requests_total", &[("location", "seattle")]),
			1
		);
		assert_eq!(
			counter_value(
				&snapshot,
				"weather_location_requests_total",
				&[("location", "untracked")]
			),
			0
		);
	}

	#[test]
	fn counters_snapshot_reflects_recorded_outcomes() {
		let counters = GatewayCounters::new();

		counters.record_success();
		counters.record_error();
		counters.record_denial();
		counters.record_cache_hit();
		counters.record_cache_stale();
		counters.record_upstream(true);
		counters.record_upstream(false);

		let snapshot = counters.snapshot();

		assert_eq!(snapshot.requests, 3);
		assert_eq!(snapshot.successes, 1);
		assert_eq!(snapshot.errors, 1);
		assert_eq!(snapshot.denials, 1);
		assert_eq!(snapshot.cache_hits, 1);
		assert_eq!(snapshot.cache_stale, 1);
		assert_eq!(snapshot.upstream_calls, 2);
		assert_eq!(snapshot.upstream_failures, 1);
	}
}
