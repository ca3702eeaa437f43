//! Gateway configuration: defaults, environment layering, and validation.

// crates.io
use serde::Deserialize;
use url::Url;
// self
use crate::{_prelude::*, upstream::RetryPolicy};

/// Environment prefix for configuration overrides, e.g.
/// `WEATHER__UPSTREAM__API_KEY`.
const ENV_PREFIX: &str = "WEATHER";
/// Optional configuration file stem searched in the working directory.
const FILE_STEM: &str = "weather-gateway";

/// Cache backend selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
	/// Mutex-guarded in-process map.
	#[default]
	InMemory,
	/// Remote key-value server.
	Remote,
}

/// HTTP listener and request-scope settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	/// Listener port.
	pub port: u16,
	/// Per-request deadline in milliseconds.
	pub request_timeout_ms: u64,
	/// Emit JSON-formatted logs.
	pub log_json: bool,
}
impl ServerConfig {
	/// Per-request deadline.
	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}
}
impl Default for ServerConfig {
	fn default() -> Self {
		Self { port: 8080, request_timeout_ms: 10_000, log_json: false }
	}
}

/// Third-party weather API settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
	/// Endpoint answering current-weather queries.
	pub base_url: String,
	/// API key; supplied via the environment, never checked in.
	pub api_key: String,
	/// Per-attempt timeout in milliseconds.
	pub attempt_timeout_ms: u64,
	/// Total attempts including the first.
	pub retry_attempts: u32,
	/// Delay before the second attempt, in milliseconds.
	pub retry_base_delay_ms: u64,
	/// Backoff growth cap in milliseconds.
	pub retry_max_delay_ms: u64,
}
impl UpstreamConfig {
	/// Per-attempt timeout.
	pub fn attempt_timeout(&self) -> Duration {
		Duration::from_millis(self.attempt_timeout_ms)
	}

	/// Assembled retry policy.
	pub fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy {
			attempts: self.retry_attempts,
			base_delay: Duration::from_millis(self.retry_base_delay_ms),
			max_delay: Duration::from_millis(self.retry_max_delay_ms),
		}
	}
}
impl Default for UpstreamConfig {
	fn default() -> Self {
		Self {
			base_url: "https://api.openweathermap.org/data/2.5/weather".into(),
			api_key: String::new(),
			attempt_timeout_ms: 5_000,
			retry_attempts: 3,
			retry_base_delay_ms: 100,
			retry_max_delay_ms: 2_000,
		}
	}
}

/// Cache layer settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	/// Backend selector.
	pub backend: CacheBackend,
	/// Remote backend address.
	pub remote_addr: String,
	/// Remote operation timeout in milliseconds.
	pub remote_timeout_ms: u64,
	/// Remote idle-connection hint.
	pub remote_idle_connections: u32,
	/// Freshness TTL in seconds.
	pub ttl_secs: u64,
	/// Stale-while-error grace window in seconds; zero disables the fallback.
	pub stale_ttl_secs: u64,
}
impl CacheConfig {
	/// Remote operation timeout.
	pub fn remote_timeout(&self) -> Duration {
		Duration::from_millis(self.remote_timeout_ms)
	}

	/// Freshness TTL.
	pub fn ttl(&self) -> Duration {
		Duration::from_secs(self.ttl_secs)
	}

	/// Stale grace window.
	pub fn stale_ttl(&self) -> Duration {
		Duration::from_secs(self.stale_ttl_secs)
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			backend: CacheBackend::InMemory,
			remote_addr: "redis://127.0.0.1:6379".into(),
			remote_timeout_ms: 500,
			remote_idle_connections: 2,
			ttl_secs: 300,
			stale_ttl_secs: 3_600,
		}
	}
}

/// Single-flight coalescing settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoalesceConfig {
	/// Whether concurrent fetches for one key share a single execution.
	pub enabled: bool,
	/// Longest a waiter blocks on the in-flight fetch, in milliseconds.
	pub timeout_ms: u64,
}
impl CoalesceConfig {
	/// Waiter bound.
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}
}
impl Default for CoalesceConfig {
	fn default() -> Self {
		Self { enabled: true, timeout_ms: 10_000 }
	}
}

/// Token-bucket admission settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
	/// Refill rate per second; `<= 0` disables admission control.
	pub rps: f64,
	/// Bucket capacity.
	pub burst: u32,
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self { rps: 10., burst: 20 }
	}
}

/// Circuit breaker settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
	/// Whether the upstream call path is wrapped by a breaker.
	pub enabled: bool,
	/// Consecutive failures that trip the circuit.
	pub failure_threshold: u32,
	/// Half-open successes that restore it.
	pub success_threshold: u32,
	/// Open-state hold time in seconds.
	pub timeout_secs: u64,
}
impl BreakerConfig {
	/// Open-state hold time.
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}
}
impl Default for BreakerConfig {
	fn default() -> Self {
		Self { enabled: true, failure_threshold: 5, success_threshold: 2, timeout_secs: 30 }
	}
}

/// Health classification thresholds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
	/// Overload detection window in seconds.
	pub overload_window_secs: u64,
	/// Share of theoretical capacity that flags overload, in percent.
	pub overload_threshold_pct: u32,
	/// Error-ratio window in seconds.
	pub degraded_window_secs: u64,
	/// Error percentage that flags degradation.
	pub degraded_error_pct: u32,
	/// Idle detection window in seconds.
	pub idle_window_secs: u64,
	/// Request count below which the process is idle.
	pub idle_threshold: usize,
	/// Warm-up period before idle detection engages, in seconds.
	pub minimum_lifespan_secs: u64,
}
impl HealthConfig {
	/// Overload window.
	pub fn overload_window(&self) -> Duration {
		Duration::from_secs(self.overload_window_secs)
	}

	/// Degraded window.
	pub fn degraded_window(&self) -> Duration {
		Duration::from_secs(self.degraded_window_secs)
	}

	/// Idle window.
	pub fn idle_window(&self) -> Duration {
		Duration::from_secs(self.idle_window_secs)
	}

	/// Minimum lifespan.
	pub fn minimum_lifespan(&self) -> Duration {
		Duration::from_secs(self.minimum_lifespan_secs)
	}
}
impl Default for HealthConfig {
	fn default() -> Self {
		Self {
			overload_window_secs: 60,
			overload_threshold_pct: 80,
			degraded_window_secs: 60,
			degraded_error_pct: 50,
			idle_window_secs: 300,
			idle_threshold: 5,
			minimum_lifespan_secs: 600,
		}
	}
}

/// Degraded-recovery schedule settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
	/// First re-validation delay in seconds.
	pub initial_delay_secs: u64,
	/// Largest re-validation delay in seconds.
	pub max_delay_secs: u64,
}
impl RecoveryConfig {
	/// First delay.
	pub fn initial_delay(&self) -> Duration {
		Duration::from_secs(self.initial_delay_secs)
	}

	/// Delay cap.
	pub fn max_delay(&self) -> Duration {
		Duration::from_secs(self.max_delay_secs)
	}
}
impl Default for RecoveryConfig {
	fn default() -> Self {
		Self { initial_delay_secs: 60, max_delay_secs: 780 }
	}
}

/// Drain protocol deadlines.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
	/// Listener drain deadline in milliseconds.
	pub timeout_ms: u64,
	/// In-flight drain deadline in milliseconds.
	pub in_flight_timeout_ms: u64,
	/// In-flight poll interval in milliseconds.
	pub in_flight_check_interval_ms: u64,
}
impl ShutdownConfig {
	/// Listener drain deadline.
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}

	/// In-flight drain deadline.
	pub fn in_flight_timeout(&self) -> Duration {
		Duration::from_millis(self.in_flight_timeout_ms)
	}

	/// In-flight poll interval.
	pub fn in_flight_check_interval(&self) -> Duration {
		Duration::from_millis(self.in_flight_check_interval_ms)
	}
}
impl Default for ShutdownConfig {
	fn default() -> Self {
		Self { timeout_ms: 10_000, in_flight_timeout_ms: 30_000, in_flight_check_interval_ms: 100 }
	}
}

/// Hot-set prefetch settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct WarmConfig {
	/// Whether the warmer runs.
	pub enabled: bool,
	/// Locations to prefetch.
	pub keys: Vec<String>,
	/// Repeat interval in seconds.
	pub interval_secs: u64,
	/// Per-round time budget in milliseconds.
	pub budget_ms: u64,
}
impl WarmConfig {
	/// Repeat interval, defaulting to five minutes when unset.
	pub fn interval(&self) -> Duration {
		Duration::from_secs(if self.interval_secs == 0 { 300 } else { self.interval_secs })
	}

	/// Per-round budget, defaulting to ten seconds when unset.
	pub fn budget(&self) -> Duration {
		Duration::from_millis(if self.budget_ms == 0 { 10_000 } else { self.budget_ms })
	}
}

/// Complete gateway configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
	/// Listener settings.
	pub server: ServerConfig,
	/// Upstream API settings.
	pub upstream: UpstreamConfig,
	/// Cache settings.
	pub cache: CacheConfig,
	/// Coalescing settings.
	pub coalesce: CoalesceConfig,
	/// Admission settings.
	pub rate_limit: RateLimitConfig,
	/// Breaker settings.
	pub breaker: BreakerConfig,
	/// Health thresholds.
	pub health: HealthConfig,
	/// Recovery schedule.
	pub recovery: RecoveryConfig,
	/// Drain deadlines.
	pub shutdown: ShutdownConfig,
	/// Metrics cardinality allow-list for per-location counters.
	pub tracked_locations: Vec<String>,
	/// Prefetch settings.
	pub warm: WarmConfig,
	/// Expose the test-mode endpoints.
	pub testing: bool,
}
impl GatewayConfig {
	/// Layer defaults, an optional `weather-gateway` file, and `WEATHER__*`
	/// environment variables.
	pub fn load() -> Result<Self> {
		let raw = ::config::Config::builder()
			.add_source(::config::File::with_name(FILE_STEM).required(false))
			.add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
			.build()
			.map_err(config_error)?;
		let config: Self = raw.try_deserialize().map_err(config_error)?;

		config.validate()?;

		Ok(config)
	}

	/// Validate the documented constraints.
	pub fn validate(&self) -> Result<()> {
		let _: Url = self.upstream.base_url.parse()?;

		if self.upstream.api_key.is_empty() {
			return Err(Error::Validation {
				field: "upstream.api_key",
				reason: "Must be supplied via WEATHER__UPSTREAM__API_KEY.".into(),
			});
		}
		if self.upstream.attempt_timeout_ms < 100 {
			return Err(Error::Validation {
				field: "upstream.attempt_timeout_ms",
				reason: "Must be at least 100 ms.".into(),
			});
		}

		self.upstream.retry_policy().validate()?;

		if self.server.request_timeout_ms == 0 {
			return Err(Error::Validation {
				field: "server.request_timeout_ms",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.cache.ttl_secs == 0 {
			return Err(Error::Validation {
				field: "cache.ttl_secs",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.cache.backend == CacheBackend::Remote && self.cache.remote_addr.is_empty() {
			return Err(Error::Validation {
				field: "cache.remote_addr",
				reason: "Must be set when the remote backend is selected.".into(),
			});
		}
		if self.coalesce.enabled && self.coalesce.timeout_ms == 0 {
			return Err(Error::Validation {
				field: "coalesce.timeout_ms",
				reason: "Must be greater than zero when coalescing is enabled.".into(),
			});
		}
		if self.breaker.enabled && self.breaker.failure_threshold == 0 {
			return Err(Error::Validation {
				field: "breaker.failure_threshold",
				reason: "Must be at least 1.".into(),
			});
		}
		if self.health.overload_threshold_pct == 0 || self.health.overload_threshold_pct > 100 {
			return Err(Error::Validation {
				field: "health.overload_threshold_pct",
				reason: "Must be within 1..=100.".into(),
			});
		}
		if self.health.degraded_error_pct == 0 || self.health.degraded_error_pct > 100 {
			return Err(Error::Validation {
				field: "health.degraded_error_pct",
				reason: "Must be within 1..=100.".into(),
			});
		}
		if self.recovery.initial_delay_secs == 0 {
			return Err(Error::Validation {
				field: "recovery.initial_delay_secs",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.recovery.max_delay_secs < self.recovery.initial_delay_secs {
			return Err(Error::Validation {
				field: "recovery.max_delay_secs",
				reason: "Must be greater than or equal to initial_delay_secs.".into(),
			});
		}
		if self.shutdown.in_flight_check_interval_ms == 0 {
			return Err(Error::Validation {
				field: "shutdown.in_flight_check_interval_ms",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}

fn config_error(err: ::config::ConfigError) -> Error {
	Error::Validation { field: "config", reason: err.to_string() }
}
