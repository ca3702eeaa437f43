//! Upstream weather API client: retry with jitter, deadline propagation, breaker.

// crates.io
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tokio::time;
use url::Url;
// self
use crate::{
	_prelude::*,
	breaker::CircuitBreaker,
	context::RequestContext,
	metrics,
	record::WeatherRecord,
};

/// Floor applied to propagated per-attempt timeouts.
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(100);
/// Share of the caller's remaining budget granted to one attempt.
const DEADLINE_SHARE: f64 = 0.9;
/// Hard cap on the API-key validation probe.
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);
/// Location used by the validation probe.
const CANARY_LOCATION: &str = "london";

/// Retry configuration for upstream fetch attempts.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
	/// Total attempts including the first.
	pub attempts: u32,
	/// Delay before the second attempt.
	pub base_delay: Duration,
	/// Upper bound applied to exponential growth, before jitter.
	pub max_delay: Duration,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempts == 0 {
			return Err(Error::Validation {
				field: "retry.attempts",
				reason: "Must be at least 1.".into(),
			});
		}
		if self.base_delay.is_zero() {
			return Err(Error::Validation {
				field: "retry.base_delay",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_delay < self.base_delay {
			return Err(Error::Validation {
				field: "retry.max_delay",
				reason: "Must be greater than or equal to base_delay.".into(),
			});
		}

		Ok(())
	}

	/// Backoff before attempt `k + 1`: `min(base * 2^(k-1), max) + jitter`, with
	/// jitter uniform in `[0, 0.1 * delay)`.
	pub fn backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(32);
		let delay = self.base_delay.mul_f64(2f64.powi(exponent as i32)).min(self.max_delay);

		delay + random_jitter(delay.mul_f64(0.1))
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			attempts: 3,
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_secs(2),
		}
	}
}

/// Client for one third-party weather API endpoint.
#[derive(Debug)]
pub struct UpstreamClient {
	http: Client,
	base_url: Url,
	api_key: String,
	attempt_timeout: Duration,
	retry: RetryPolicy,
	breaker: Option<Arc<CircuitBreaker>>,
}
impl UpstreamClient {
	/// Build a client for `base_url` authenticated by `api_key`.
	pub fn new(
		base_url: Url,
		api_key: impl Into<String>,
		attempt_timeout: Duration,
		retry: RetryPolicy,
	) -> Result<Self> {
		retry.validate()?;

		let http = Client::builder()
			.user_agent(format!("weather-gateway/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self { http, base_url, api_key: api_key.into(), attempt_timeout, retry, breaker: None })
	}

	/// Wrap the whole retry loop in a circuit breaker.
	///
	/// The breaker treats one retry-exhausted fetch as one failure event, not
	/// one per attempt.
	pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
		self.breaker = Some(breaker);

		self
	}

	/// Fetch the current weather for a normalized location.
	#[tracing::instrument(skip(self, ctx), fields(correlation_id = ctx.correlation_id().unwrap_or_default()))]
	pub async fn current_weather(
		&self,
		ctx: &RequestContext,
		location: &str,
	) -> Result<WeatherRecord> {
		match &self.breaker {
			Some(breaker) => breaker.call(self.fetch_with_retry(ctx, location)).await,
			None => self.fetch_with_retry(ctx, location).await,
		}
	}

	/// Probe the API key with a single canary request under a hard cap.
	pub async fn validate_api_key(&self) -> Result<()> {
		let request = self
			.http
			.get(self.base_url.clone())
			.query(&[("q", CANARY_LOCATION), ("appid", self.api_key.as_str()), ("units", "metric")])
			.header(http::header::ACCEPT, "application/json")
			.timeout(VALIDATE_TIMEOUT);
		let response = request.send().await.map_err(map_transport_error(VALIDATE_TIMEOUT))?;
		let status = response.status();

		if status.is_success() {
			Ok(())
		} else if status == http::StatusCode::UNAUTHORIZED {
			Err(Error::InvalidApiKey)
		} else {
			Err(Error::HttpStatus { status, body: response.text().await.ok() })
		}
	}

	async fn fetch_with_retry(&self, ctx: &RequestContext, location: &str) -> Result<WeatherRecord> {
		let attempts = self.retry.attempts.max(1);
		let mut attempt = 0;

		loop {
			attempt += 1;

			let timeout = self.attempt_timeout_for(ctx);

			match self.attempt(ctx, location, timeout).await {
				Ok(record) => {
					metrics::record_upstream_attempt("success");

					return Ok(record);
				},
				Err(err) if !err.is_retryable() => {
					metrics::record_upstream_attempt("error");
					tracing::warn!(location, error = %err, "upstream fetch failed terminally");

					return Err(err);
				},
				Err(err) => {
					metrics::record_upstream_attempt("error");

					if attempt >= attempts {
						return Err(Error::Upstream {
							location: location.to_owned(),
							source: Box::new(err),
						});
					}

					let delay = self.retry.backoff(attempt);

					tracing::debug!(location, attempt, ?delay, error = %err, "retrying upstream fetch");
					metrics::record_upstream_retry();
					time::sleep(delay).await;
				},
			}
		}
	}

	async fn attempt(
		&self,
		ctx: &RequestContext,
		location: &str,
		attempt_timeout: Duration,
	) -> Result<WeatherRecord> {
		let mut request = self
			.http
			.get(self.base_url.clone())
			.query(&[("q", location), ("appid", self.api_key.as_str()), ("units", "metric")])
			.header(http::header::ACCEPT, "application/json")
			.timeout(attempt_timeout);

		if let Some(correlation_id) = ctx.correlation_id() {
			request = request.header("X-Correlation-ID", correlation_id);
		}

		let response = request.send().await.map_err(map_transport_error(attempt_timeout))?;
		let status = response.status();

		match status {
			status if status.is_success() => {
				let parsed: ApiResponse = response.json().await?;

				Ok(parsed.into_record(location))
			},
			http::StatusCode::UNAUTHORIZED => Err(Error::InvalidApiKey),
			http::StatusCode::NOT_FOUND => Err(Error::LocationNotFound(location.to_owned())),
			http::StatusCode::TOO_MANY_REQUESTS => Err(Error::UpstreamRateLimited),
			status => Err(Error::HttpStatus { status, body: response.text().await.ok() }),
		}
	}

	fn attempt_timeout_for(&self, ctx: &RequestContext) -> Duration {
		match ctx.remaining() {
			Some(remaining) => {
				metrics::record_deadline_propagated();

				propagated_timeout(self.attempt_timeout, remaining)
			},
			None => self.attempt_timeout,
		}
	}
}

/// Per-attempt timeout when the caller carries a deadline:
/// `min(configured, max(100ms, 0.9 * remaining))`.
fn propagated_timeout(configured: Duration, remaining: Duration) -> Duration {
	configured.min(remaining.mul_f64(DEADLINE_SHARE).max(MIN_ATTEMPT_TIMEOUT))
}

fn map_transport_error(attempt_timeout: Duration) -> impl Fn(reqwest::Error) -> Error {
	move |err| {
		if err.is_timeout() {
			Error::Timeout(attempt_timeout)
		} else {
			Error::Reqwest(err)
		}
	}
}

fn random_jitter(max: Duration) -> Duration {
	if max.is_zero() {
		return Duration::ZERO;
	}

	let mut rng = rand::rng();
	let jitter = rng.random_range(0.0..max.as_secs_f64());

	Duration::from_secs_f64(jitter)
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
	main: ApiMain,
	#[serde(default)]
	weather: Vec<ApiCondition>,
	#[serde(default)]
	wind: ApiWind,
	name: Option<String>,
}
impl ApiResponse {
	fn into_record(self, requested: &str) -> WeatherRecord {
		let conditions = self
			.weather
			.into_iter()
			.next()
			.map(|condition| condition.description.filter(|s| !s.is_empty()).unwrap_or(condition.main))
			.unwrap_or_default();
		let location = self
			.name
			.filter(|name| !name.is_empty())
			.unwrap_or_else(|| requested.to_owned())
			.to_lowercase();

		WeatherRecord {
			location,
			temperature: self.main.temp,
			conditions,
			humidity: self.main.humidity,
			wind_speed: self.wind.speed,
			timestamp: Utc::now(),
			stale: false,
		}
	}
}

#[derive(Debug, Deserialize)]
struct ApiMain {
	temp: f64,
	#[serde(default)]
	humidity: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ApiWind {
	#[serde(default)]
	speed: f64,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
	#[serde(default)]
	main: String,
	description: Option<String>,
}
