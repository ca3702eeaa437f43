//! HTTP surface: routes, request scope middleware, envelopes, test-mode actions.

// crates.io
use axum::{
	Extension, Json, Router,
	extract::{Path, Request, State},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use http::{HeaderName, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	cache::store::WeatherStore,
	context::RequestContext,
	health::HealthEvaluator,
	lifecycle::Runtime,
	metrics,
	ratelimit::RateLimiter,
	service::{WeatherService, normalize_location},
	upstream::UpstreamClient,
};

/// Correlation header echoed on every response and forwarded upstream.
pub const CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");
/// Longest accepted raw location.
const MAX_LOCATION_LEN: usize = 128;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
	/// Lookup orchestrator.
	pub service: Arc<WeatherService>,
	/// Process-wide runtime singletons.
	pub runtime: Arc<Runtime>,
	/// Admission control; absent when disabled.
	pub limiter: Option<Arc<RateLimiter>>,
	/// Upstream client, used by the health evaluator's live probe.
	pub upstream: Arc<UpstreamClient>,
	/// Cache backend, used by the health evaluator's ping.
	pub store: Arc<dyn WeatherStore>,
	/// Health classifier.
	pub health: Arc<HealthEvaluator>,
	/// Per-request deadline applied by the scope middleware.
	pub request_timeout: Duration,
	/// Metrics cardinality allow-list.
	pub tracked_locations: Arc<Vec<String>>,
	/// Whether the test-mode endpoints are mounted.
	pub testing: bool,
}

/// Assemble the gateway router.
pub fn router(state: AppState) -> Router {
	let mut router = Router::new()
		.route("/weather/:location", get(weather))
		.route("/health", get(health))
		.route("/metrics", get(metrics_exposition));

	if state.testing {
		router = router.route("/test", get(test_counters)).route("/test/:action", post(test_action));
	}

	router.layer(middleware::from_fn_with_state(state.clone(), request_scope)).with_state(state)
}

/// Establish the request scope: correlation id, deadline, in-flight accounting.
async fn request_scope(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
	let correlation_id = request
		.headers()
		.get(&CORRELATION_HEADER)
		.and_then(|value| value.to_str().ok())
		.filter(|value| !value.is_empty())
		.map(str::to_owned)
		.unwrap_or_else(|| Uuid::new_v4().to_string());
	let ctx = RequestContext::new()
		.with_correlation_id(correlation_id.clone())
		.with_timeout(state.request_timeout);

	request.extensions_mut().insert(ctx);

	let _guard = state.runtime.in_flight.start();
	let mut response = next.run(request).await;

	if let Ok(value) = http::HeaderValue::from_str(&correlation_id) {
		response.headers_mut().insert(CORRELATION_HEADER, value);
	}

	response
}

async fn weather(
	State(state): State<AppState>,
	Extension(ctx): Extension<RequestContext>,
	Path(location): Path<String>,
) -> Response {
	if let Err(err) = validate_location(&location) {
		metrics::record_request("invalid");

		return error_response(&err, &ctx);
	}
	if state.runtime.lifecycle.is_shutting_down() {
		// The listener is already draining; reject keep-alive stragglers too.
		return envelope(
			StatusCode::SERVICE_UNAVAILABLE,
			"UPSTREAM_UNAVAILABLE",
			"Shutting down; new requests are not accepted.".into(),
			&ctx,
		);
	}
	if let Some(limiter) = &state.limiter
		&& !limiter.allow()
	{
		state.runtime.traffic.record_denied();
		state.runtime.counters.record_denial();
		metrics::record_rate_limit_denial();
		metrics::record_request("denied");

		return error_response(&Error::RateLimited, &ctx);
	}

	metrics::record_location_request(&normalize_location(&location), &state.tracked_locations);

	match state.service.get_weather(&ctx, &location).await {
		Ok(record) => {
			state.runtime.traffic.record_success();
			state.runtime.counters.record_success();
			metrics::record_request("success");

			(StatusCode::OK, Json(record)).into_response()
		},
		Err(err) => {
			state.runtime.traffic.record_error();
			state.runtime.counters.record_error();
			metrics::record_request("error");
			tracing::warn!(location = %location, kind = err.code(), error = %err, "weather lookup failed");

			error_response(&err, &ctx)
		},
	}
}

async fn health(State(state): State<AppState>) -> Response {
	let report = state.health.evaluate(&state.runtime, &state.upstream, state.store.as_ref()).await;

	(report.status.http_status(), Json(report)).into_response()
}

async fn metrics_exposition() -> Response {
	match metrics::prometheus_handle() {
		Some(handle) => handle.render().into_response(),
		None => (StatusCode::OK, String::new()).into_response(),
	}
}

async fn test_counters(State(state): State<AppState>) -> Response {
	Json(state.runtime.counters.snapshot()).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct TestActionBody {
	count: Option<usize>,
}

async fn test_action(
	State(state): State<AppState>,
	Extension(ctx): Extension<RequestContext>,
	Path(action): Path<String>,
	body: Option<Json<TestActionBody>>,
) -> Response {
	let count = body.and_then(|Json(body)| body.count).unwrap_or(1);
	let runtime = &state.runtime;

	match action.as_str() {
		"load" => {
			let (mut accepted, mut denied) = (0usize, 0usize);

			for _ in 0..count {
				let admitted = state.limiter.as_ref().is_none_or(|limiter| limiter.allow());

				if admitted {
					runtime.traffic.record_success();
					accepted += 1;
				} else {
					runtime.traffic.record_denied();
					denied += 1;
				}
			}

			Json(json!({ "action": "load", "accepted": accepted, "denied": denied }))
				.into_response()
		},
		"error" => {
			runtime.traffic.record_error_n(count);

			let (errors, total) = runtime.traffic.error_rate(state.health.degraded_window());
			let pct = if total == 0 { 0. } else { errors as f64 * 100. / total as f64 };

			Json(json!({ "action": "error", "injected": count, "errorRatePct": pct }))
				.into_response()
		},
		"reset" => {
			runtime.traffic.reset();
			runtime.recovery.reset();
			runtime.lifecycle.clear();

			Json(json!({ "action": "reset", "status": "ok" })).into_response()
		},
		"shutdown" => {
			runtime.lifecycle.begin_shutdown();

			Json(json!({ "action": "shutdown", "shuttingDown": true })).into_response()
		},
		"prevent_clear" => {
			runtime.recovery.set_disabled(true);

			Json(json!({ "action": "prevent_clear", "recoveryDisabled": true })).into_response()
		},
		"fail_clear" => {
			let exhausted = runtime.recovery.advance_failure();

			if exhausted {
				runtime.lifecycle.begin_shutdown();
			}

			Json(json!({ "action": "fail_clear", "exhausted": exhausted })).into_response()
		},
		"clear" => {
			runtime.traffic.reset();
			runtime.recovery.set_disabled(false);
			runtime.recovery.reset_cursor();

			Json(json!({ "action": "clear", "status": "ok" })).into_response()
		},
		unknown => envelope(
			StatusCode::NOT_FOUND,
			"UNKNOWN_ACTION",
			format!("Unknown test action {unknown:?}."),
			&ctx,
		),
	}
}

fn validate_location(raw: &str) -> Result<()> {
	let trimmed = raw.trim();

	if trimmed.is_empty()
		|| trimmed.len() > MAX_LOCATION_LEN
		|| trimmed.chars().any(char::is_control)
	{
		return Err(Error::InvalidLocation(raw.to_owned()));
	}

	Ok(())
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
	error: ErrorBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
	code: &'static str,
	message: String,
	request_id: String,
}

fn error_response(err: &Error, ctx: &RequestContext) -> Response {
	envelope(err.status(), err.code(), client_message(err), ctx)
}

fn envelope(status: StatusCode, code: &'static str, message: String, ctx: &RequestContext) -> Response {
	let body = ErrorEnvelope {
		error: ErrorBody {
			code,
			message,
			request_id: ctx.correlation_id().unwrap_or_default().to_owned(),
		},
	};

	(status, Json(body)).into_response()
}

/// Client-facing message; upstream kinds collapse into one line so internal
/// diagnostics never leak.
fn client_message(err: &Error) -> String {
	match err.root() {
		invalid @ Error::InvalidLocation(_) => invalid.to_string(),
		Error::RateLimited => "Rate limit exceeded.".into(),
		_ => "Weather lookup is temporarily unavailable.".into(),
	}
}
