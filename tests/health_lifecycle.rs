//! Health classification and test-mode lifecycle actions, end to end.

mod common;

// std
use std::time::Duration;
// crates.io
use serde_json::{Value, json};
use wiremock::{
	Mock, ResponseTemplate,
	matchers::method,
};
// self
use common::{GatewayOptions, spawn_gateway};

fn healthy_upstream() -> ResponseTemplate {
	ResponseTemplate::new(200)
		.set_body_string(
			r#"{ "main": { "temp": 10.0, "humidity": 50 }, "weather": [{ "main": "Clear" }], "wind": { "speed": 1.0 }, "name": "London" }"#,
		)
		.insert_header("content-type", "application/json")
}

#[tokio::test]
async fn healthy_process_reports_ok() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET")).respond_with(healthy_upstream()).mount(&gateway.mock).await;

	gateway.runtime.traffic.record_success_n(10);

	let response = gateway.client.get(gateway.url("/health")).send().await.expect("request");

	assert_eq!(response.status(), 200);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["status"], "healthy");
	assert_eq!(body["service"], "weather-gateway");
	assert_eq!(body["checks"]["weatherApi"], "healthy");
	assert!(body.get("reason").is_none());
	assert!(
		body["checks"].get("cache").is_none(),
		"the in-memory backend has no configured ping"
	);
}

#[tokio::test]
async fn error_rate_breach_reports_degraded() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET")).respond_with(healthy_upstream()).mount(&gateway.mock).await;

	gateway.runtime.traffic.record_error_n(2);
	gateway.runtime.traffic.record_success();

	let response = gateway.client.get(gateway.url("/health")).send().await.expect("request");

	assert_eq!(response.status(), 503);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["status"], "degraded");
	assert_eq!(body["reason"], "error_rate_breach");
	// Either degraded cause marks the upstream check unhealthy.
	assert_eq!(body["checks"]["weatherApi"], "unhealthy");
}

#[tokio::test]
async fn invalid_api_key_reports_degraded_with_unhealthy_check() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(401))
		.mount(&gateway.mock)
		.await;

	let response = gateway.client.get(gateway.url("/health")).send().await.expect("request");

	assert_eq!(response.status(), 503);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["status"], "degraded");
	assert_eq!(body["reason"], "api_key_invalid");
	assert_eq!(body["checks"]["weatherApi"], "unhealthy");
}

#[tokio::test]
async fn shutting_down_outranks_every_other_condition() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	// No upstream mock at all: the credential probe would fail, but the
	// lifecycle flag is checked first and short-circuits it.
	gateway.runtime.traffic.record_error_n(50);
	gateway.runtime.lifecycle.begin_shutdown();

	let response = gateway.client.get(gateway.url("/health")).send().await.expect("request");

	assert_eq!(response.status(), 503);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["status"], "shutting-down");
	assert_eq!(body["reason"], "signal");
}

#[tokio::test]
async fn quiet_mature_process_reports_idle() {
	let gateway = spawn_gateway(GatewayOptions {
		health: weather_gateway::health::HealthPolicy {
			minimum_lifespan: Duration::ZERO,
			..GatewayOptions::default().health
		},
		..GatewayOptions::default()
	})
	.await;

	Mock::given(method("GET")).respond_with(healthy_upstream()).mount(&gateway.mock).await;

	let response = gateway.client.get(gateway.url("/health")).send().await.expect("request");

	assert_eq!(response.status(), 200);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["status"], "idle");
	assert_eq!(body["reason"], "low_traffic");
}

#[tokio::test]
async fn sustained_pressure_reports_overloaded() {
	let gateway = spawn_gateway(GatewayOptions {
		health: weather_gateway::health::HealthPolicy {
			rps: 1.,
			overload_window: Duration::from_secs(60),
			overload_threshold_pct: 80,
			..GatewayOptions::default().health
		},
		..GatewayOptions::default()
	})
	.await;

	Mock::given(method("GET")).respond_with(healthy_upstream()).mount(&gateway.mock).await;

	// Capacity is 1 rps * 60 s * 80% = 48 outcomes.
	gateway.runtime.traffic.record_success_n(49);

	let response = gateway.client.get(gateway.url("/health")).send().await.expect("request");

	assert_eq!(response.status(), 503);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["status"], "overloaded");
	assert_eq!(body["reason"], "overload_threshold");
}

#[tokio::test]
async fn error_injection_then_reset_round_trip() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET")).respond_with(healthy_upstream()).mount(&gateway.mock).await;

	let injected = gateway
		.client
		.post(gateway.url("/test/error"))
		.json(&json!({ "count": 3 }))
		.send()
		.await
		.expect("inject")
		.json::<Value>()
		.await
		.expect("inject body");

	assert_eq!(injected["injected"], 3);
	assert_eq!(injected["errorRatePct"], 100.);

	let degraded = gateway.client.get(gateway.url("/health")).send().await.expect("health");

	assert_eq!(degraded.status(), 503);

	let reset = gateway
		.client
		.post(gateway.url("/test/reset"))
		.send()
		.await
		.expect("reset");

	assert_eq!(reset.status(), 200);

	let healthy = gateway.client.get(gateway.url("/health")).send().await.expect("health");

	assert_eq!(healthy.status(), 200);
}

#[tokio::test]
async fn load_action_respects_the_limiter() {
	let gateway = spawn_gateway(GatewayOptions {
		rate_limit: Some((1., 2)),
		..GatewayOptions::default()
	})
	.await;
	let body = gateway
		.client
		.post(gateway.url("/test/load"))
		.json(&json!({ "count": 5 }))
		.send()
		.await
		.expect("load")
		.json::<Value>()
		.await
		.expect("load body");

	assert_eq!(body["accepted"], 2);
	assert_eq!(body["denied"], 3);
}

#[tokio::test]
async fn shutdown_action_flips_the_lifecycle_flag() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;
	let response = gateway
		.client
		.post(gateway.url("/test/shutdown"))
		.send()
		.await
		.expect("shutdown");

	assert_eq!(response.status(), 200);
	assert!(gateway.runtime.lifecycle.is_shutting_down());

	// New weather requests are no longer admitted to a 2xx.
	let rejected = gateway
		.client
		.get(gateway.url("/weather/seattle"))
		.send()
		.await
		.expect("request");

	assert_eq!(rejected.status(), 503);
}

#[tokio::test]
async fn fail_clear_walks_the_schedule_to_exhaustion() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;
	// Schedule for 60s..780s is [1, 2, 3, 5, 8, 13] minutes: six entries.
	let mut exhausted = false;

	for _ in 0..6 {
		let body = gateway
			.client
			.post(gateway.url("/test/fail_clear"))
			.send()
			.await
			.expect("fail_clear")
			.json::<Value>()
			.await
			.expect("body");

		exhausted = body["exhausted"].as_bool().expect("exhausted flag");
	}

	assert!(exhausted);
	assert!(gateway.runtime.lifecycle.is_shutting_down());

	// `clear` re-arms recovery; `reset` clears the shutdown flag too.
	gateway.client.post(gateway.url("/test/reset")).send().await.expect("reset");

	assert!(!gateway.runtime.lifecycle.is_shutting_down());
	assert_eq!(
		gateway.runtime.recovery.current_delay(),
		Some(Duration::from_secs(60))
	);
}

#[tokio::test]
async fn unknown_actions_answer_404() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;
	let response = gateway
		.client
		.post(gateway.url("/test/frobnicate"))
		.send()
		.await
		.expect("request");

	assert_eq!(response.status(), 404);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["error"]["code"], "UNKNOWN_ACTION");
}

#[tokio::test]
async fn metrics_endpoint_answers_exposition_text() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;
	let response = gateway.client.get(gateway.url("/metrics")).send().await.expect("request");

	assert_eq!(response.status(), 200);
}
