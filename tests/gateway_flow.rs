//! End-to-end lookup flows: caching, coalescing, retries, stale fallback, shedding.

mod common;

// std
use std::time::Duration;
// crates.io
use serde_json::Value;
use wiremock::{
	Mock, ResponseTemplate,
	matchers::{method, query_param},
};
// self
use common::{GatewayOptions, spawn_gateway};

const SEATTLE_BODY: &str = r#"{
	"main": { "temp": 15.5, "humidity": 65 },
	"weather": [{ "main": "Clouds", "description": "scattered clouds" }],
	"wind": { "speed": 3.2 },
	"name": "Seattle"
}"#;

fn weather_response(body: &str) -> ResponseTemplate {
	ResponseTemplate::new(200)
		.set_body_string(body.to_owned())
		.insert_header("content-type", "application/json")
}

#[tokio::test]
async fn fetches_maps_and_caches_a_lookup() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET"))
		.and(query_param("q", "seattle"))
		.respond_with(weather_response(SEATTLE_BODY))
		.expect(1)
		.mount(&gateway.mock)
		.await;

	let first = gateway
		.client
		.get(gateway.url("/weather/Seattle"))
		.send()
		.await
		.expect("first request");

	assert_eq!(first.status(), 200);

	let body: Value = first.json().await.expect("body");

	assert_eq!(body["location"], "seattle");
	assert_eq!(body["temperature"], 15.5);
	assert_eq!(body["conditions"], "scattered clouds");
	assert_eq!(body["humidity"], 65);
	assert_eq!(body["windSpeed"], 3.2);
	assert!(body.get("stale").is_none(), "stale is omitted when false");

	// Within TTL the cache answers; the mock's expect(1) enforces no second call.
	let second = gateway
		.client
		.get(gateway.url("/weather/Seattle"))
		.send()
		.await
		.expect("second request");

	assert_eq!(second.status(), 200);

	let cached: Value = second.json().await.expect("body");

	assert_eq!(cached["temperature"], 15.5);

	gateway.mock.verify().await;
}

#[tokio::test]
async fn concurrent_lookups_coalesce_onto_one_upstream_call() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET"))
		.and(query_param("q", "london"))
		.respond_with(
			weather_response(
				r#"{ "main": { "temp": 9.0, "humidity": 80 }, "weather": [{ "main": "Rain" }], "wind": { "speed": 5.1 }, "name": "London" }"#,
			)
			.set_delay(Duration::from_millis(100)),
		)
		.expect(1)
		.mount(&gateway.mock)
		.await;

	let mut handles = Vec::new();

	for _ in 0..10 {
		let client = gateway.client.clone();
		let url = gateway.url("/weather/london");

		handles.push(tokio::spawn(async move {
			let response = client.get(url).send().await.expect("request");
			let status = response.status().as_u16();
			let body: Value = response.json().await.expect("body");

			(status, body)
		}));
	}

	let mut bodies = Vec::new();

	for handle in handles {
		let (status, body) = handle.await.expect("join");

		assert_eq!(status, 200);
		bodies.push(body);
	}

	for body in &bodies[1..] {
		assert_eq!(body["temperature"], bodies[0]["temperature"]);
		assert_eq!(body["location"], bodies[0]["location"]);
	}

	gateway.mock.verify().await;
}

#[tokio::test]
async fn exhausted_retries_answer_unavailable() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(500))
		.expect(3)
		.mount(&gateway.mock)
		.await;

	let response = gateway
		.client
		.get(gateway.url("/weather/nowhere"))
		.send()
		.await
		.expect("request");

	assert_eq!(response.status(), 503);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["error"]["code"], "UPSTREAM_UNAVAILABLE");
	assert!(!body["error"]["requestId"].as_str().expect("request id").is_empty());

	gateway.mock.verify().await;
}

#[tokio::test]
async fn not_found_locations_fail_without_retrying() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(404))
		.expect(1)
		.mount(&gateway.mock)
		.await;

	let response = gateway
		.client
		.get(gateway.url("/weather/atlantis"))
		.send()
		.await
		.expect("request");

	// Non-retryable upstream classifications collapse into 503 for clients.
	assert_eq!(response.status(), 503);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["error"]["code"], "UPSTREAM_UNAVAILABLE");

	gateway.mock.verify().await;
}

#[tokio::test]
async fn stale_record_serves_after_upstream_failure() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&gateway.mock)
		.await;

	// Seed the cache with an entry that expires almost immediately.
	{
		use weather_gateway::cache::store::WeatherStore;

		let record = weather_gateway::WeatherRecord {
			location: "seattle".into(),
			temperature: 15.5,
			conditions: "scattered clouds".into(),
			humidity: 65,
			wind_speed: 3.2,
			timestamp: chrono::Utc::now(),
			stale: false,
		};

		gateway
			.store
			.set("seattle", &record, Duration::from_millis(10))
			.await
			.expect("seed cache");
	}

	tokio::time::sleep(Duration::from_millis(30)).await;

	let response = gateway
		.client
		.get(gateway.url("/weather/seattle"))
		.send()
		.await
		.expect("request");

	assert_eq!(response.status(), 200);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["stale"], true);
	assert_eq!(body["temperature"], 15.5);
}

#[tokio::test]
async fn rate_limiter_sheds_past_the_burst() {
	let gateway = spawn_gateway(GatewayOptions {
		rate_limit: Some((1., 2)),
		..GatewayOptions::default()
	})
	.await;

	Mock::given(method("GET"))
		.respond_with(weather_response(SEATTLE_BODY))
		.mount(&gateway.mock)
		.await;

	let mut statuses = Vec::new();

	for _ in 0..3 {
		let response = gateway
			.client
			.get(gateway.url("/weather/x"))
			.send()
			.await
			.expect("request");

		statuses.push(response.status().as_u16());
	}

	assert_eq!(statuses, vec![200, 200, 429]);
	assert_eq!(gateway.runtime.traffic.denial_count(Duration::from_secs(60)), 1);

	let counters = gateway
		.client
		.get(gateway.url("/test"))
		.send()
		.await
		.expect("counters")
		.json::<Value>()
		.await
		.expect("counters body");

	assert_eq!(counters["denials"], 1);
}

#[tokio::test]
async fn invalid_locations_are_rejected_locally() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;
	let response = gateway
		.client
		.get(gateway.url("/weather/%20%20"))
		.send()
		.await
		.expect("request");

	assert_eq!(response.status(), 400);

	let body: Value = response.json().await.expect("body");

	assert_eq!(body["error"]["code"], "INVALID_LOCATION");
}

#[tokio::test]
async fn correlation_ids_echo_or_generate() {
	let gateway = spawn_gateway(GatewayOptions::default()).await;

	Mock::given(method("GET"))
		.respond_with(weather_response(SEATTLE_BODY))
		.mount(&gateway.mock)
		.await;

	let echoed = gateway
		.client
		.get(gateway.url("/weather/seattle"))
		.header("X-Correlation-ID", "abc-123")
		.send()
		.await
		.expect("request");

	assert_eq!(
		echoed.headers().get("x-correlation-id").and_then(|v| v.to_str().ok()),
		Some("abc-123")
	);

	let generated = gateway
		.client
		.get(gateway.url("/health"))
		.send()
		.await
		.expect("request");
	let header = generated
		.headers()
		.get("x-correlation-id")
		.and_then(|v| v.to_str().ok())
		.expect("generated id");

	assert!(!header.is_empty());
}
