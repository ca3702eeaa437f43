//! Shared harness: a gateway wired against a mock upstream on an ephemeral port.

// std
use std::{net::SocketAddr, sync::Arc, time::Duration};
// crates.io
use tokio::net::TcpListener;
use wiremock::MockServer;
// self
use weather_gateway::{
	breaker::CircuitBreaker,
	cache::{memory::InMemoryStore, store::WeatherStore},
	coalesce::Coalescer,
	health::{HealthEvaluator, HealthPolicy},
	lifecycle::Runtime,
	ratelimit::RateLimiter,
	recovery::RecoveryHandle,
	server::{self, AppState},
	service::WeatherService,
	upstream::{RetryPolicy, UpstreamClient},
};

/// Knobs a test can turn before spawning the gateway.
pub struct GatewayOptions {
	pub ttl: Duration,
	pub stale_ttl: Duration,
	pub coalesce: bool,
	pub retry: RetryPolicy,
	pub rate_limit: Option<(f64, u32)>,
	pub breaker: Option<(u32, u32, Duration)>,
	pub health: HealthPolicy,
	pub request_timeout: Duration,
}
impl Default for GatewayOptions {
	fn default() -> Self {
		Self {
			ttl: Duration::from_secs(300),
			stale_ttl: Duration::from_secs(3_600),
			coalesce: true,
			retry: RetryPolicy {
				attempts: 3,
				base_delay: Duration::from_millis(10),
				max_delay: Duration::from_millis(100),
			},
			rate_limit: None,
			breaker: None,
			health: HealthPolicy {
				overload_window: Duration::from_secs(60),
				overload_threshold_pct: 80,
				rps: 10.,
				degraded_window: Duration::from_secs(60),
				degraded_error_pct: 50,
				idle_window: Duration::from_secs(300),
				idle_threshold: 5,
				minimum_lifespan: Duration::from_secs(600),
			},
			request_timeout: Duration::from_secs(10),
		}
	}
}

/// Running gateway plus the handles tests assert against.
pub struct TestGateway {
	pub addr: SocketAddr,
	pub client: reqwest::Client,
	pub mock: MockServer,
	pub runtime: Arc<Runtime>,
	pub store: Arc<InMemoryStore>,
}
impl TestGateway {
	/// URL of a gateway route.
	pub fn url(&self, path: &str) -> String {
		format!("http://{}{}", self.addr, path)
	}
}

/// Boot a gateway against a fresh mock upstream.
pub async fn spawn_gateway(options: GatewayOptions) -> TestGateway {
	let _ = tracing_subscriber::fmt::try_init();

	let mock = MockServer::start().await;
	let store = Arc::new(InMemoryStore::new());
	let dyn_store: Arc<dyn WeatherStore> = store.clone();
	let mut upstream = UpstreamClient::new(
		mock.uri().parse().expect("mock uri"),
		"test-api-key",
		Duration::from_secs(2),
		options.retry,
	)
	.expect("upstream client");

	if let Some((failures, successes, timeout)) = options.breaker {
		upstream = upstream.with_breaker(Arc::new(CircuitBreaker::new(failures, successes, timeout)));
	}

	let upstream = Arc::new(upstream);
	let (recovery, _signal) = RecoveryHandle::new(Duration::from_secs(60), Duration::from_secs(780));
	let runtime = Runtime::new(recovery);
	let coalescer = options.coalesce.then(|| Coalescer::new(Duration::from_secs(5)));
	let service = Arc::new(WeatherService::new(
		dyn_store.clone(),
		upstream.clone(),
		coalescer,
		options.ttl,
		options.stale_ttl,
		runtime.counters.clone(),
	));
	let limiter = options
		.rate_limit
		.and_then(|(rps, burst)| RateLimiter::new(rps, burst))
		.map(Arc::new);
	let state = AppState {
		service,
		runtime: runtime.clone(),
		limiter,
		upstream,
		store: dyn_store,
		health: Arc::new(HealthEvaluator::new(options.health)),
		request_timeout: options.request_timeout,
		tracked_locations: Arc::new(vec!["seattle".into(), "london".into()]),
		testing: true,
	};
	let app = server::router(state);
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("local addr");

	tokio::spawn(async move {
		let _ = axum::serve(listener, app).await;
	});

	TestGateway { addr, client: reqwest::Client::new(), mock, runtime, store }
}
