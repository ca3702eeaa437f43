//! Gateway entry point: wiring, signal handling, ordered shutdown.

// std
use std::sync::Arc;
// crates.io
use tokio::{net::TcpListener, signal, time};
// self
use weather_gateway::{
	Error, Result,
	breaker::CircuitBreaker,
	cache::{memory::InMemoryStore, remote::RedisStore, store::WeatherStore},
	coalesce::Coalescer,
	config::{CacheBackend, GatewayConfig},
	health::{HealthEvaluator, HealthPolicy},
	lifecycle::{LifecycleFlag, Runtime},
	metrics,
	ratelimit::RateLimiter,
	recovery::{RecoveryHandle, RecoveryLoop},
	server::{self, AppState},
	service::WeatherService,
	telemetry,
	upstream::UpstreamClient,
	warm::CacheWarmer,
};

#[tokio::main]
async fn main() {
	if let Err(err) = run().await {
		eprintln!("weather-gateway failed: {err}");
		std::process::exit(1);
	}
}

async fn run() -> Result<()> {
	let config = GatewayConfig::load()?;

	telemetry::init(config.server.log_json)?;
	metrics::install_default_exporter()?;

	let store: Arc<dyn WeatherStore> = match config.cache.backend {
		CacheBackend::InMemory => Arc::new(InMemoryStore::new()),
		CacheBackend::Remote => Arc::new(RedisStore::connect(
			&config.cache.remote_addr,
			config.cache.remote_timeout(),
			config.cache.remote_idle_connections,
		)?),
	};
	let mut upstream = UpstreamClient::new(
		config.upstream.base_url.parse()?,
		config.upstream.api_key.clone(),
		config.upstream.attempt_timeout(),
		config.upstream.retry_policy(),
	)?;

	if config.breaker.enabled {
		let breaker = CircuitBreaker::new(
			config.breaker.failure_threshold,
			config.breaker.success_threshold,
			config.breaker.timeout(),
		)
		.with_observer(|from, to| metrics::record_breaker_transition(from.as_str(), to.as_str()));

		upstream = upstream.with_breaker(Arc::new(breaker));
	}

	let upstream = Arc::new(upstream);
	let (recovery, recovery_signal) =
		RecoveryHandle::new(config.recovery.initial_delay(), config.recovery.max_delay());
	let runtime = Runtime::new(recovery.clone());
	let coalescer = config.coalesce.enabled.then(|| Coalescer::new(config.coalesce.timeout()));
	let service = Arc::new(WeatherService::new(
		store.clone(),
		upstream.clone(),
		coalescer,
		config.cache.ttl(),
		config.cache.stale_ttl(),
		runtime.counters.clone(),
	));
	let health = Arc::new(HealthEvaluator::new(HealthPolicy {
		overload_window: config.health.overload_window(),
		overload_threshold_pct: config.health.overload_threshold_pct,
		rps: config.rate_limit.rps,
		degraded_window: config.health.degraded_window(),
		degraded_error_pct: config.health.degraded_error_pct,
		idle_window: config.health.idle_window(),
		idle_threshold: config.health.idle_threshold,
		minimum_lifespan: config.health.minimum_lifespan(),
	}));
	let limiter = RateLimiter::new(config.rate_limit.rps, config.rate_limit.burst).map(Arc::new);

	{
		let validate_client = upstream.clone();

		tokio::spawn(RecoveryLoop::new(recovery.clone(), recovery_signal).run(
			runtime.clone(),
			move || {
				let client = validate_client.clone();

				async move { client.validate_api_key().await }
			},
		));
	}

	if config.warm.enabled && !config.warm.keys.is_empty() {
		let warmer = CacheWarmer::new(
			service.clone(),
			config.warm.keys.clone(),
			config.warm.budget(),
			config.warm.interval(),
		);

		tokio::spawn(warmer.run_periodic(runtime.lifecycle.clone()));
	}

	let state = AppState {
		service,
		runtime: runtime.clone(),
		limiter,
		upstream,
		store: store.clone(),
		health,
		request_timeout: config.server.request_timeout(),
		tracked_locations: Arc::new(config.tracked_locations.clone()),
		testing: config.testing,
	};
	let app = server::router(state);
	let listener = TcpListener::bind(("0.0.0.0", config.server.port)).await?;

	tracing::info!(port = config.server.port, testing = config.testing, "weather gateway listening");

	{
		let lifecycle = runtime.lifecycle.clone();

		tokio::spawn(async move {
			wait_for_signal().await;
			lifecycle.begin_shutdown();
		});
	}

	// The serve future drains once the lifecycle flag is observed; the test-mode
	// shutdown action funnels through the same flag as a real signal.
	let serve = axum::serve(listener, app)
		.with_graceful_shutdown(flag_observed(runtime.lifecycle.clone()));
	let mut serve_task = tokio::spawn(async move { serve.await });

	flag_observed(runtime.lifecycle.clone()).await;
	tracing::info!("draining HTTP listener");

	match time::timeout(config.shutdown.timeout(), &mut serve_task).await {
		Ok(joined) => {
			joined.map_err(|err| Error::Io(std::io::Error::other(err)))??;
		},
		Err(_) => {
			tracing::warn!(timeout = ?config.shutdown.timeout(), "listener drain deadline expired");
			serve_task.abort();
		},
	}

	match runtime
		.in_flight
		.wait_for_zero(
			config.shutdown.in_flight_timeout(),
			config.shutdown.in_flight_check_interval(),
		)
		.await
	{
		Ok(()) => tracing::info!("in-flight requests drained"),
		Err(_) => tracing::warn!(
			remaining = runtime.in_flight.count(),
			"in-flight drain deadline expired"
		),
	}

	tracing::info!("shutdown complete");
	telemetry::flush();
	drop(store);

	Ok(())
}

async fn flag_observed(lifecycle: Arc<LifecycleFlag>) {
	while !lifecycle.is_shutting_down() {
		time::sleep(std::time::Duration::from_millis(100)).await;
	}
}

async fn wait_for_signal() {
	#[cfg(unix)]
	{
		let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(terminate) => terminate,
			Err(err) => {
				tracing::warn!(error = %err, "SIGTERM handler unavailable; relying on ctrl-c");

				let _ = signal::ctrl_c().await;

				return;
			},
		};

		tokio::select! {
			_ = signal::ctrl_c() => {},
			_ = terminate.recv() => {},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = signal::ctrl_c().await;
	}
}
