//! Resilient weather lookup gateway — cache-fronted upstream client with single-flight
//! coalescing, circuit breaking, and health-state lifecycle management.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod breaker;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod ratelimit;
pub mod recovery;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod traffic;
pub mod upstream;
pub mod warm;

mod context;
mod error;
mod record;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
pub use crate::{
	context::RequestContext,
	error::{Error, Result},
	record::{CacheEntry, WeatherRecord},
};
