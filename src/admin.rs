//! Admin HTTP surface (§6 "Metrics surface", ambient): Prometheus text
//! exposition plus a liveness probe, served on a separate listener from the
//! proxy hot path.
//!
//! Grounded on the teacher's `src/metrics.rs::App` (`Router::with_state`
//! wrapping an `Arc<Registry>`, `encode(&mut buffer, &registry)`) and on
//! `crates/agentgateway/src/ui.rs::add_cors_layer`, which opens up its own
//! operator-facing surface with a permissive CORS layer.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct App {
	registry: Arc<Registry>,
}

impl App {
	pub fn new(registry: Arc<Registry>) -> Self {
		App { registry }
	}

	pub fn router(&self) -> Router {
		Router::new()
			.route("/metrics", get(metrics_handler))
			.route("/healthz", get(health_handler))
			.layer(TraceLayer::new_for_http())
			.layer(CorsLayer::permissive())
			.with_state(self.clone())
	}
}

async fn metrics_handler(State(app): State<App>) -> Result<String, StatusCode> {
	let mut buffer = String::new();
	encode(&mut buffer, &app.registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
	Ok(buffer)
}

async fn health_handler() -> &'static str {
	"ok"
}
