//! Inline reverse-proxy HTTP surface (§4.9): terminates every inbound
//! request, runs it through the decision engine, and either forwards it to
//! the upstream or returns a synthetic block/rate-limit response.
//!
//! Grounded on the teacher's `Router::with_state` admin-server shape
//! (`src/admin.rs`) generalized from a read-only status API to a full
//! forwarding proxy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::config::Config;
use crate::controlplane::{self, Event};
use crate::engine::{Decision, DecisionEngine};
use crate::integrity::JsonlLogger;
use crate::metrics::Metrics;

/// Response bodies larger than this are rejected before normalization runs,
/// bounding worst-case memory per request (§5 "Resource bounds").
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Response headers that must not be copied verbatim from the upstream hop
/// to the client hop (§4.9 "Header hygiene").
const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding", "te", "trailers", "upgrade"];

pub struct ProxyState {
	pub engine: DecisionEngine,
	pub logger: JsonlLogger,
	pub metrics: Metrics,
	pub http: reqwest::Client,
	pub upstream_url: String,
	pub telegram_backend_url: String,
	pub control_plane_hmac_secret: String,
	pub license_key_hash: String,
}

impl ProxyState {
	pub fn from_config(config: &Config, engine: DecisionEngine, metrics: Metrics) -> Self {
		ProxyState {
			engine,
			logger: JsonlLogger::new(config.log_path.clone(), config.hash_state_path.clone(), config.log_rotate_bytes, config.log_rotate_keep),
			metrics,
			http: reqwest::Client::builder().timeout(Duration::from_secs(10)).build().expect("client builds"),
			upstream_url: config.upstream_url.clone(),
			telegram_backend_url: config.telegram_backend_url.clone(),
			control_plane_hmac_secret: config.control_plane_hmac_secret.clone(),
			license_key_hash: config.license_key_hash.clone(),
		}
	}
}

#[derive(Clone)]
pub struct App {
	state: Arc<ProxyState>,
}

impl App {
	pub fn new(state: Arc<ProxyState>) -> Self {
		App { state }
	}

	pub fn router(&self) -> Router {
		Router::new().fallback(any(handle)).layer(TraceLayer::new_for_http()).with_state(self.clone())
	}
}

fn client_ip(headers: &HeaderMap, connect_info: Option<SocketAddr>) -> String {
	if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
		if let Some(first) = forwarded.split(',').next() {
			let trimmed = first.trim();
			if !trimmed.is_empty() {
				return trimmed.to_string();
			}
		}
	}
	connect_info.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
	headers.iter().map(|(name, value)| (name.as_str().to_string(), value.to_str().unwrap_or_default().to_string())).collect()
}

/// Derives cache and ML outcome counters from the log entry the engine
/// already produced: `stage` distinguishes a cache hit from a fresh
/// evaluation, and a non-empty `regex_hits` on a `regex`-stage entry means
/// ML was attempted but degraded (engine.rs only calls ML when hits fire).
fn record_cache_and_ml_metrics(metrics: &Metrics, log_entry: &crate::engine::LogEntry) {
	if log_entry.stage == "cache_hit" {
		metrics.cache_hits_total.inc();
		return;
	}
	metrics.cache_misses_total.inc();

	match log_entry.stage.as_str() {
		"regex+ml" => metrics.record_ml_outcome("success"),
		"regex" if !log_entry.regex_hits.is_empty() => metrics.record_ml_outcome("degraded"),
		_ => {},
	}
}

fn error_json(status: StatusCode, error: &str, request_id: &str, reason: &str, recommendation_ids: &[String]) -> Response {
	let body = serde_json::json!({
		"error": error,
		"request_id": request_id,
		"reason": reason,
		"recommendation_ids": recommendation_ids,
	});
	(status, Json(body)).into_response()
}

async fn handle(
	State(app): State<App>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Body,
) -> Response {
	let start = Instant::now();
	let ip = client_ip(&headers, Some(addr));
	let path = uri.path().to_string();
	let query = uri.query().unwrap_or("").to_string();
	let header_list = header_pairs(&headers);

	let body_bytes = match to_bytes(body, MAX_BODY_BYTES).await {
		Ok(bytes) => bytes,
		Err(e) => {
			warn!(error = %e, "request body too large or unreadable");
			return error_json(StatusCode::BAD_REQUEST, "bad_request", "", "body read error", &[]);
		},
	};

	let mut evaluation = app.state.engine.evaluate(method.as_str(), &path, &query, &header_list, &body_bytes, &ip).await;
	app.state.metrics.record_decision(evaluation.decision.as_str());
	record_cache_and_ml_metrics(&app.state.metrics, &evaluation.log_entry);
	app.state.metrics.breaker_open.set(app.state.engine.ml.circuit_open() as i64);

	let response = match evaluation.decision {
		Decision::Block => {
			evaluation.log_entry.status_code = StatusCode::FORBIDDEN.as_u16();
			error_json(
				StatusCode::FORBIDDEN,
				"blocked",
				&evaluation.log_entry.request_id,
				&evaluation.reason,
				&evaluation.log_entry.recommendation_ids,
			)
		},
		Decision::RateLimit => {
			evaluation.log_entry.status_code = StatusCode::TOO_MANY_REQUESTS.as_u16();
			error_json(StatusCode::TOO_MANY_REQUESTS, "rate_limited", &evaluation.log_entry.request_id, &evaluation.reason, &[])
		},
		Decision::Allow => match forward(&app.state, &method, &path, &query, &headers, body_bytes).await {
			Ok(mut resp) => {
				evaluation.log_entry.status_code = resp.status().as_u16();
				resp.headers_mut().insert(
					HeaderName::from_static("x-request-id"),
					HeaderValue::from_str(&evaluation.log_entry.request_id).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
				);
				resp
			},
			Err(e) => {
				error!(error = %e, "upstream request failed");
				evaluation.log_entry.status_code = StatusCode::BAD_GATEWAY.as_u16();
				error_json(StatusCode::BAD_GATEWAY, "upstream_unavailable", &evaluation.log_entry.request_id, "upstream unavailable", &[])
			},
		},
	};

	evaluation.log_entry.latency_ms = start.elapsed().as_millis() as u64;
	let request_id = evaluation.log_entry.request_id.clone();
	let decision = evaluation.decision;
	let category = crate::engine::event_category(&evaluation.log_entry.regex_hits, evaluation.log_entry.ml_label.as_deref());
	let suspected_param = evaluation.log_entry.suspected_param.clone();
	let recommendation_ids = evaluation.log_entry.recommendation_ids.clone();
	let reason = evaluation.reason.clone();
	let stage = evaluation.log_entry.stage.clone();
	let ml_label = evaluation.log_entry.ml_label.clone();
	let ml_confidence = evaluation.log_entry.ml_confidence;

	if let Err(e) = app.state.logger.write(&evaluation.log_entry) {
		error!(error = %e, "failed to append audit log entry");
	} else {
		app.state.metrics.log_appends_total.inc();
	}

	// Event emission happens strictly after the log write and never blocks
	// the response that already left on `response` above (§4.9 ordering).
	if decision == Decision::Block {
		let event = Event {
			request_id,
			decision: decision.as_str().to_string(),
			suspected_param,
			category,
			endpoint: path,
			client_ip: ip,
			reason,
			recommendation_ids,
			stage,
			ml_label,
			ml_confidence,
			license_key_hash: String::new(),
		};
		controlplane::send_event(&app.state.http, &app.state.telegram_backend_url, &app.state.control_plane_hmac_secret, event, &app.state.license_key_hash)
			.await;
	}

	response
}

async fn forward(state: &ProxyState, method: &Method, path: &str, query: &str, headers: &HeaderMap, body: axum::body::Bytes) -> Result<Response, reqwest::Error> {
	let mut url = format!("{}{}", state.upstream_url.trim_end_matches('/'), path);
	if !query.is_empty() {
		url.push('?');
		url.push_str(query);
	}

	let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);
	let mut builder = state.http.request(reqwest_method, &url).timeout(Duration::from_secs(10));
	for (name, value) in headers.iter() {
		if name.as_str().eq_ignore_ascii_case("host") {
			continue;
		}
		builder = builder.header(name.as_str(), value.as_bytes());
	}
	let upstream_response = builder.body(body).send().await?;

	let status = StatusCode::from_u16(upstream_response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
	let mut response_headers = HeaderMap::new();
	for (name, value) in upstream_response.headers().iter() {
		if HOP_BY_HOP.contains(&name.as_str().to_lowercase().as_str()) {
			continue;
		}
		if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_str().as_bytes()), HeaderValue::from_bytes(value.as_bytes())) {
			response_headers.insert(name, value);
		}
	}

	let body_bytes = upstream_response.bytes().await?;
	let mut response = Response::new(Body::from(body_bytes));
	*response.status_mut() = status;
	*response.headers_mut() = response_headers;
	Ok(response)
}
