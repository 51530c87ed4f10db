//! Control-plane HTTP surface (§4.10 Ingest, §6): event ingest, command
//! pull/ack, and an operator endpoint standing in for the out-of-scope
//! chat-bot front end (§4.10 "operator surface").
//!
//! Grounded on the teacher's admin-server shape (`src/admin.rs`:
//! `Router::new().route(...).with_state(self.clone())`) and on
//! `original_source/admin/telegram_backend/app/events.py` /
//! `hmac_security.py` for the exact validation order.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::hmac;
use super::store::{hash_license_key, Store};
use crate::error::IngestError;

pub struct ControlPlaneState {
	pub store: Store,
	pub hmac_secret: String,
	pub timestamp_skew_sec: i64,
	pub http: reqwest::Client,
}

#[derive(Clone)]
pub struct App {
	state: Arc<ControlPlaneState>,
}

impl App {
	pub fn new(state: Arc<ControlPlaneState>) -> Self {
		App { state }
	}

	pub fn router(&self) -> Router {
		Router::new()
			.route("/health", get(health))
			.route("/api/v1/event", post(ingest_event))
			.route("/api/v1/commands/pull", get(pull_commands))
			.route("/api/v1/commands/ack", post(ack_commands))
			.route("/api/v1/licenses/activate", post(activate_license))
			.route("/api/v1/commands/enqueue", post(enqueue_command))
			.layer(TraceLayer::new_for_http())
			.with_state(self.clone())
	}
}

async fn health() -> &'static str {
	"ok"
}

fn error_response(err: IngestError) -> Response {
	warn!(detail = err.detail(), "control-plane request rejected");
	(err.status(), Json(serde_json::json!({ "detail": err.detail() }))).into_response()
}

/// Validates the HMAC headers in order: presence, timestamp skew, replay,
/// signature (§4.10, §8 "HMAC/Replay": skew is checked before replay so an
/// old-but-never-seen nonce is rejected for skew, not replay).
fn verify_hmac(state: &ControlPlaneState, headers: &HeaderMap, body: &[u8]) -> Result<(), IngestError> {
	let timestamp = headers.get("x-timestamp").and_then(|v| v.to_str().ok()).ok_or(IngestError::MissingHeaders)?;
	let nonce = headers.get("x-nonce").and_then(|v| v.to_str().ok()).ok_or(IngestError::MissingHeaders)?;
	let signature = headers.get("x-signature").and_then(|v| v.to_str().ok()).ok_or(IngestError::MissingHeaders)?;

	let ts: i64 = timestamp.parse().map_err(|_| IngestError::InvalidTimestamp)?;
	let now = chrono::Utc::now().timestamp();
	if (now - ts).abs() > state.timestamp_skew_sec {
		return Err(IngestError::TimestampSkew);
	}

	state.store.check_and_store_nonce(nonce)?;

	if !hmac::verify(&state.hmac_secret, timestamp, nonce, body, signature) {
		return Err(IngestError::InvalidSignature);
	}
	Ok(())
}

async fn ingest_event(State(app): State<App>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
	if let Err(e) = verify_hmac(&app.state, &headers, &body) {
		return error_response(e);
	}

	let payload: Value = match serde_json::from_slice(&body) {
		Ok(v) => v,
		Err(_) => return error_response(IngestError::BadJson),
	};

	let Some(license_hash) = payload.get("license_key_hash").and_then(Value::as_str) else {
		return error_response(IngestError::MissingLicense);
	};

	let Some(_chat_id) = app.state.store.chat_for_license(license_hash) else {
		return error_response(IngestError::LicenseNotActivated);
	};

	app.state.store.record_audit(
		"event",
		&serde_json::json!({
			"license_hash": &license_hash[..license_hash.len().min(16)],
			"request_id": payload.get("request_id"),
			"decision": payload.get("decision"),
		})
		.to_string(),
	);

	info!(decision = ?payload.get("decision"), "block event ingested");
	(StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

#[derive(Debug, Deserialize)]
struct PullQuery {
	license_key_hash: String,
	#[serde(default)]
	cursor: u64,
}

#[derive(Debug, Serialize)]
struct PullResponseBody {
	commands: Vec<super::store::Command>,
	cursor: u64,
}

async fn pull_commands(State(app): State<App>, Query(query): Query<PullQuery>) -> Json<PullResponseBody> {
	let (commands, cursor) = app.state.store.pull_commands(&query.license_key_hash, query.cursor);
	Json(PullResponseBody { commands, cursor })
}

#[derive(Debug, Deserialize)]
struct AckBody {
	ids: Vec<u64>,
}

async fn ack_commands(State(app): State<App>, Json(body): Json<AckBody>) -> Json<Value> {
	app.state.store.ack_commands(&body.ids);
	Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct ActivateBody {
	license_key: String,
	chat_id: i64,
}

/// Operator surface: binds (or confirms) a license to a chat id, standing in
/// for the out-of-scope chat-bot activation flow (§4.10).
async fn activate_license(State(app): State<App>, Json(body): Json<ActivateBody>) -> Response {
	let license_hash = hash_license_key(&body.license_key);
	app.state.store.register_license(&license_hash);
	let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
	match app.state.store.activate_license(&license_hash, body.chat_id, &now) {
		Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "activated", "license_hash": license_hash }))).into_response(),
		Err(e) => error_response(e),
	}
}

#[derive(Debug, Deserialize)]
struct EnqueueBody {
	license_key_hash: String,
	command_type: String,
	#[serde(default)]
	payload: Value,
}

async fn enqueue_command(State(app): State<App>, Json(body): Json<EnqueueBody>) -> Json<Value> {
	let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
	let id = app.state.store.enqueue_command(&body.license_key_hash, &body.command_type, body.payload, &now);
	Json(serde_json::json!({ "status": "queued", "id": id }))
}

/// Builds the control-plane state with a default 10 s HTTP client timeout
/// for the operator surface's own outbound calls (none in v1, reserved for
/// forwarding to a real chat backend).
pub fn default_http_client() -> reqwest::Client {
	reqwest::Client::builder().timeout(Duration::from_secs(10)).build().expect("client builds")
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::Body;
	use axum::http::Request;
	use tower::ServiceExt;

	fn state() -> Arc<ControlPlaneState> {
		Arc::new(ControlPlaneState {
			store: Store::new(Duration::from_secs(300)),
			hmac_secret: "secret".to_string(),
			timestamp_skew_sec: 300,
			http: default_http_client(),
		})
	}

	#[tokio::test]
	async fn event_without_headers_is_rejected() {
		let app = App::new(state());
		let response = app.router().oneshot(Request::post("/api/v1/event").body(Body::from("{}")).unwrap()).await.unwrap();
		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn event_with_valid_hmac_but_unactivated_license_is_401() {
		let st = state();
		let body = serde_json::json!({"license_key_hash": "deadbeef", "request_id": "r1", "decision": "block"});
		let body_bytes = serde_json::to_vec(&body).unwrap();
		let ts = chrono::Utc::now().timestamp().to_string();
		let nonce = hmac::random_nonce();
		let sig = hmac::sign(&st.hmac_secret, &ts, &nonce, &body_bytes);

		let app = App::new(st);
		let response = app
			.router()
			.oneshot(
				Request::post("/api/v1/event")
					.header("X-Timestamp", ts)
					.header("X-Nonce", nonce)
					.header("X-Signature", sig)
					.header("content-type", "application/json")
					.body(Body::from(body_bytes))
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn event_succeeds_once_license_activated() {
		let st = state();
		let hash = hash_license_key("plainkey");
		st.store.register_license(&hash);
		st.store.activate_license(&hash, 42, "t").unwrap();

		let body = serde_json::json!({"license_key_hash": hash, "request_id": "r1", "decision": "block"});
		let body_bytes = serde_json::to_vec(&body).unwrap();
		let ts = chrono::Utc::now().timestamp().to_string();
		let nonce = hmac::random_nonce();
		let sig = hmac::sign(&st.hmac_secret, &ts, &nonce, &body_bytes);

		let app = App::new(st);
		let response = app
			.router()
			.oneshot(
				Request::post("/api/v1/event")
					.header("X-Timestamp", ts)
					.header("X-Nonce", nonce)
					.header("X-Signature", sig)
					.header("content-type", "application/json")
					.body(Body::from(body_bytes))
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn replayed_nonce_rejected_before_being_reused() {
		let st = state();
		let hash = hash_license_key("plainkey");
		st.store.register_license(&hash);
		st.store.activate_license(&hash, 42, "t").unwrap();

		let body = serde_json::json!({"license_key_hash": hash});
		let body_bytes = serde_json::to_vec(&body).unwrap();
		let ts = chrono::Utc::now().timestamp().to_string();
		let nonce = hmac::random_nonce();
		let sig = hmac::sign(&st.hmac_secret, &ts, &nonce, &body_bytes);

		let app = App::new(st);
		let router = app.router();

		let first = router
			.clone()
			.oneshot(
				Request::post("/api/v1/event")
					.header("X-Timestamp", ts.clone())
					.header("X-Nonce", nonce.clone())
					.header("X-Signature", sig.clone())
					.body(Body::from(body_bytes.clone()))
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(first.status(), StatusCode::OK);

		let second = router
			.oneshot(
				Request::post("/api/v1/event")
					.header("X-Timestamp", ts)
					.header("X-Nonce", nonce)
					.header("X-Signature", sig)
					.body(Body::from(body_bytes))
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn license_activation_endpoint_binds_chat_id() {
		let st = state();
		let app = App::new(st.clone());
		let router = app.router();

		let body = serde_json::to_vec(&serde_json::json!({"license_key": "key-a", "chat_id": 7})).unwrap();
		let response = router
			.oneshot(Request::post("/api/v1/licenses/activate").header("content-type", "application/json").body(Body::from(body)).unwrap())
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(st.store.chat_for_license(&hash_license_key("key-a")), Some(7));
	}

	#[tokio::test]
	async fn enqueue_then_pull_returns_the_command() {
		let st = state();
		let app = App::new(st);
		let router = app.router();

		let body = serde_json::to_vec(&serde_json::json!({
			"license_key_hash": "hash1",
			"command_type": "block_ip",
			"payload": {"ip": "9.9.9.9"}
		}))
		.unwrap();
		let enqueue = router
			.clone()
			.oneshot(Request::post("/api/v1/commands/enqueue").header("content-type", "application/json").body(Body::from(body)).unwrap())
			.await
			.unwrap();
		assert_eq!(enqueue.status(), StatusCode::OK);

		let pull = router.oneshot(Request::get("/api/v1/commands/pull?license_key_hash=hash1&cursor=0").body(Body::empty()).unwrap()).await.unwrap();
		assert_eq!(pull.status(), StatusCode::OK);
	}
}
