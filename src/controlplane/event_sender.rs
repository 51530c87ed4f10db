//! Outbound HMAC-signed event push to the control plane (§4.10 Sender).
//!
//! Grounded on `original_source/admin/waf_gateway/app/telegram_client.py`:
//! the block event is signed and POSTed to `<backend>/api/v1/event`, keyed
//! by `license_key_hash` for routing.

use serde::Serialize;
use tracing::{debug, warn};

use super::hmac;

/// Outbound block-event body (§4.8 Notification, §6 event ingest).
#[derive(Debug, Clone, Serialize)]
pub struct Event {
	pub request_id: String,
	pub decision: String,
	pub suspected_param: String,
	pub category: Option<String>,
	pub endpoint: String,
	pub client_ip: String,
	pub reason: String,
	pub recommendation_ids: Vec<String>,
	pub stage: String,
	pub ml_label: Option<String>,
	pub ml_confidence: Option<f64>,
	pub license_key_hash: String,
}

/// Signs and posts a block event to the control plane. Failures are logged
/// and swallowed: notification is best-effort and must never affect the
/// client-facing decision (§4.9 ordering: event emission happens strictly
/// after the log write, off the hot path).
pub async fn send_event(http: &reqwest::Client, backend_url: &str, hmac_secret: &str, mut event: Event, license_key_hash: &str) {
	if backend_url.is_empty() || hmac_secret.is_empty() || license_key_hash.is_empty() {
		warn!("control plane not configured, skipping event notification");
		return;
	}
	event.license_key_hash = license_key_hash.to_string();

	let body = match serde_json::to_vec(&event) {
		Ok(body) => body,
		Err(e) => {
			warn!(error = %e, "failed to serialize outbound event");
			return;
		},
	};

	let timestamp = chrono::Utc::now().timestamp().to_string();
	let nonce = hmac::random_nonce();
	let signature = hmac::sign(hmac_secret, &timestamp, &nonce, &body);

	let url = format!("{}/api/v1/event", backend_url.trim_end_matches('/'));
	let result = http
		.post(&url)
		.timeout(std::time::Duration::from_secs(10))
		.header("X-Timestamp", &timestamp)
		.header("X-Nonce", &nonce)
		.header("X-Signature", &signature)
		.header("Content-Type", "application/json")
		.body(body)
		.send()
		.await;

	match result {
		Ok(response) => debug!(status = %response.status(), "event notification sent"),
		Err(e) => warn!(error = %e, "event notification failed"),
	}
}
