//! ML classifier client (§4.6): bounded concurrency, bounded wait queue, and a
//! two-state circuit breaker in front of the external classifier HTTP oracle.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Outbound ML request body (§6 "ML endpoint").
#[derive(Debug, Clone, Serialize)]
pub struct MlRequest {
	pub method: String,
	pub path: String,
	pub query: String,
	pub content_type: String,
	pub body: String,
}

/// Expected ML response shape.
#[derive(Debug, Clone, Deserialize)]
pub struct MlResponse {
	pub label: String,
	pub confidence: f64,
}

/// Why an ML call did not yield a classification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MlError {
	#[error("ml circuit breaker open")]
	CircuitOpen,
	#[error("ml request queue full")]
	QueueFull,
	#[error("ml transport error: {0}")]
	Transport(String),
	#[error("ml returned status {0}")]
	BadStatus(u16),
}

/// Bounded-concurrency, circuit-broken client for the ML classifier (§4.6).
pub struct MlClient {
	http: reqwest::Client,
	ai_url: String,
	timeout: Duration,
	semaphore: Semaphore,
	queue_limit: usize,
	pending_waiters: AtomicUsize,
	circuit_failures: u32,
	circuit_cooldown: Duration,
	failure_count: AtomicU32,
	/// Unix-epoch millis at which the circuit reopens for probing; 0 means closed.
	circuit_open_until_ms: AtomicI64,
}

impl MlClient {
	pub fn new(
		ai_url: String,
		timeout: Duration,
		concurrency: usize,
		queue_limit: usize,
		circuit_failures: u32,
		circuit_cooldown: Duration,
	) -> Self {
		MlClient {
			http: reqwest::Client::new(),
			ai_url,
			timeout,
			semaphore: Semaphore::new(concurrency),
			queue_limit,
			pending_waiters: AtomicUsize::new(0),
			circuit_failures,
			circuit_cooldown,
			failure_count: AtomicU32::new(0),
			circuit_open_until_ms: AtomicI64::new(0),
		}
	}

	fn now_ms() -> i64 {
		chrono::Utc::now().timestamp_millis()
	}

	/// Whether the breaker is currently open (for the admin metrics gauge).
	pub fn circuit_open(&self) -> bool {
		Self::now_ms() < self.circuit_open_until_ms.load(Ordering::SeqCst)
	}

	fn record_failure(&self) {
		let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
		if failures >= self.circuit_failures {
			let reopen_at = Self::now_ms() + self.circuit_cooldown.as_millis() as i64;
			self.circuit_open_until_ms.store(reopen_at, Ordering::SeqCst);
			self.failure_count.store(0, Ordering::SeqCst);
			warn!("ml circuit breaker opened");
		}
	}

	fn record_success(&self) {
		self.failure_count.store(0, Ordering::SeqCst);
	}

	/// Calls the ML classifier, respecting the circuit breaker, queue limit,
	/// and concurrency cap. Queue depth is checked before acquiring the
	/// semaphore so load sheds early (§5 "Resource bounds").
	pub async fn classify(&self, payload: &MlRequest) -> Result<MlResponse, MlError> {
		if self.circuit_open() {
			return Err(MlError::CircuitOpen);
		}
		if self.semaphore.available_permits() == 0 && self.pending_waiters.load(Ordering::SeqCst) >= self.queue_limit {
			return Err(MlError::QueueFull);
		}

		self.pending_waiters.fetch_add(1, Ordering::SeqCst);
		let result = self.call(payload).await;
		self.pending_waiters.fetch_sub(1, Ordering::SeqCst);

		match &result {
			Ok(_) => self.record_success(),
			Err(MlError::Transport(_) | MlError::BadStatus(_)) => self.record_failure(),
			Err(MlError::CircuitOpen | MlError::QueueFull) => {},
		}
		result
	}

	async fn call(&self, payload: &MlRequest) -> Result<MlResponse, MlError> {
		let _permit = self.semaphore.acquire().await.expect("semaphore not closed");
		let response = self
			.http
			.post(&self.ai_url)
			.timeout(self.timeout)
			.json(payload)
			.send()
			.await
			.map_err(|e| MlError::Transport(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			return Err(MlError::BadStatus(status.as_u16()));
		}
		let parsed = response
			.json::<MlResponse>()
			.await
			.map_err(|e| MlError::Transport(e.to_string()))?;
		debug!(label = %parsed.label, confidence = parsed.confidence, "ml classification");
		Ok(parsed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn payload() -> MlRequest {
		MlRequest {
			method: "GET".to_string(),
			path: "/x".to_string(),
			query: String::new(),
			content_type: String::new(),
			body: String::new(),
		}
	}

	#[tokio::test]
	async fn successful_call_resets_failure_count() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/analyze"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"label": "SQLI", "confidence": 0.9})))
			.mount(&server)
			.await;

		let client = MlClient::new(
			format!("{}/analyze", server.uri()),
			Duration::from_millis(500),
			4,
			32,
			5,
			Duration::from_secs(30),
		);
		let result = client.classify(&payload()).await.unwrap();
		assert_eq!(result.label, "SQLI");
	}

	#[tokio::test]
	async fn breaker_opens_after_consecutive_failures() {
		let server = MockServer::start().await;
		Mock::given(method("POST")).and(path("/analyze")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

		let client = MlClient::new(
			format!("{}/analyze", server.uri()),
			Duration::from_millis(500),
			4,
			32,
			3,
			Duration::from_secs(30),
		);
		for _ in 0..3 {
			assert!(matches!(client.classify(&payload()).await, Err(MlError::BadStatus(500))));
		}
		assert!(matches!(client.classify(&payload()).await, Err(MlError::CircuitOpen)));
	}

	#[tokio::test]
	async fn non_200_counts_as_failure() {
		let server = MockServer::start().await;
		Mock::given(method("POST")).and(path("/analyze")).respond_with(ResponseTemplate::new(503)).mount(&server).await;
		let client = MlClient::new(
			format!("{}/analyze", server.uri()),
			Duration::from_millis(500),
			4,
			32,
			5,
			Duration::from_secs(30),
		);
		let result = client.classify(&payload()).await;
		assert!(matches!(result, Err(MlError::BadStatus(503))));
	}
}
