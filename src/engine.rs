//! Decision engine (§4.8): orchestrates the blocklist, rate limiter, regex
//! engine, decision cache, and ML client into a single terminal decision per
//! request.

use std::sync::RwLock;

use rand::RngCore;
use serde::Serialize;
use tracing::instrument;

use crate::blocklist::IpBlocklist;
use crate::cache::{CachedDecision, DecisionCache};
use crate::fingerprint::build_fingerprint;
use crate::ml::{MlClient, MlError, MlRequest};
use crate::normalize::{self, NormalizedRequest};
use crate::ratelimit::RateLimiter;
use crate::recommendations::map_recommendations;
use crate::rules::{Hit, RuleSet};

/// Terminal decision reached for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
	Allow,
	Block,
	RateLimit,
}

impl Decision {
	pub fn as_str(&self) -> &'static str {
		match self {
			Decision::Allow => "allow",
			Decision::Block => "block",
			Decision::RateLimit => "rate_limit",
		}
	}
}

/// The audit-log record for one request (§3 LogEntry), sans the chain fields
/// which [`crate::integrity::JsonlLogger`] fills in on write.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
	pub timestamp_utc: String,
	pub request_id: String,
	pub client_ip: String,
	pub method: String,
	pub path: String,
	pub query: String,
	pub decision: String,
	pub status_code: u16,
	pub latency_ms: u64,
	pub stage: String,
	pub reason: String,
	pub regex_score: u32,
	pub regex_hits: Vec<Hit>,
	pub ml_label: Option<String>,
	pub ml_confidence: Option<f64>,
	pub suspected_param: String,
	pub endpoint: String,
	pub recommendation_ids: Vec<String>,
	pub body_len: usize,
}

/// Result of [`DecisionEngine::evaluate`]: the terminal decision, the log
/// entry ready to be written, and an outbound control-plane event when the
/// decision is a block.
pub struct Evaluation {
	pub decision: Decision,
	pub log_entry: LogEntry,
	pub reason: String,
}

const MAX_QUERY_LOG_LEN: usize = 256;

fn truncate_query(query: &str) -> String {
	if query.chars().count() > MAX_QUERY_LOG_LEN {
		let truncated: String = query.chars().take(MAX_QUERY_LOG_LEN).collect();
		format!("{truncated}...")
	} else {
		query.to_string()
	}
}

fn random_request_id() -> String {
	let mut bytes = [0u8; 16];
	rand::rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

fn now_rfc3339() -> String {
	chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Orchestrates the full request decision pipeline (§4.8).
pub struct DecisionEngine {
	pub rules: RwLock<RuleSet>,
	pub blocklist: IpBlocklist,
	pub rate_limiter: RateLimiter,
	pub cache: DecisionCache,
	pub ml: MlClient,
	body_truncate: usize,
	decode_rounds: u32,
}

impl DecisionEngine {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		rules: RuleSet,
		blocklist: IpBlocklist,
		rate_limiter: RateLimiter,
		cache: DecisionCache,
		ml: MlClient,
		body_truncate: usize,
		decode_rounds: u32,
	) -> Self {
		DecisionEngine {
			rules: RwLock::new(rules),
			blocklist,
			rate_limiter,
			cache,
			ml,
			body_truncate,
			decode_rounds,
		}
	}

	fn normalize(
		&self,
		method: &str,
		path: &str,
		query: &str,
		headers: &[(String, String)],
		body: &[u8],
	) -> NormalizedRequest {
		normalize::normalize_request(method, path, query, headers, body, self.body_truncate, self.decode_rounds)
	}

	fn base_log_entry(
		&self,
		request_id: String,
		client_ip: &str,
		normalized: &NormalizedRequest,
		decision: Decision,
		stage: &str,
		reason: &str,
		regex_score: u32,
		hits: Vec<Hit>,
		suspected_param: String,
		ml_label: Option<String>,
		ml_confidence: Option<f64>,
		recommendation_ids: Vec<String>,
	) -> LogEntry {
		LogEntry {
			timestamp_utc: now_rfc3339(),
			request_id,
			client_ip: client_ip.to_string(),
			method: normalized.method.clone(),
			path: normalized.path.clone(),
			query: truncate_query(&normalized.query),
			decision: decision.as_str().to_string(),
			status_code: 0,
			latency_ms: 0,
			stage: stage.to_string(),
			reason: reason.to_string(),
			regex_score,
			regex_hits: hits,
			ml_label,
			ml_confidence,
			suspected_param,
			endpoint: normalized.path.clone(),
			recommendation_ids,
			body_len: normalized.body_len,
		}
	}

	/// Runs the full decision pipeline for a single request (§4.8 steps 1-8).
	#[instrument(skip(self, headers, body), fields(client_ip))]
	pub async fn evaluate(
		&self,
		method: &str,
		path: &str,
		query: &str,
		headers: &[(String, String)],
		body: &[u8],
		client_ip: &str,
	) -> Evaluation {
		let request_id = random_request_id();
		let normalized = self.normalize(method, path, query, headers, body);

		if self.blocklist.is_blocked(client_ip) {
			let log_entry = self.base_log_entry(
				request_id,
				client_ip,
				&normalized,
				Decision::Block,
				"blocked",
				"ip block",
				0,
				Vec::new(),
				"unknown".to_string(),
				None,
				None,
				Vec::new(),
			);
			return Evaluation { decision: Decision::Block, reason: "ip block".to_string(), log_entry };
		}

		if !self.rate_limiter.allow(client_ip, false) {
			let log_entry = self.base_log_entry(
				request_id,
				client_ip,
				&normalized,
				Decision::RateLimit,
				"rate_limit",
				"rate limit",
				0,
				Vec::new(),
				"unknown".to_string(),
				None,
				None,
				Vec::new(),
			);
			return Evaluation { decision: Decision::RateLimit, reason: "rate limit".to_string(), log_entry };
		}

		let analysis = self.rules.read().expect("rules lock").analyze(&normalized);
		let mut categories = analysis.categories.clone();
		let mut recommendation_ids = map_recommendations(&categories);

		let fingerprint = build_fingerprint(&normalized.method, &normalized.path, &normalized.query, &normalized.content_type, &normalized.body);

		if let Some(cached) = self.cache.get(&fingerprint) {
			let decision = parse_decision(&cached.decision);
			let log_entry = self.base_log_entry(
				request_id,
				client_ip,
				&normalized,
				decision,
				"cache_hit",
				"cache",
				analysis.score,
				analysis.hits,
				analysis.suspected_param,
				cached.ml_label.clone(),
				cached.ml_confidence,
				recommendation_ids,
			);
			return Evaluation { decision, reason: "cache".to_string(), log_entry };
		}

		if analysis.score > 0 && !analysis.hits.is_empty() {
			let ml_payload = MlRequest {
				method: normalized.method.clone(),
				path: normalized.path.clone(),
				query: normalized.query.clone(),
				content_type: normalized.content_type.clone(),
				body: normalized.body.chars().take(2048).collect(),
			};

			match self.ml.classify(&ml_payload).await {
				Ok(result) => {
					let stage = "regex+ml";
					let (reason, ml_label) = if result.label != "BENIGN" {
						categories.insert(result.label.clone());
						recommendation_ids = map_recommendations(&categories);
						(format!("ML: {} ({:.0}%) + Regex: {:?}", result.label, result.confidence * 100.0, categories), Some(result.label))
					} else {
						(format!("Regex: {:?} (ML: {} {:.0}%)", categories, result.label, result.confidence * 100.0), Some(result.label))
					};
					let log_entry = self.base_log_entry(
						request_id,
						client_ip,
						&normalized,
						Decision::Block,
						stage,
						&reason,
						analysis.score,
						analysis.hits,
						analysis.suspected_param,
						ml_label.clone(),
						Some(result.confidence),
						recommendation_ids,
					);
					self.cache.set(
						fingerprint,
						CachedDecision { decision: "block".to_string(), ml_label, ml_confidence: Some(result.confidence), stage: stage.to_string() },
					);
					return Evaluation { decision: Decision::Block, reason, log_entry };
				},
				Err(MlError::CircuitOpen | MlError::QueueFull | MlError::Transport(_) | MlError::BadStatus(_)) => {
					let stage = "regex";
					let reason = format!("Regex: {categories:?}");
					let log_entry = self.base_log_entry(
						request_id,
						client_ip,
						&normalized,
						Decision::Block,
						stage,
						&reason,
						analysis.score,
						analysis.hits,
						analysis.suspected_param,
						None,
						None,
						recommendation_ids,
					);
					self.cache.set(
						fingerprint,
						CachedDecision { decision: "block".to_string(), ml_label: None, ml_confidence: None, stage: stage.to_string() },
					);
					return Evaluation { decision: Decision::Block, reason, log_entry };
				},
			}
		}

		let log_entry = self.base_log_entry(
			request_id,
			client_ip,
			&normalized,
			Decision::Allow,
			"regex",
			"ok",
			analysis.score,
			analysis.hits,
			analysis.suspected_param,
			None,
			None,
			recommendation_ids,
		);
		self.cache.set(fingerprint, CachedDecision { decision: "allow".to_string(), ml_label: None, ml_confidence: None, stage: "regex".to_string() });
		Evaluation { decision: Decision::Allow, reason: "ok".to_string(), log_entry }
	}
}

fn parse_decision(s: &str) -> Decision {
	match s {
		"block" => Decision::Block,
		"rate_limit" => Decision::RateLimit,
		_ => Decision::Allow,
	}
}

/// Category for the outbound event / block response (§4.8 Notification):
/// first regex-hit category, overridden by a non-BENIGN ML label.
pub fn event_category(hits: &[Hit], ml_label: Option<&str>) -> Option<String> {
	let mut category = hits.first().map(|h| h.category.clone());
	if let Some(label) = ml_label {
		if label != "BENIGN" {
			category = Some(label.to_string());
		}
	}
	category
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::ml::MlClient;
	use crate::rules::RuleSpec;

	fn make_engine(rules: Vec<RuleSpec>, ml: MlClient) -> DecisionEngine {
		DecisionEngine::new(
			RuleSet::from_specs(rules).unwrap(),
			IpBlocklist::new(Duration::from_secs(600)),
			RateLimiter::new(30.0, 10.0, 10.0),
			DecisionCache::new(Duration::from_secs(300), 512),
			ml,
			8192,
			2,
		)
	}

	fn dummy_ml() -> MlClient {
		MlClient::new("http://127.0.0.1:1".to_string(), Duration::from_millis(50), 4, 32, 5, Duration::from_secs(30))
	}

	#[tokio::test]
	async fn benign_request_is_allowed() {
		let engine = make_engine(vec![], dummy_ml());
		let eval = engine.evaluate("GET", "/home", "q=hello", &[], b"", "1.2.3.4").await;
		assert_eq!(eval.decision, Decision::Allow);
		assert_eq!(eval.log_entry.stage, "regex");
		assert_eq!(eval.log_entry.regex_score, 0);
	}

	#[tokio::test]
	async fn blocked_ip_skips_regex_and_ml() {
		let engine = make_engine(vec![], dummy_ml());
		engine.blocklist.block("9.9.9.9", None);
		let eval = engine.evaluate("GET", "/x", "", &[], b"", "9.9.9.9").await;
		assert_eq!(eval.decision, Decision::Block);
		assert_eq!(eval.reason, "ip block");
		assert_eq!(eval.log_entry.regex_score, 0);
	}

	#[tokio::test]
	async fn rate_limited_ip_skips_regex_and_ml() {
		let engine = make_engine(vec![], dummy_ml());
		for _ in 0..30 {
			let _ = engine.evaluate("GET", "/x", "", &[], b"", "8.8.8.8").await;
		}
		let eval = engine.evaluate("GET", "/x", "", &[], b"", "8.8.8.8").await;
		assert_eq!(eval.decision, Decision::RateLimit);
	}

	#[tokio::test]
	async fn regex_hit_with_ml_unavailable_fails_closed() {
		let spec = RuleSpec {
			id: "R1".to_string(),
			category: "SQLI".to_string(),
			description: String::new(),
			target: "query".to_string(),
			weight: 5,
			pattern: "OR 1=1".to_string(),
			ignore_case: true,
		};
		let engine = make_engine(vec![spec], dummy_ml());
		let eval = engine.evaluate("GET", "/api/items", "id=1 OR 1=1", &[], b"", "1.2.3.4").await;
		assert_eq!(eval.decision, Decision::Block);
		assert_eq!(eval.log_entry.stage, "regex");
	}

	#[tokio::test]
	async fn cache_hit_short_circuits_second_identical_request() {
		let spec = RuleSpec {
			id: "R1".to_string(),
			category: "SQLI".to_string(),
			description: String::new(),
			target: "query".to_string(),
			weight: 5,
			pattern: "OR 1=1".to_string(),
			ignore_case: true,
		};
		let engine = make_engine(vec![spec], dummy_ml());
		let _ = engine.evaluate("GET", "/api/items", "id=1 OR 1=1", &[], b"", "1.2.3.4").await;
		let eval = engine.evaluate("GET", "/api/items", "id=1 OR 1=1", &[], b"", "1.2.3.5").await;
		assert_eq!(eval.log_entry.stage, "cache_hit");
		assert_eq!(eval.decision, Decision::Block);
	}
}
