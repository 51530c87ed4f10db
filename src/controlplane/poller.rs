//! Inbound command poller (§4.11): long-interval pull + apply + ack against
//! the control plane. Mutates only the blocklist and the regex rule set.

use std::sync::RwLock;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::blocklist::IpBlocklist;
use crate::rules::{Rule, RuleSet, RuleSpec};

#[derive(Debug, Deserialize)]
struct PulledCommand {
	id: u64,
	command_type: String,
	payload: Value,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
	commands: Vec<PulledCommand>,
	#[allow(dead_code)]
	cursor: u64,
}

/// Polls the control plane for admin commands and applies them locally.
pub struct CommandPoller {
	http: reqwest::Client,
	backend_url: String,
	license_key_hash: String,
	cursor: std::sync::atomic::AtomicU64,
}

impl CommandPoller {
	pub fn new(backend_url: String, license_key_hash: String) -> Self {
		CommandPoller { http: reqwest::Client::new(), backend_url, license_key_hash, cursor: std::sync::atomic::AtomicU64::new(0) }
	}

	fn apply(&self, command: &PulledCommand, blocklist: &IpBlocklist, rules: &RwLock<RuleSet>) {
		info!(command_type = %command.command_type, "applying control-plane command");
		match command.command_type.as_str() {
			"block_ip" => {
				let Some(ip) = command.payload.get("ip").and_then(Value::as_str) else { return };
				let ttl = command.payload.get("ttl").and_then(Value::as_u64).map(Duration::from_secs);
				blocklist.block(ip, ttl);
			},
			"unblock_ip" => {
				let Some(ip) = command.payload.get("ip").and_then(Value::as_str) else { return };
				blocklist.unblock(ip);
			},
			"add_rule" => {
				let pattern = command.payload.get("pattern").and_then(Value::as_str).unwrap_or(".*").to_string();
				let spec = RuleSpec {
					id: format!("CMD_{pattern}"),
					category: command.payload.get("category").and_then(Value::as_str).unwrap_or("XSS").to_string(),
					description: "added via control-plane command".to_string(),
					target: command.payload.get("target").and_then(Value::as_str).unwrap_or("query").to_string(),
					weight: command.payload.get("weight").and_then(Value::as_u64).unwrap_or(2) as u32,
					pattern,
					ignore_case: true,
				};
				match Rule::compile(spec) {
					Ok(rule) => rules.write().expect("rules lock").push(rule),
					Err(e) => warn!(error = %e, "dropping add_rule command with invalid pattern"),
				}
			},
			other => warn!(command_type = other, "dropping unknown command type"),
		}
	}

	/// Runs one pull/apply/ack cycle. Network and parse errors abort the
	/// cycle without advancing the cursor (§4.11).
	pub async fn poll_once(&self, blocklist: &IpBlocklist, rules: &RwLock<RuleSet>) {
		if self.license_key_hash.is_empty() {
			return;
		}
		let cursor = self.cursor.load(std::sync::atomic::Ordering::SeqCst);
		let url = format!(
			"{}/api/v1/commands/pull?license_key_hash={}&cursor={cursor}",
			self.backend_url.trim_end_matches('/'),
			self.license_key_hash,
		);

		let response = match self.http.get(&url).timeout(Duration::from_secs(5)).send().await {
			Ok(r) => r,
			Err(e) => {
				warn!(error = %e, "command poll request failed");
				return;
			},
		};
		if !response.status().is_success() {
			return;
		}
		let parsed: PullResponse = match response.json().await {
			Ok(p) => p,
			Err(e) => {
				warn!(error = %e, "command poll response parse failed");
				return;
			},
		};
		if parsed.commands.is_empty() {
			return;
		}

		let mut applied_ids = Vec::with_capacity(parsed.commands.len());
		for command in &parsed.commands {
			self.apply(command, blocklist, rules);
			applied_ids.push(command.id);
		}

		let ack_url = format!("{}/api/v1/commands/ack", self.backend_url.trim_end_matches('/'));
		let ack_result = self
			.http
			.post(&ack_url)
			.timeout(Duration::from_secs(5))
			.json(&serde_json::json!({ "ids": applied_ids }))
			.send()
			.await;
		if ack_result.is_err() {
			return;
		}
		self.cursor.store(parsed.cursor, std::sync::atomic::Ordering::SeqCst);
	}

	/// Runs the poll loop forever at `interval`, for use in a spawned task.
	pub async fn run_forever(&self, interval: Duration, blocklist: &IpBlocklist, rules: &RwLock<RuleSet>) {
		loop {
			self.poll_once(blocklist, rules).await;
			tokio::time::sleep(interval).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[tokio::test]
	async fn block_ip_command_blocks_the_ip() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/v1/commands/pull"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"commands": [{"id": 1, "command_type": "block_ip", "payload": {"ip": "5.5.5.5", "ttl": 60}}],
				"cursor": 1
			})))
			.mount(&server)
			.await;
		Mock::given(method("POST")).and(path("/api/v1/commands/ack")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

		let poller = CommandPoller::new(server.uri(), "hash1".to_string());
		let blocklist = IpBlocklist::new(Duration::from_secs(600));
		let rules = RwLock::new(RuleSet::default());
		poller.poll_once(&blocklist, &rules).await;
		assert!(blocklist.is_blocked("5.5.5.5"));
	}

	#[tokio::test]
	async fn add_rule_with_invalid_pattern_is_dropped_silently() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/v1/commands/pull"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"commands": [{"id": 1, "command_type": "add_rule", "payload": {"pattern": "(unclosed"}}],
				"cursor": 1
			})))
			.mount(&server)
			.await;
		Mock::given(method("POST")).and(path("/api/v1/commands/ack")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

		let poller = CommandPoller::new(server.uri(), "hash1".to_string());
		let blocklist = IpBlocklist::new(Duration::from_secs(600));
		let rules = RwLock::new(RuleSet::default());
		poller.poll_once(&blocklist, &rules).await;
		assert_eq!(rules.read().unwrap().rules().len(), 0);
	}

	#[tokio::test]
	async fn network_error_does_not_advance_cursor() {
		let poller = CommandPoller::new("http://127.0.0.1:1".to_string(), "hash1".to_string());
		let blocklist = IpBlocklist::new(Duration::from_secs(600));
		let rules = RwLock::new(RuleSet::default());
		poller.poll_once(&blocklist, &rules).await;
		assert_eq!(poller.cursor.load(std::sync::atomic::Ordering::SeqCst), 0);
	}
}
