//! In-memory license/command/nonce tables for the control plane (§4.10,
//! §3 Nonce/License/Command).
//!
//! Durable command queues are an explicit spec Non-goal; at-least-once
//! delivery of idempotent commands (§9) makes a process-restart data loss
//! acceptable. Grounded on the teacher's `Arc<RwLock<Store>>` singleton-store
//! pattern (`agent-proxy/src/lib.rs::ConfigStore`).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ring::digest;
use serde::Serialize;
use serde_json::Value;

use crate::error::IngestError;

#[derive(Debug, Clone, Serialize)]
pub struct Command {
	pub id: u64,
	pub license_hash: String,
	pub command_type: String,
	pub payload: Value,
	pub created_at: String,
	pub acked: bool,
}

struct License {
	chat_id: Option<i64>,
	activated_at: Option<String>,
}

/// Mutex-guarded license/command/nonce tables (§4.10).
pub struct Store {
	max_nonce_age: Duration,
	nonces: Mutex<HashMap<String, Instant>>,
	licenses: Mutex<HashMap<String, License>>,
	commands: Mutex<Vec<Command>>,
	next_command_id: Mutex<u64>,
	audit: Mutex<Vec<(String, String, String)>>,
}

impl Store {
	pub fn new(max_nonce_age: Duration) -> Self {
		Store {
			max_nonce_age,
			nonces: Mutex::new(HashMap::new()),
			licenses: Mutex::new(HashMap::new()),
			commands: Mutex::new(Vec::new()),
			next_command_id: Mutex::new(1),
			audit: Mutex::new(Vec::new()),
		}
	}

	/// Seeds a license hash so it can later be activated (bound to a chat).
	pub fn register_license(&self, license_hash: &str) {
		let mut licenses = self.licenses.lock().expect("license lock");
		licenses.entry(license_hash.to_string()).or_insert(License { chat_id: None, activated_at: None });
	}

	/// Binds `license_hash` to `chat_id`. Idempotent for the same chat;
	/// fails if already bound to a different chat (§3 License invariant).
	pub fn activate_license(&self, license_hash: &str, chat_id: i64, now: &str) -> Result<(), IngestError> {
		let mut licenses = self.licenses.lock().expect("license lock");
		let license = licenses.get_mut(license_hash).ok_or(IngestError::UnknownLicense)?;
		if let Some(existing) = license.chat_id {
			if existing != chat_id {
				return Err(IngestError::LicenseAlreadyBound);
			}
		}
		license.chat_id = Some(chat_id);
		license.activated_at = Some(now.to_string());
		Ok(())
	}

	pub fn chat_for_license(&self, license_hash: &str) -> Option<i64> {
		self.licenses.lock().expect("license lock").get(license_hash).and_then(|l| l.chat_id)
	}

	/// Checks and records a nonce, rejecting replays within the window and
	/// garbage-collecting entries older than `max_nonce_age`.
	pub fn check_and_store_nonce(&self, nonce: &str) -> Result<(), IngestError> {
		let mut nonces = self.nonces.lock().expect("nonce lock");
		let cutoff = self.max_nonce_age;
		nonces.retain(|_, seen_at| seen_at.elapsed() < cutoff);
		if nonces.contains_key(nonce) {
			return Err(IngestError::Replay);
		}
		nonces.insert(nonce.to_string(), Instant::now());
		Ok(())
	}

	pub fn record_audit(&self, action: &str, details: &str) {
		let mut audit = self.audit.lock().expect("audit lock");
		let truncated: String = details.chars().take(500).collect();
		audit.push((action.to_string(), truncated, chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()));
	}

	pub fn enqueue_command(&self, license_hash: &str, command_type: &str, payload: Value, now: &str) -> u64 {
		let mut id_guard = self.next_command_id.lock().expect("command id lock");
		let id = *id_guard;
		*id_guard += 1;
		drop(id_guard);
		self.commands.lock().expect("command lock").push(Command {
			id,
			license_hash: license_hash.to_string(),
			command_type: command_type.to_string(),
			payload,
			created_at: now.to_string(),
			acked: false,
		});
		id
	}

	/// Returns up to 20 unacked commands for `license_hash` with id > cursor,
	/// plus the new cursor (§3 Command.pull).
	pub fn pull_commands(&self, license_hash: &str, cursor: u64) -> (Vec<Command>, u64) {
		let commands = self.commands.lock().expect("command lock");
		let mut matched: Vec<Command> = commands
			.iter()
			.filter(|c| c.license_hash == license_hash && !c.acked && c.id > cursor)
			.take(20)
			.cloned()
			.collect();
		matched.sort_by_key(|c| c.id);
		let next_cursor = matched.iter().map(|c| c.id).max().unwrap_or(cursor);
		(matched, next_cursor)
	}

	pub fn ack_commands(&self, ids: &[u64]) {
		let mut commands = self.commands.lock().expect("command lock");
		for command in commands.iter_mut() {
			if ids.contains(&command.id) {
				command.acked = true;
			}
		}
	}
}

/// SHA-256 hex of a license key, used so the plaintext key never transits
/// (§3 License, §GLOSSARY "License hash").
pub fn hash_license_key(license_key: &str) -> String {
	hex::encode(digest::digest(&digest::SHA256, license_key.as_bytes()).as_ref())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn activation_is_idempotent_for_same_chat() {
		let store = Store::new(Duration::from_secs(300));
		store.register_license("hash1");
		store.activate_license("hash1", 42, "t").unwrap();
		store.activate_license("hash1", 42, "t").unwrap();
		assert_eq!(store.chat_for_license("hash1"), Some(42));
	}

	#[test]
	fn activation_rejects_rebinding_to_different_chat() {
		let store = Store::new(Duration::from_secs(300));
		store.register_license("hash1");
		store.activate_license("hash1", 42, "t").unwrap();
		let err = store.activate_license("hash1", 99, "t").unwrap_err();
		assert!(matches!(err, IngestError::LicenseAlreadyBound));
	}

	#[test]
	fn unknown_license_rejected() {
		let store = Store::new(Duration::from_secs(300));
		let err = store.activate_license("nope", 1, "t").unwrap_err();
		assert!(matches!(err, IngestError::UnknownLicense));
	}

	#[test]
	fn replayed_nonce_rejected_within_window() {
		let store = Store::new(Duration::from_secs(300));
		store.check_and_store_nonce("n1").unwrap();
		let err = store.check_and_store_nonce("n1").unwrap_err();
		assert!(matches!(err, IngestError::Replay));
	}

	#[test]
	fn pull_returns_unacked_commands_above_cursor_capped_at_20() {
		let store = Store::new(Duration::from_secs(300));
		for i in 0..25 {
			store.enqueue_command("hash1", "block_ip", serde_json::json!({"ip": format!("1.1.1.{i}")}), "t");
		}
		let (items, cursor) = store.pull_commands("hash1", 0);
		assert_eq!(items.len(), 20);
		assert_eq!(cursor, 20);

		let (more, cursor2) = store.pull_commands("hash1", cursor);
		assert_eq!(more.len(), 5);
		assert_eq!(cursor2, 25);
	}

	#[test]
	fn ack_marks_commands_acked_and_excludes_from_future_pulls() {
		let store = Store::new(Duration::from_secs(300));
		let id = store.enqueue_command("hash1", "unblock_ip", serde_json::json!({"ip": "1.1.1.1"}), "t");
		store.ack_commands(&[id]);
		let (items, _) = store.pull_commands("hash1", 0);
		assert!(items.is_empty());
	}
}
