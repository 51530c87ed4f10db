//! Hash-chained JSONL audit logger (§4.7): every entry's hash folds in the
//! previous entry's hash, so tampering with any line invalidates every
//! subsequent hash. Appends are serialized through a single mutex so the
//! read-hash / compute / write / update-hash sequence is atomic (§5).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ring::digest;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EngineError;

/// Seed value for an empty/unreadable chain (§3 ChainState): 64 zero hex chars.
fn genesis() -> String {
	"0".repeat(64)
}

/// Canonicalizes a JSON value to `sort_keys`-style bytes for hashing, matching
/// `orjson.dumps(value, option=OPT_SORT_KEYS)` in the original implementation.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
	fn sort(value: &Value) -> Value {
		match value {
			Value::Object(map) => {
				let mut sorted = Map::new();
				let mut keys: Vec<&String> = map.keys().collect();
				keys.sort();
				for key in keys {
					sorted.insert(key.clone(), sort(&map[key]));
				}
				Value::Object(sorted)
			},
			Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
			other => other.clone(),
		}
	}
	serde_json::to_vec(&sort(value)).expect("json values always serialize")
}

fn sha256_hex(bytes: &[u8]) -> String {
	hex::encode(digest::digest(&digest::SHA256, bytes).as_ref())
}

/// Computes `entry_hash = SHA256(prev_hash || canonical_json(entry_without_chain_fields))`.
pub fn compute_entry_hash(prev_hash: &str, entry_without_chain_fields: &Value) -> String {
	let mut input = Vec::with_capacity(prev_hash.len() + 256);
	input.extend_from_slice(prev_hash.as_bytes());
	input.extend_from_slice(&canonical_json_bytes(entry_without_chain_fields));
	sha256_hex(&input)
}

struct ChainState {
	path: PathBuf,
	prev_hash: String,
}

impl ChainState {
	fn load(path: &Path) -> ChainState {
		let prev_hash = fs::read_to_string(path)
			.ok()
			.and_then(|text| serde_json::from_str::<Value>(&text).ok())
			.and_then(|value| value.get("prev_hash").and_then(Value::as_str).map(str::to_string))
			.unwrap_or_else(genesis);
		ChainState { path: path.to_path_buf(), prev_hash }
	}

	fn persist(&self) -> std::io::Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let doc = serde_json::json!({ "prev_hash": self.prev_hash });
		fs::write(&self.path, serde_json::to_vec(&doc)?)
	}
}

/// Append-only JSONL audit logger with rolling-hash integrity and
/// size-triggered rotation.
pub struct JsonlLogger {
	log_path: PathBuf,
	rotate_bytes: u64,
	rotate_keep: u32,
	state: Mutex<ChainState>,
}

impl JsonlLogger {
	pub fn new(log_path: PathBuf, hash_state_path: PathBuf, rotate_bytes: u64, rotate_keep: u32) -> JsonlLogger {
		JsonlLogger { log_path, rotate_bytes, rotate_keep, state: Mutex::new(ChainState::load(&hash_state_path)) }
	}

	/// Appends one log entry, chaining and persisting the rolling hash.
	/// `entry` must serialize to a JSON object.
	pub fn write<T: Serialize>(&self, entry: &T) -> Result<(), EngineError> {
		let mut value = serde_json::to_value(entry).expect("log entries serialize");
		let object = value.as_object_mut().expect("log entries are objects");
		object.remove("prev_hash");
		object.remove("entry_hash");

		let mut state = self.state.lock().expect("chain lock");
		let entry_hash = compute_entry_hash(&state.prev_hash, &value);
		let prev_hash = state.prev_hash.clone();

		let object = value.as_object_mut().expect("log entries are objects");
		object.insert("prev_hash".to_string(), Value::String(prev_hash));
		object.insert("entry_hash".to_string(), Value::String(entry_hash.clone()));

		let mut line = canonical_json_bytes(&value);
		line.push(b'\n');

		if let Some(parent) = self.log_path.parent() {
			fs::create_dir_all(parent)?;
		}
		let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path)?;
		file.write_all(&line)?;
		drop(file);

		state.prev_hash = entry_hash;
		state.persist()?;
		drop(state);

		self.rotate_if_needed()?;
		Ok(())
	}

	fn rotate_if_needed(&self) -> std::io::Result<()> {
		let size = match fs::metadata(&self.log_path) {
			Ok(meta) => meta.len(),
			Err(_) => return Ok(()),
		};
		if size < self.rotate_bytes {
			return Ok(());
		}

		if self.rotate_keep == 0 {
			return Ok(());
		}
		let backup = |idx: u32| self.log_path.with_file_name(format!("{}.{idx}", self.log_path.file_name().unwrap().to_string_lossy()));

		let oldest = backup(self.rotate_keep);
		if oldest.exists() {
			fs::remove_file(&oldest)?;
		}
		for idx in (1..self.rotate_keep).rev() {
			let src = backup(idx);
			if src.exists() {
				fs::rename(&src, backup(idx + 1))?;
			}
		}
		fs::rename(&self.log_path, backup(1))?;
		Ok(())
	}
}

/// Verifies an on-disk chain: recomputes every `entry_hash` starting from the
/// genesis seed, returning the line number of the first mismatch if any
/// (§4.7 "Verification").
pub fn verify_chain(path: &Path) -> Result<u64, (u64, String)> {
	let text = fs::read_to_string(path).map_err(|e| (0, e.to_string()))?;
	let mut prev_hash = genesis();
	let mut count = 0u64;

	for (idx, line) in text.lines().enumerate() {
		let line_no = idx as u64 + 1;
		if line.trim().is_empty() {
			continue;
		}
		let mut entry: Value = serde_json::from_str(line).map_err(|e| (line_no, format!("bad json: {e}")))?;
		let object = entry.as_object_mut().ok_or((line_no, "not an object".to_string()))?;
		let actual = object.remove("entry_hash").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
		object.remove("prev_hash");

		let expected = compute_entry_hash(&prev_hash, &entry);
		if actual != expected {
			return Err((line_no, "hash mismatch".to_string()));
		}
		prev_hash = actual;
		count += 1;
	}
	Ok(count)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use tempfile::tempdir;

	#[test]
	fn chain_links_consecutive_entries() {
		let dir = tempdir().unwrap();
		let logger = JsonlLogger::new(dir.path().join("log.jsonl"), dir.path().join("hash.json"), 10_000_000, 3);
		logger.write(&json!({"a": 1})).unwrap();
		logger.write(&json!({"a": 2})).unwrap();

		let text = fs::read_to_string(dir.path().join("log.jsonl")).unwrap();
		let lines: Vec<&str> = text.lines().collect();
		let e1: Value = serde_json::from_str(lines[0]).unwrap();
		let e2: Value = serde_json::from_str(lines[1]).unwrap();
		assert_eq!(e1["prev_hash"], json!(genesis()));
		assert_eq!(e2["prev_hash"], e1["entry_hash"]);
	}

	#[test]
	fn verify_chain_accepts_untampered_log() {
		let dir = tempdir().unwrap();
		let log_path = dir.path().join("log.jsonl");
		let logger = JsonlLogger::new(log_path.clone(), dir.path().join("hash.json"), 10_000_000, 3);
		for i in 0..5 {
			logger.write(&json!({"i": i})).unwrap();
		}
		assert_eq!(verify_chain(&log_path).unwrap(), 5);
	}

	#[test]
	fn verify_chain_rejects_tampered_line() {
		let dir = tempdir().unwrap();
		let log_path = dir.path().join("log.jsonl");
		let logger = JsonlLogger::new(log_path.clone(), dir.path().join("hash.json"), 10_000_000, 3);
		for i in 0..3 {
			logger.write(&json!({"i": i})).unwrap();
		}
		let mut text = fs::read_to_string(&log_path).unwrap();
		text = text.replacen("\"i\":1", "\"i\":999", 1);
		fs::write(&log_path, text).unwrap();
		let result = verify_chain(&log_path);
		assert!(result.is_err());
		assert_eq!(result.unwrap_err().0, 2);
	}

	#[test]
	fn rotation_preserves_chain_across_files() {
		let dir = tempdir().unwrap();
		let log_path = dir.path().join("log.jsonl");
		let logger = JsonlLogger::new(log_path.clone(), dir.path().join("hash.json"), 50, 2);
		for i in 0..20 {
			logger.write(&json!({"i": i, "pad": "x".repeat(20)})).unwrap();
		}
		assert!(log_path.with_file_name("log.jsonl.1").exists());
	}
}
