//! Process configuration, resolved entirely from environment variables.
//!
//! Mirrors the teacher's `parse::<T>(env) -> anyhow::Result<Option<T>>` idiom
//! (`crates/agentgateway/src/config.rs`): every key fails fast and names itself
//! in the error if the env var is present but doesn't parse.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

/// Tunables for the proxy process (§6 of the spec).
#[derive(Debug, Clone)]
pub struct Config {
	pub listen_addr: SocketAddr,
	pub admin_addr: SocketAddr,

	pub upstream_url: String,
	pub ai_url: String,
	pub rules_path: PathBuf,

	pub telegram_backend_url: String,
	pub control_plane_hmac_secret: String,
	pub license_key_hash: String,

	pub ml_timeout_ms: u64,
	pub ml_queue_limit: usize,
	pub ml_concurrency: usize,
	pub circuit_failures: u32,
	pub circuit_cooldown_sec: u64,

	pub normalize_decode_rounds: u32,
	pub body_truncate: usize,

	pub rate_limit_burst: f64,
	pub rate_limit_refill_per_sec: f64,
	pub rate_limit_burst_suspicious: f64,

	pub block_ttl_sec: u64,

	pub cache_ttl_sec: u64,
	pub cache_max_size: usize,

	pub log_path: PathBuf,
	pub log_rotate_bytes: u64,
	pub log_rotate_keep: u32,
	pub hash_state_path: PathBuf,

	/// Default `tracing` filter directive when `RUST_LOG` isn't set (§6).
	pub log_level: String,

	pub timestamp_skew_sec: i64,
	pub max_nonce_age_sec: i64,

	/// Declared but intentionally never branched on (see DESIGN.md Open Questions /
	/// spec §9): the original source defines this flag but never reads it in the
	/// hot path, and the spec declines to guess a behavior for it.
	pub ml_fail_closed: bool,

	pub command_poll_interval_sec: u64,
}

/// Control-plane-side configuration (`waf-controlplane` binary).
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
	pub listen_addr: SocketAddr,
	pub hmac_secret: String,
	pub timestamp_skew_sec: i64,
	pub max_nonce_age_sec: i64,
	pub log_level: String,
}

impl Config {
	pub fn from_env() -> anyhow::Result<Self> {
		Ok(Config {
			listen_addr: parse_default("LISTEN_ADDR", "0.0.0.0:8080".parse().unwrap())?,
			admin_addr: parse_default("ADMIN_ADDR", "0.0.0.0:8081".parse().unwrap())?,

			upstream_url: parse_default("UPSTREAM_URL", "http://127.0.0.1:8001".to_string())?,
			ai_url: parse_default(
				"AI_URL",
				"http://127.0.0.1:8002/analyze".to_string(),
			)?,
			rules_path: parse_default("RULES_PATH", PathBuf::from("rules.yaml"))?,

			telegram_backend_url: parse_default("TELEGRAM_BACKEND_URL", String::new())?,
			control_plane_hmac_secret: parse_default("CONTROL_PLANE_HMAC_SECRET", String::new())?,
			license_key_hash: parse_default("LICENSE_KEY_HASH", String::new())?,

			ml_timeout_ms: parse_default("ML_TIMEOUT_MS", 150)?,
			ml_queue_limit: parse_default("ML_QUEUE_LIMIT", 32)?,
			ml_concurrency: parse_default("ML_CONCURRENCY", 4)?,
			circuit_failures: parse_default("CIRCUIT_FAILURES", 5)?,
			circuit_cooldown_sec: parse_default("CIRCUIT_COOLDOWN_SEC", 30)?,

			normalize_decode_rounds: parse_default("NORMALIZE_DECODE_ROUNDS", 2)?,
			body_truncate: parse_default("BODY_TRUNCATE", 8192)?,

			rate_limit_burst: parse_default("RATE_LIMIT_BURST", 30.0)?,
			rate_limit_refill_per_sec: parse_default("RATE_LIMIT_REFILL_PER_SEC", 10.0)?,
			rate_limit_burst_suspicious: parse_default("RATE_LIMIT_BURST_SUSPICIOUS", 10.0)?,

			block_ttl_sec: parse_default("BLOCK_TTL_SEC", 600)?,

			cache_ttl_sec: parse_default("CACHE_TTL_SEC", 300)?,
			cache_max_size: parse_default("CACHE_MAX_SIZE", 512)?,

			log_path: parse_default("LOG_PATH", PathBuf::from("data/logs/waf_events.jsonl"))?,
			log_rotate_bytes: parse_default("LOG_ROTATE_BYTES", 10_000_000)?,
			log_rotate_keep: parse_default("LOG_ROTATE_KEEP", 3)?,
			hash_state_path: parse_default("HASH_STATE_PATH", PathBuf::from("data/logs/hash_state.json"))?,
			log_level: parse_default("LOG_LEVEL", "info".to_string())?,

			timestamp_skew_sec: parse_default("TIMESTAMP_SKEW_SEC", 300)?,
			max_nonce_age_sec: parse_default("MAX_NONCE_AGE_SEC", 300)?,

			ml_fail_closed: parse_default("ML_FAIL_CLOSED", false)?,

			command_poll_interval_sec: parse_default("COMMAND_POLL_INTERVAL_SEC", 5)?,
		})
	}
}

impl ControlPlaneConfig {
	pub fn from_env() -> anyhow::Result<Self> {
		Ok(ControlPlaneConfig {
			listen_addr: parse_default("CP_LISTEN_ADDR", "0.0.0.0:9090".parse().unwrap())?,
			hmac_secret: parse_default("CONTROL_PLANE_HMAC_SECRET", String::new())?,
			timestamp_skew_sec: parse_default("TIMESTAMP_SKEW_SEC", 300)?,
			max_nonce_age_sec: parse_default("MAX_NONCE_AGE_SEC", 300)?,
			log_level: parse_default("LOG_LEVEL", "info".to_string())?,
		})
	}
}

fn parse<T: FromStr>(env_key: &str) -> anyhow::Result<Option<T>>
where
	<T as FromStr>::Err: std::fmt::Display,
{
	match env::var(env_key) {
		Ok(val) => val
			.parse()
			.map(Some)
			.map_err(|e| anyhow::anyhow!("invalid env var {}={} ({})", env_key, val, e)),
		Err(env::VarError::NotPresent) => Ok(None),
		Err(e) => Err(e).context(format!("reading env var {env_key}")),
	}
}

fn parse_default<T: FromStr>(env_key: &str, default: T) -> anyhow::Result<T>
where
	<T as FromStr>::Err: std::fmt::Display,
{
	parse(env_key).map(|v| v.unwrap_or(default))
}
