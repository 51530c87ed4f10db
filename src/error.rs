//! Library-internal error types.
//!
//! Mirrors the teacher's `thiserror`-derived enums at library seams
//! (`crates/agentgateway/src/proxy/mod.rs::ProxyError`); binaries compose these
//! under an `anyhow::Error` application boundary.

use thiserror::Error;

/// Failures surfaced by the decision engine and its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("rule file parse error: {0}")]
	RuleParse(String),
	#[error("invalid regex pattern in rule {id}: {source}")]
	InvalidPattern { id: String, source: regex::Error },
	#[error("log write failure: {0}")]
	LogWrite(#[from] std::io::Error),
}

/// Failures surfaced by the control-plane ingest handlers.
#[derive(Debug, Error)]
pub enum IngestError {
	#[error("missing hmac headers")]
	MissingHeaders,
	#[error("invalid timestamp")]
	InvalidTimestamp,
	#[error("timestamp skew")]
	TimestampSkew,
	#[error("replay detected")]
	Replay,
	#[error("invalid signature")]
	InvalidSignature,
	#[error("bad json")]
	BadJson,
	#[error("missing license")]
	MissingLicense,
	#[error("license not activated")]
	LicenseNotActivated,
	#[error("unknown license")]
	UnknownLicense,
	#[error("license already bound")]
	LicenseAlreadyBound,
	#[error("chat not activated")]
	ChatNotActivated,
}

impl IngestError {
	pub fn status(&self) -> http::StatusCode {
		match self {
			IngestError::BadJson | IngestError::MissingLicense => http::StatusCode::BAD_REQUEST,
			_ => http::StatusCode::UNAUTHORIZED,
		}
	}

	pub fn detail(&self) -> &'static str {
		match self {
			IngestError::MissingHeaders => "missing hmac headers",
			IngestError::InvalidTimestamp => "invalid timestamp",
			IngestError::TimestampSkew => "timestamp skew",
			IngestError::Replay => "replay detected",
			IngestError::InvalidSignature => "invalid signature",
			IngestError::BadJson => "bad json",
			IngestError::MissingLicense => "missing license",
			IngestError::LicenseNotActivated => "license not activated",
			IngestError::UnknownLicense => "unknown license",
			IngestError::LicenseAlreadyBound => "license already bound",
			IngestError::ChatNotActivated => "chat not activated",
		}
	}
}
