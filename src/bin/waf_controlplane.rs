//! Control-plane process entry point: serves the HMAC-signed event ingest
//! endpoint, the command pull/ack queue, and the operator surface that
//! stands in for the out-of-scope chat-bot front end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use waf_gateway::config::ControlPlaneConfig;
use waf_gateway::controlplane::ingest::{App, ControlPlaneState};
use waf_gateway::controlplane::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
	let config = ControlPlaneConfig::from_env()?;

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
		)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let state = Arc::new(ControlPlaneState {
		store: Store::new(Duration::from_secs(config.max_nonce_age_sec.max(0) as u64)),
		hmac_secret: config.hmac_secret,
		timestamp_skew_sec: config.timestamp_skew_sec,
		http: waf_gateway::controlplane::ingest::default_http_client(),
	});

	let app = App::new(state);
	let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
	info!(addr = %config.listen_addr, "control plane listening");
	axum::serve(listener, app.router()).await?;
	Ok(())
}
