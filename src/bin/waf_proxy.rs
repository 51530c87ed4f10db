//! Proxy process entry point: terminates inbound HTTP traffic, runs the
//! decision pipeline, forwards allowed requests upstream, and polls the
//! control plane for admin commands.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use prometheus_client::registry::Registry;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waf_gateway::blocklist::IpBlocklist;
use waf_gateway::cache::DecisionCache;
use waf_gateway::config::Config;
use waf_gateway::controlplane::CommandPoller;
use waf_gateway::engine::DecisionEngine;
use waf_gateway::metrics::Metrics;
use waf_gateway::ml::MlClient;
use waf_gateway::proxy::{App as ProxyApp, ProxyState};
use waf_gateway::ratelimit::RateLimiter;
use waf_gateway::rules::RuleSet;

#[tokio::main]
async fn main() -> Result<()> {
	let config = Config::from_env()?;

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
		)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let rules = match RuleSet::load_yaml(&config.rules_path) {
		Ok(rules) => rules,
		Err(e) => {
			warn!(error = %e, path = %config.rules_path.display(), "falling back to an empty rule set");
			RuleSet::default()
		},
	};

	let engine = DecisionEngine::new(
		rules,
		IpBlocklist::new(std::time::Duration::from_secs(config.block_ttl_sec)),
		RateLimiter::new(config.rate_limit_burst, config.rate_limit_refill_per_sec, config.rate_limit_burst_suspicious),
		DecisionCache::new(std::time::Duration::from_secs(config.cache_ttl_sec), config.cache_max_size),
		MlClient::new(
			config.ai_url.clone(),
			std::time::Duration::from_millis(config.ml_timeout_ms),
			config.ml_concurrency,
			config.ml_queue_limit,
			config.circuit_failures,
			std::time::Duration::from_secs(config.circuit_cooldown_sec),
		),
		config.body_truncate,
		config.normalize_decode_rounds,
	);

	let mut registry = Registry::default();
	let metrics = Metrics::new(&mut registry);

	let proxy_state = Arc::new(ProxyState::from_config(&config, engine, metrics));
	let poller = Arc::new(CommandPoller::new(config.telegram_backend_url.clone(), config.license_key_hash.clone()));

	let mut run_set = JoinSet::new();

	let proxy_app = ProxyApp::new(proxy_state.clone());
	let proxy_listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
	info!(addr = %config.listen_addr, "proxy listening");
	run_set.spawn(async move {
		axum::serve(proxy_listener, proxy_app.router().into_make_service_with_connect_info::<SocketAddr>()).await.map_err(anyhow::Error::from)
	});

	let admin_app = waf_gateway::admin::App::new(Arc::new(registry));
	let admin_listener = tokio::net::TcpListener::bind(config.admin_addr).await?;
	info!(addr = %config.admin_addr, "admin listening");
	run_set.spawn(async move { axum::serve(admin_listener, admin_app.router()).await.map_err(anyhow::Error::from) });

	if !config.license_key_hash.is_empty() && !config.telegram_backend_url.is_empty() {
		let poll_interval = std::time::Duration::from_secs(config.command_poll_interval_sec);
		run_set.spawn(async move {
			poller.run_forever(poll_interval, &proxy_state.engine.blocklist, &proxy_state.engine.rules).await;
			Ok(())
		});
	} else {
		info!("control-plane command polling disabled: no license/backend configured");
	}

	while let Some(result) = run_set.join_next().await {
		result??;
	}
	Ok(())
}
