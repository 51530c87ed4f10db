//! Process-wide Prometheus metrics (§6 "Metrics surface", ambient stack).
//!
//! Grounded on the teacher's `Family<Labels, Counter>` registration pattern
//! (`crates/agentgateway/src/telemetry/metrics.rs`).

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
	pub decision: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MlOutcomeLabels {
	pub outcome: String,
}

/// Process-wide counters/gauges surfaced on the admin `/metrics` endpoint.
pub struct Metrics {
	pub requests_total: Family<DecisionLabels, Counter>,
	pub ml_calls_total: Family<MlOutcomeLabels, Counter>,
	pub breaker_open: Gauge,
	pub cache_hits_total: Counter,
	pub cache_misses_total: Counter,
	pub log_appends_total: Counter,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let requests_total = Family::default();
		registry.register("waf_requests", "Total requests by terminal decision", requests_total.clone());

		let ml_calls_total = Family::default();
		registry.register("waf_ml_calls", "Total ML classifier calls by outcome", ml_calls_total.clone());

		let breaker_open = Gauge::default();
		registry.register("waf_ml_circuit_open", "1 if the ML circuit breaker is open, else 0", breaker_open.clone());

		let cache_hits_total = Counter::default();
		registry.register("waf_cache_hits", "Decision cache hits", cache_hits_total.clone());

		let cache_misses_total = Counter::default();
		registry.register("waf_cache_misses", "Decision cache misses", cache_misses_total.clone());

		let log_appends_total = Counter::default();
		registry.register("waf_log_appends", "Audit log entries appended", log_appends_total.clone());

		Metrics { requests_total, ml_calls_total, breaker_open, cache_hits_total, cache_misses_total, log_appends_total }
	}

	pub fn record_decision(&self, decision: &str) {
		self.requests_total.get_or_create(&DecisionLabels { decision: decision.to_string() }).inc();
	}

	pub fn record_ml_outcome(&self, outcome: &str) {
		self.ml_calls_total.get_or_create(&MlOutcomeLabels { outcome: outcome.to_string() }).inc();
	}
}
