//! Regex rule engine (§4.2): loads rules from a YAML data file and scores a
//! normalized request against them.
//!
//! Rule patterns are operator-authored (via the `add_rule` admin command), so
//! a pathological pattern must not be able to wedge the engine (§9 "Regex
//! engine choice"). `regex` has no native per-match deadline, so each match is
//! run on a short-lived helper thread and given a hard wall-clock budget;
//! a timeout is treated as a non-match, never an error.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::normalize::NormalizedRequest;

/// Per-pattern match budget (§3 Rule invariant).
const MATCH_TIMEOUT: Duration = Duration::from_millis(10);

/// Raw rule record as it appears in the YAML rules file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleSpec {
	pub id: String,
	pub category: String,
	#[serde(default)]
	pub description: String,
	#[serde(default = "default_target")]
	pub target: String,
	#[serde(default = "default_weight")]
	pub weight: u32,
	pub pattern: String,
	#[serde(default)]
	pub ignore_case: bool,
}

fn default_target() -> String {
	"query".to_string()
}

fn default_weight() -> u32 {
	1
}

/// A compiled, immutable rule (§3 Rule).
#[derive(Debug, Clone)]
pub struct Rule {
	pub id: String,
	pub category: String,
	pub description: String,
	pub target: Target,
	pub weight: u32,
	pattern: regex::Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
	Query,
	Path,
	Body,
	Headers,
}

impl Target {
	fn parse(s: &str) -> Target {
		match s {
			"path" => Target::Path,
			"body" => Target::Body,
			"headers" => Target::Headers,
			_ => Target::Query,
		}
	}
}

impl Rule {
	pub fn compile(spec: RuleSpec) -> Result<Rule, EngineError> {
		let pattern = RegexBuilder::new(&spec.pattern)
			.case_insensitive(spec.ignore_case)
			.build()
			.map_err(|source| EngineError::InvalidPattern { id: spec.id.clone(), source })?;
		Ok(Rule {
			id: spec.id,
			category: spec.category,
			description: spec.description,
			target: Target::parse(&spec.target),
			weight: spec.weight,
			pattern,
		})
	}

	/// Matches `text` against this rule's pattern with a hard wall-clock
	/// budget. A timeout is reported as no-match, not an error.
	fn is_match_bounded(&self, text: &str) -> bool {
		let pattern = self.pattern.clone();
		let text = text.to_string();
		let (tx, rx) = mpsc::channel();
		std::thread::spawn(move || {
			let _ = tx.send(pattern.is_match(&text));
		});
		rx.recv_timeout(MATCH_TIMEOUT).unwrap_or(false)
	}
}

/// A single regex hit (§3 LogEntry `regex_hits`).
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
	pub id: String,
	pub category: String,
	pub target: String,
	pub description: String,
}

/// Outcome of [`RuleSet::analyze`].
pub struct AnalysisResult {
	pub score: u32,
	pub hits: Vec<Hit>,
	pub suspected_param: String,
	pub categories: BTreeSet<String>,
}

/// The live, swappable rule list (§5: append-or-replace only).
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
	rules: Vec<Rule>,
}

impl RuleSet {
	pub fn from_specs(specs: Vec<RuleSpec>) -> Result<RuleSet, EngineError> {
		let rules = specs
			.into_iter()
			.map(Rule::compile)
			.collect::<Result<Vec<_>, _>>()?;
		Ok(RuleSet { rules })
	}

	pub fn load_yaml(path: &Path) -> Result<RuleSet, EngineError> {
		let text = std::fs::read_to_string(path)
			.map_err(|e| EngineError::RuleParse(format!("{}: {e}", path.display())))?;
		let specs: Vec<RuleSpec> =
			serde_yaml::from_str(&text).map_err(|e| EngineError::RuleParse(e.to_string()))?;
		RuleSet::from_specs(specs)
	}

	pub fn rules(&self) -> &[Rule] {
		&self.rules
	}

	/// Appends a rule, de-duplicating by id (§9 "At-least-once commands").
	pub fn push(&mut self, rule: Rule) {
		if let Some(slot) = self.rules.iter_mut().find(|r| r.id == rule.id) {
			*slot = rule;
		} else {
			self.rules.push(rule);
		}
	}

	fn select_target<'a>(&self, target: Target, req: &'a NormalizedRequest) -> String {
		match target {
			Target::Path => req.path.clone(),
			Target::Body => req.body.clone(),
			Target::Headers => req
				.headers
				.iter()
				.map(|(k, v)| format!("{k}:{v}"))
				.collect::<Vec<_>>()
				.join(" "),
			Target::Query => req.query.clone(),
		}
	}

	/// Matches one rule, returning `(matched, suspected_param)`. For
	/// `target=query`, each `key=value` pair is tried individually so the
	/// first matching key can be reported as the suspected parameter.
	fn match_rule(&self, rule: &Rule, data: &str, req: &NormalizedRequest) -> (bool, Option<String>) {
		if rule.target == Target::Query {
			for (key, values) in &req.params {
				for value in values {
					let candidate = format!("{key}={value}");
					if rule.is_match_bounded(&candidate) {
						return (true, Some(key.clone()));
					}
				}
			}
		}
		if rule.is_match_bounded(data) {
			return (true, None);
		}
		(false, None)
	}

	/// Scores a normalized request against every rule (§4.2).
	pub fn analyze(&self, req: &NormalizedRequest) -> AnalysisResult {
		let mut hits = Vec::new();
		let mut categories = BTreeSet::new();
		let mut suspected_param = "unknown".to_string();
		let mut score: u32 = 0;

		for rule in &self.rules {
			let target_data = self.select_target(rule.target, req);
			let (matched, param) = self.match_rule(rule, &target_data, req);
			if matched {
				categories.insert(rule.category.clone());
				hits.push(Hit {
					id: rule.id.clone(),
					category: rule.category.clone(),
					target: format!("{:?}", rule.target).to_lowercase(),
					description: rule.description.clone(),
				});
				if let Some(p) = param {
					suspected_param = p;
				}
				score += rule.weight;
			}
		}

		if categories.len() > 1 {
			score += 2;
		}
		if req.query.contains("%25") {
			score += 1;
		}

		AnalysisResult { score, hits, suspected_param, categories }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::normalize::normalize_request;

	fn spec(id: &str, category: &str, target: &str, pattern: &str, weight: u32) -> RuleSpec {
		RuleSpec {
			id: id.to_string(),
			category: category.to_string(),
			description: String::new(),
			target: target.to_string(),
			weight,
			pattern: pattern.to_string(),
			ignore_case: true,
		}
	}

	#[test]
	fn sqli_rule_hits_and_reports_param() {
		let set = RuleSet::from_specs(vec![spec(
			"R1",
			"SQLI",
			"query",
			r"(?i)(\bOR\b|\bUNION\b).*\d=\d",
			5,
		)])
		.unwrap();
		let req = normalize_request("GET", "/api/items", "id=1%20OR%201%3D1", &[], b"", 8192, 2);
		let result = set.analyze(&req);
		assert_eq!(result.score, 5);
		assert_eq!(result.hits.len(), 1);
		assert_eq!(result.suspected_param, "id");
		assert!(result.categories.contains("SQLI"));
	}

	#[test]
	fn no_hits_on_benign_request() {
		let set = RuleSet::from_specs(vec![spec("R1", "SQLI", "query", r"union select", 5)]).unwrap();
		let req = normalize_request("GET", "/home", "q=hello", &[], b"", 8192, 2);
		let result = set.analyze(&req);
		assert_eq!(result.score, 0);
		assert!(result.hits.is_empty());
	}

	#[test]
	fn multi_category_adds_bonus() {
		let set = RuleSet::from_specs(vec![
			spec("R1", "SQLI", "query", "union", 1),
			spec("R2", "XSS", "query", "script", 1),
		])
		.unwrap();
		let req = normalize_request("GET", "/x", "a=union&b=script", &[], b"", 8192, 2);
		let result = set.analyze(&req);
		assert_eq!(result.score, 1 + 1 + 2);
	}

	#[test]
	fn double_encoding_marker_adds_one() {
		let set = RuleSet::from_specs(vec![]).unwrap();
		let req = normalize_request("GET", "/x", "a=%2525", &[], b"", 8192, 0);
		let result = set.analyze(&req);
		assert_eq!(result.score, 1);
	}

	#[test]
	fn push_deduplicates_by_id() {
		let mut set = RuleSet::from_specs(vec![spec("R1", "XSS", "query", "a", 1)]).unwrap();
		let replacement = Rule::compile(spec("R1", "XSS", "query", "b", 9)).unwrap();
		set.push(replacement);
		assert_eq!(set.rules().len(), 1);
		assert_eq!(set.rules()[0].weight, 9);
	}

	#[test]
	fn invalid_pattern_rejected_at_load() {
		let err = RuleSet::from_specs(vec![spec("R1", "XSS", "query", "(unclosed", 1)]);
		assert!(err.is_err());
	}
}
