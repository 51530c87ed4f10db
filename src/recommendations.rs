//! Category -> remediation recommendation catalogue (§3 Recommendation, §9
//! "Recommendation catalogue"). Ported from the original `recommendations.py`
//! table, re-keyed in English and stripped of the original's Russian prose.

use std::collections::BTreeSet;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Recommendation {
	pub id: &'static str,
	pub title: &'static str,
	pub description: &'static str,
	pub owasp_link: &'static str,
}

const CATEGORY_RECS: &[(&str, &[&str])] = &[
	("SQLI", &["REC_SQL_PARAM", "REC_SQL_ORM", "REC_SQL_WHITELIST"]),
	("XSS", &["REC_XSS_ENCODE", "REC_CSP", "REC_XSS_SANITIZE"]),
	("TRAVERSAL", &["REC_PATH_WHITELIST", "REC_PATH_CHROOT", "REC_PATH_CANONICALIZE"]),
	("CMD", &["REC_CMD_AVOID_SHELL", "REC_CMD_WHITELIST", "REC_CMD_ESCAPE"]),
	("SSRF", &["REC_SSRF_ALLOWLIST", "REC_SSRF_VALIDATE", "REC_SSRF_NETWORK_ISOLATION"]),
];

const RECOMMENDATION_DETAILS: &[Recommendation] = &[
	Recommendation {
		id: "REC_SQL_PARAM",
		title: "Use parameterized queries",
		description: "Use prepared statements with bound parameters instead of string concatenation.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/Query_Parameterization_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_SQL_ORM",
		title: "Use an ORM",
		description: "Prefer an ORM over hand-built SQL for routine data access.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/Injection_Prevention_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_SQL_WHITELIST",
		title: "Validate input",
		description: "Apply whitelist validation for expected value shapes (numbers, enums).",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/Input_Validation_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_XSS_ENCODE",
		title: "Escape output",
		description: "HTML-escape user-controlled data before rendering it.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/Cross_Site_Scripting_Prevention_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_XSS_SANITIZE",
		title: "Sanitize HTML",
		description: "Run untrusted HTML through a sanitizer before rendering.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/Cross_Site_Scripting_Prevention_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_CSP",
		title: "Content Security Policy",
		description: "Set a Content-Security-Policy header to blunt inline-script injection.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/Content_Security_Policy_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_PATH_WHITELIST",
		title: "Whitelist paths",
		description: "Restrict file access to a whitelist of permitted paths or names.",
		owasp_link: "https://owasp.org/www-community/attacks/Path_Traversal",
	},
	Recommendation {
		id: "REC_PATH_CHROOT",
		title: "Constrain the root directory",
		description: "Verify the resolved path stays within an allowed base directory.",
		owasp_link: "https://owasp.org/www-community/attacks/Path_Traversal",
	},
	Recommendation {
		id: "REC_PATH_CANONICALIZE",
		title: "Canonicalize paths",
		description: "Resolve to a canonical path before any access check.",
		owasp_link: "https://owasp.org/www-community/attacks/Path_Traversal",
	},
	Recommendation {
		id: "REC_CMD_AVOID_SHELL",
		title: "Avoid shell invocation",
		description: "Pass commands as argument vectors instead of invoking a shell.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/OS_Command_Injection_Defense_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_CMD_WHITELIST",
		title: "Whitelist commands",
		description: "Restrict the set of allowed commands and arguments to a whitelist.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/OS_Command_Injection_Defense_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_CMD_ESCAPE",
		title: "Escape arguments",
		description: "Escape shell arguments if shelling out is unavoidable.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/OS_Command_Injection_Defense_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_SSRF_ALLOWLIST",
		title: "Allowlist destinations",
		description: "Restrict outbound requests to an allowlist of permitted domains/IPs.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/Server_Side_Request_Forgery_Prevention_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_SSRF_VALIDATE",
		title: "Validate URLs",
		description: "Parse and validate URLs before dispatch; block private IP ranges (10/8, 172.16/12, 192.168/16).",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/Server_Side_Request_Forgery_Prevention_Cheat_Sheet.html",
	},
	Recommendation {
		id: "REC_SSRF_NETWORK_ISOLATION",
		title: "Network isolation",
		description: "Use network policy to restrict the application's outbound traffic.",
		owasp_link: "https://cheatsheetseries.owasp.org/cheatsheets/Server_Side_Request_Forgery_Prevention_Cheat_Sheet.html",
	},
];

/// Maps attack categories to a deduplicated, sorted list of recommendation ids.
pub fn map_recommendations(categories: &BTreeSet<String>) -> Vec<String> {
	let mut recs = BTreeSet::new();
	for category in categories {
		if let Some((_, ids)) = CATEGORY_RECS.iter().find(|(cat, _)| *cat == category) {
			recs.extend(ids.iter().map(|s| s.to_string()));
		}
	}
	recs.into_iter().collect()
}

/// Resolves recommendation ids to their full details, skipping unknown ids.
pub fn recommendation_details(ids: &[String]) -> Vec<Recommendation> {
	ids.iter()
		.filter_map(|id| RECOMMENDATION_DETAILS.iter().find(|r| r.id == id).cloned())
		.collect()
}
