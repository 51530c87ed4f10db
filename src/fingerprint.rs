//! Decision-cache key (§3 Fingerprint): a SHA-256 hex digest over the fields
//! that fully determine a decision.

use ring::digest;

/// Builds the cache fingerprint `SHA256(METHOD|path|canonical_query|content_type|body)`.
pub fn build_fingerprint(method: &str, path: &str, query: &str, content_type: &str, body: &str) -> String {
	let canonical = [method.to_uppercase().as_str(), path, query, content_type, body].join("|");
	let digest = digest::digest(&digest::SHA256, canonical.as_bytes());
	hex::encode(digest.as_ref())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn same_inputs_same_fingerprint() {
		let a = build_fingerprint("GET", "/x", "a=1", "text/plain", "");
		let b = build_fingerprint("GET", "/x", "a=1", "text/plain", "");
		assert_eq!(a, b);
	}

	#[test]
	fn differing_field_changes_fingerprint() {
		let a = build_fingerprint("GET", "/x", "a=1", "text/plain", "");
		let b = build_fingerprint("GET", "/x", "a=2", "text/plain", "");
		assert_ne!(a, b);
	}

	#[test]
	fn method_is_case_normalized() {
		let a = build_fingerprint("get", "/x", "", "", "");
		let b = build_fingerprint("GET", "/x", "", "", "");
		assert_eq!(a, b);
	}
}
