//! Request normalization (§4.1): canonicalizes an inbound request into a
//! stable structured form used by the regex engine, the fingerprint, and the
//! audit log.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

/// A canonicalized request, ready for rule matching and fingerprinting.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
	pub method: String,
	pub path: String,
	/// Canonical `key=value&...` form, keys sorted ascending.
	pub query: String,
	/// Parsed query parameters, preserving multi-value order per key.
	pub params: BTreeMap<String, Vec<String>>,
	pub body: String,
	pub body_len: usize,
	pub headers: Vec<(String, String)>,
	pub content_type: String,
}

/// Percent-decodes `value`, stopping early at a fixed point. Defeats
/// double-encoding such as `%252e` regardless of nesting depth within
/// budget.
///
/// Runs `rounds + 1` passes, not `rounds`: the original implementation feeds
/// `percent_decode`'s `rounds` explicit passes a value that has already been
/// decoded once implicitly — by `urllib.parse.parse_qsl` for query
/// key/values, by the ASGI layer for the path — so its observed decode depth
/// is always one more than the configured `rounds`. Matching that here means
/// the explicit loop needs the same `+1`.
pub fn percent_decode_rounds(value: &str, rounds: u32) -> String {
	let mut decoded = value.to_string();
	for _ in 0..rounds.saturating_add(1) {
		let next = percent_decode_str(&decoded).decode_utf8_lossy().into_owned();
		if next == decoded {
			break;
		}
		decoded = next;
	}
	decoded
}

/// Collapses `.`/`..`/empty path segments without escaping above root.
pub fn normalize_path(path: &str) -> String {
	let mut parts: Vec<&str> = Vec::new();
	for segment in path.split('/') {
		match segment {
			"" | "." => continue,
			".." => {
				parts.pop();
			},
			other => parts.push(other),
		}
	}
	format!("/{}", parts.join("/"))
}

/// Parses a raw query string into ordered `(key, value)` pairs, preserving
/// blank values the way `urllib.parse.parse_qsl(keep_blank_values=True)` does.
fn parse_qsl(query: &str) -> Vec<(String, String)> {
	if query.is_empty() {
		return Vec::new();
	}
	query
		.split('&')
		.filter(|pair| !pair.is_empty())
		.map(|pair| match pair.split_once('=') {
			Some((k, v)) => (k.replace('+', " "), v.replace('+', " ")),
			None => (pair.replace('+', " "), String::new()),
		})
		.collect()
}

/// Percent-decodes and re-encodes a raw query string into canonical form:
/// keys sorted ascending (stable on value order for equal keys).
pub fn canonical_query(
	raw_query: &str,
	decode_rounds: u32,
) -> (String, BTreeMap<String, Vec<String>>) {
	let mut decoded: Vec<(String, String)> = parse_qsl(raw_query)
		.into_iter()
		.map(|(k, v)| {
			(
				percent_decode_rounds(&k, decode_rounds),
				percent_decode_rounds(&v, decode_rounds),
			)
		})
		.collect();
	decoded.sort_by(|a, b| a.0.cmp(&b.0));

	let canon = decoded
		.iter()
		.map(|(k, v)| {
			format!(
				"{}={}",
				urlencoding::encode(k),
				urlencoding::encode(v)
			)
		})
		.collect::<Vec<_>>()
		.join("&");

	let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
	for (k, v) in decoded {
		params.entry(k).or_default().push(v);
	}
	(canon, params)
}

/// Header names whose values are replaced with `***` before leaving the
/// process on any diagnostic surface that echoes headers (§9 "Header
/// masking"). `LogEntry` doesn't carry a headers field today, so this is
/// used by nothing yet, but kept ready the way `masking.py` keeps it
/// generic over any `Dict[str, str]` in the original implementation.
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie"];

/// Masks sensitive header values for display/diagnostics. `headers` is
/// expected to already have lowercased keys (as [`NormalizedRequest::headers`] does).
pub fn mask_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
	headers
		.iter()
		.map(|(k, v)| {
			if SENSITIVE_HEADERS.contains(&k.as_str()) {
				(k.clone(), "***".to_string())
			} else {
				(k.clone(), v.clone())
			}
		})
		.collect()
}

/// Normalizes the full raw request into a [`NormalizedRequest`].
pub fn normalize_request(
	method: &str,
	raw_path: &str,
	raw_query: &str,
	raw_headers: &[(String, String)],
	body_bytes: &[u8],
	body_truncate: usize,
	decode_rounds: u32,
) -> NormalizedRequest {
	let truncated = &body_bytes[..body_bytes.len().min(body_truncate)];
	let body = String::from_utf8_lossy(truncated).into_owned();

	let path_decoded = percent_decode_rounds(raw_path, decode_rounds);
	let path = normalize_path(&path_decoded);
	let (query, params) = canonical_query(raw_query, decode_rounds);

	let headers: Vec<(String, String)> = raw_headers
		.iter()
		.map(|(k, v)| (k.to_lowercase(), v.clone()))
		.collect();
	let content_type = headers
		.iter()
		.find(|(k, _)| k == "content-type")
		.map(|(_, v)| v.clone())
		.unwrap_or_default();

	NormalizedRequest {
		method: method.to_uppercase(),
		path,
		query,
		params,
		body,
		body_len: body_bytes.len(),
		headers,
		content_type,
	}
}
