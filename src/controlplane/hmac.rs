//! Shared HMAC signing/verification for the control-plane wire protocol
//! (§4.10). Used by the proxy's event sender (sign) and the control plane's
//! ingest handler (verify).

use ring::hmac;

/// Computes `hex(HMAC-SHA256(secret, "{timestamp}\n{nonce}\n" + body))`.
pub fn sign(secret: &str, timestamp: &str, nonce: &str, body: &[u8]) -> String {
	let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
	let mut message = Vec::with_capacity(timestamp.len() + nonce.len() + 2 + body.len());
	message.extend_from_slice(timestamp.as_bytes());
	message.push(b'\n');
	message.extend_from_slice(nonce.as_bytes());
	message.push(b'\n');
	message.extend_from_slice(body);
	let tag = hmac::sign(&key, &message);
	hex::encode(tag.as_ref())
}

/// Verifies a signature in constant time.
pub fn verify(secret: &str, timestamp: &str, nonce: &str, body: &[u8], signature: &str) -> bool {
	let expected = sign(secret, timestamp, nonce, body);
	ring::constant_time::verify_slices_are_equal(expected.as_bytes(), signature.as_bytes()).is_ok()
}

/// Generates a 128-bit hex nonce.
pub fn random_nonce() -> String {
	use rand::RngCore;
	let mut bytes = [0u8; 16];
	rand::rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}
