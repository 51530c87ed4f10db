//! Per-IP token bucket rate limiter (§4.3).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
	tokens: f64,
	last_ts: Instant,
}

/// Token-bucket rate limiter with separate burst caps for normal vs.
/// suspicious callers.
pub struct RateLimiter {
	burst: f64,
	burst_suspicious: f64,
	refill_per_sec: f64,
	buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
	pub fn new(burst: f64, refill_per_sec: f64, burst_suspicious: f64) -> Self {
		RateLimiter { burst, burst_suspicious, refill_per_sec, buckets: Mutex::new(HashMap::new()) }
	}

	/// Admits or denies a request from `ip`. `suspicious` only changes which
	/// burst cap applies.
	pub fn allow(&self, ip: &str, suspicious: bool) -> bool {
		let cap = if suspicious { self.burst_suspicious } else { self.burst };
		let now = Instant::now();
		let mut buckets = self.buckets.lock().expect("ratelimit lock");
		let bucket = buckets.entry(ip.to_string()).or_insert_with(|| Bucket { tokens: cap, last_ts: now });

		let elapsed = now.duration_since(bucket.last_ts).as_secs_f64();
		bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(cap);
		bucket.last_ts = now;

		if bucket.tokens < 1.0 {
			return false;
		}
		bucket.tokens -= 1.0;
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn admits_up_to_burst_then_denies() {
		let limiter = RateLimiter::new(3.0, 0.0, 1.0);
		assert!(limiter.allow("1.2.3.4", false));
		assert!(limiter.allow("1.2.3.4", false));
		assert!(limiter.allow("1.2.3.4", false));
		assert!(!limiter.allow("1.2.3.4", false));
	}

	#[test]
	fn buckets_are_independent_per_ip() {
		let limiter = RateLimiter::new(1.0, 0.0, 1.0);
		assert!(limiter.allow("1.1.1.1", false));
		assert!(limiter.allow("2.2.2.2", false));
		assert!(!limiter.allow("1.1.1.1", false));
	}

	#[test]
	fn suspicious_flag_uses_separate_cap() {
		let limiter = RateLimiter::new(30.0, 0.0, 1.0);
		assert!(limiter.allow("1.1.1.1", true));
		assert!(!limiter.allow("1.1.1.1", true));
	}
}
