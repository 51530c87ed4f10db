//! Per-IP blocklist with inline TTL garbage collection (§4.4).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct IpBlocklist {
	default_ttl: Duration,
	blocks: Mutex<HashMap<String, Instant>>,
}

impl IpBlocklist {
	pub fn new(default_ttl: Duration) -> Self {
		IpBlocklist { default_ttl, blocks: Mutex::new(HashMap::new()) }
	}

	/// Blocks `ip` until now + `ttl` (or the configured default).
	pub fn block(&self, ip: &str, ttl: Option<Duration>) {
		let expire = Instant::now() + ttl.unwrap_or(self.default_ttl);
		self.blocks.lock().expect("blocklist lock").insert(ip.to_string(), expire);
	}

	pub fn unblock(&self, ip: &str) {
		self.blocks.lock().expect("blocklist lock").remove(ip);
	}

	/// Sweeps expired entries, then reports whether `ip` is currently blocked.
	pub fn is_blocked(&self, ip: &str) -> bool {
		let now = Instant::now();
		let mut blocks = self.blocks.lock().expect("blocklist lock");
		blocks.retain(|_, expire| *expire > now);
		blocks.get(ip).is_some_and(|expire| *expire > now)
	}

	/// Snapshot of currently-blocked IPs with remaining TTL in seconds, for
	/// the operator surface.
	pub fn snapshot(&self) -> Vec<(String, u64)> {
		let now = Instant::now();
		let blocks = self.blocks.lock().expect("blocklist lock");
		blocks
			.iter()
			.filter(|(_, expire)| **expire > now)
			.map(|(ip, expire)| (ip.clone(), expire.saturating_duration_since(now).as_secs()))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn blocked_ip_reports_blocked() {
		let list = IpBlocklist::new(Duration::from_secs(600));
		list.block("5.5.5.5", None);
		assert!(list.is_blocked("5.5.5.5"));
	}

	#[test]
	fn zero_ttl_expires_immediately() {
		let list = IpBlocklist::new(Duration::from_secs(600));
		list.block("5.5.5.5", Some(Duration::from_secs(0)));
		assert!(!list.is_blocked("5.5.5.5"));
	}

	#[test]
	fn unblock_removes_entry() {
		let list = IpBlocklist::new(Duration::from_secs(600));
		list.block("5.5.5.5", None);
		list.unblock("5.5.5.5");
		assert!(!list.is_blocked("5.5.5.5"));
	}

	#[test]
	fn unrelated_ip_not_blocked() {
		let list = IpBlocklist::new(Duration::from_secs(600));
		list.block("5.5.5.5", None);
		assert!(!list.is_blocked("9.9.9.9"));
	}
}
