//! Decision cache (§4.5): maps a request fingerprint to a prior decision
//! tuple, bounded by both TTL and size.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The cached decision tuple `(decision, ml_label, ml_confidence, stage)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDecision {
	pub decision: String,
	pub ml_label: Option<String>,
	pub ml_confidence: Option<f64>,
	pub stage: String,
}

struct Entry {
	inserted_at: Instant,
	value: CachedDecision,
}

/// Approximate-LRU-by-insertion decision cache (§9 "Approximate LRU").
pub struct DecisionCache {
	ttl: Duration,
	max_size: usize,
	store: Mutex<HashMap<String, Entry>>,
}

impl DecisionCache {
	pub fn new(ttl: Duration, max_size: usize) -> Self {
		DecisionCache { ttl, max_size, store: Mutex::new(HashMap::new()) }
	}

	pub fn get(&self, key: &str) -> Option<CachedDecision> {
		let mut store = self.store.lock().expect("cache lock");
		if let Some(entry) = store.get(key) {
			if entry.inserted_at.elapsed() <= self.ttl {
				return Some(entry.value.clone());
			}
			store.remove(key);
		}
		None
	}

	pub fn set(&self, key: String, value: CachedDecision) {
		let mut store = self.store.lock().expect("cache lock");
		if store.len() >= self.max_size && !store.contains_key(&key) {
			if let Some(oldest_key) = store
				.iter()
				.min_by_key(|(_, entry)| entry.inserted_at)
				.map(|(k, _)| k.clone())
			{
				store.remove(&oldest_key);
			}
		}
		store.insert(key, Entry { inserted_at: Instant::now(), value });
	}

	#[cfg(test)]
	fn len(&self) -> usize {
		self.store.lock().expect("cache lock").len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn decision(label: &str) -> CachedDecision {
		CachedDecision {
			decision: label.to_string(),
			ml_label: None,
			ml_confidence: None,
			stage: "regex".to_string(),
		}
	}

	#[test]
	fn get_after_set_returns_value() {
		let cache = DecisionCache::new(Duration::from_secs(300), 512);
		cache.set("fp1".to_string(), decision("allow"));
		assert_eq!(cache.get("fp1"), Some(decision("allow")));
	}

	#[test]
	fn expired_entry_is_a_miss() {
		let cache = DecisionCache::new(Duration::from_millis(1), 512);
		cache.set("fp1".to_string(), decision("allow"));
		std::thread::sleep(Duration::from_millis(20));
		assert_eq!(cache.get("fp1"), None);
		assert_eq!(cache.len(), 0);
	}

	#[test]
	fn eviction_drops_oldest_insertion_when_full() {
		let cache = DecisionCache::new(Duration::from_secs(300), 2);
		cache.set("a".to_string(), decision("allow"));
		std::thread::sleep(Duration::from_millis(5));
		cache.set("b".to_string(), decision("allow"));
		std::thread::sleep(Duration::from_millis(5));
		cache.set("c".to_string(), decision("allow"));
		assert_eq!(cache.len(), 2);
		assert_eq!(cache.get("a"), None);
		assert!(cache.get("b").is_some());
		assert!(cache.get("c").is_some());
	}
}
