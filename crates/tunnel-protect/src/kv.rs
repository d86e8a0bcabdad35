//! Single-process kv fallback
//!
//! String values with explicit TTLs, expired lazily on read. The API
//! mirrors what the external kv store provides so ban records keep the
//! same semantics in either deployment.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-memory kv store with per-key TTLs
pub struct TtlKv {
    entries: DashMap<String, Entry>,
}

impl TtlKv {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Set a value with a TTL in seconds
    pub fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Utc::now() + Duration::seconds(ttl_seconds as i64),
            },
        );
    }

    /// Read a live value; expired entries are removed on the way
    pub fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Seconds left on a live key
    pub fn remaining_ttl(&self, key: &str) -> Option<u64> {
        let entry = self.entries.get(key)?;
        let left = (entry.expires_at - Utc::now()).num_seconds();
        if left > 0 {
            Some(left as u64)
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    /// Remove a key, returning whether it existed
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Live keys, sweeping expired entries as a side effect
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries.retain(|_, e| e.expires_at > now);
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TtlKv {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let kv = TtlKv::new();
        kv.set_ex("ban:10.0.0.1", "ddos", 60);
        assert_eq!(kv.get("ban:10.0.0.1").as_deref(), Some("ddos"));
        assert!(kv.remaining_ttl("ban:10.0.0.1").unwrap() <= 60);
        assert!(kv.delete("ban:10.0.0.1"));
        assert!(kv.get("ban:10.0.0.1").is_none());
    }

    #[test]
    fn test_expiry_is_lazy_but_observed() {
        let kv = TtlKv::new();
        kv.set_ex("short", "x", 0);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(kv.get("short").is_none());
        assert!(kv.remaining_ttl("short").is_none());
        assert!(kv.is_empty());
    }

    #[test]
    fn test_overwrite_refreshes_ttl() {
        let kv = TtlKv::new();
        kv.set_ex("key", "a", 1);
        kv.set_ex("key", "b", 600);
        assert_eq!(kv.get("key").as_deref(), Some("b"));
        assert!(kv.remaining_ttl("key").unwrap() > 500);
    }
}
