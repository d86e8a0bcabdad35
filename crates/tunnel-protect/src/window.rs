//! Sliding-window counters
//!
//! Each key holds a sorted log of request timestamps; entries outside
//! the window are evicted lazily on read, the way the kv-store
//! sorted-set variant behaves.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

/// Outcome of a window check
#[derive(Debug, Clone, Copy)]
pub struct WindowDecision {
    pub allowed: bool,
    /// Requests in the window, including this one when admitted
    pub count: u32,
    /// Seconds until the oldest in-window entry leaves the window
    pub retry_after: u64,
}

/// Keyed sliding-window request logs
pub struct WindowStore {
    windows: DashMap<String, Mutex<Vec<DateTime<Utc>>>>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self { windows: DashMap::new() }
    }

    /// Admit if fewer than `cap` requests fall within the window, then
    /// record the request; rejected requests are not recorded
    pub fn check_and_record(&self, key: &str, window_seconds: u64, cap: u32) -> WindowDecision {
        let entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut log = entry.lock();
        let now = Utc::now();
        evict(&mut log, now, window_seconds);

        if (log.len() as u32) < cap {
            log.push(now);
            WindowDecision {
                allowed: true,
                count: log.len() as u32,
                retry_after: 0,
            }
        } else {
            WindowDecision {
                allowed: false,
                count: log.len() as u32,
                retry_after: retry_after(&log, now, window_seconds),
            }
        }
    }

    /// Record unconditionally and return the in-window count
    pub fn record(&self, key: &str, window_seconds: u64) -> u32 {
        let entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut log = entry.lock();
        let now = Utc::now();
        evict(&mut log, now, window_seconds);
        log.push(now);
        log.len() as u32
    }

    /// In-window count without recording
    pub fn count(&self, key: &str, window_seconds: u64) -> u32 {
        match self.windows.get(key) {
            Some(entry) => {
                let mut log = entry.lock();
                evict(&mut log, Utc::now(), window_seconds);
                log.len() as u32
            }
            None => 0,
        }
    }

    /// Seconds until the window under `key` frees a slot
    pub fn reset_in(&self, key: &str, window_seconds: u64) -> u64 {
        match self.windows.get(key) {
            Some(entry) => {
                let mut log = entry.lock();
                let now = Utc::now();
                evict(&mut log, now, window_seconds);
                retry_after(&log, now, window_seconds)
            }
            None => 0,
        }
    }

    /// Drop all state for a key
    pub fn reset(&self, key: &str) -> bool {
        self.windows.remove(key).is_some()
    }

    /// Keys currently tracked, including idle ones pending eviction
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}

fn evict(log: &mut Vec<DateTime<Utc>>, now: DateTime<Utc>, window_seconds: u64) {
    let cutoff = now - Duration::seconds(window_seconds as i64);
    log.retain(|&t| t > cutoff);
}

fn retry_after(log: &[DateTime<Utc>], now: DateTime<Utc>, window_seconds: u64) -> u64 {
    match log.first() {
        Some(&oldest) => {
            let free_at = oldest + Duration::seconds(window_seconds as i64);
            (free_at - now).num_seconds().max(1) as u64
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_cap_then_rejects() {
        let store = WindowStore::new();
        for i in 1..=7 {
            let decision = store.check_and_record("auth_login:1.2.3.4", 300, 7);
            assert!(decision.allowed, "request {i} should be admitted");
            assert_eq!(decision.count, i);
        }
        let rejected = store.check_and_record("auth_login:1.2.3.4", 300, 7);
        assert!(!rejected.allowed);
        assert!(rejected.retry_after >= 1 && rejected.retry_after <= 300);
    }

    #[test]
    fn test_rejected_requests_are_not_recorded() {
        let store = WindowStore::new();
        for _ in 0..3 {
            store.check_and_record("k", 60, 3);
        }
        for _ in 0..10 {
            assert!(!store.check_and_record("k", 60, 3).allowed);
        }
        assert_eq!(store.count("k", 60), 3);
    }

    #[test]
    fn test_keys_are_independent() {
        let store = WindowStore::new();
        store.check_and_record("a", 60, 1);
        assert!(!store.check_and_record("a", 60, 1).allowed);
        assert!(store.check_and_record("b", 60, 1).allowed);
    }

    #[test]
    fn test_eviction_frees_the_window() {
        let store = WindowStore::new();
        // Zero-length window: every prior entry is already outside it.
        assert!(store.check_and_record("k", 0, 1).allowed);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.check_and_record("k", 0, 1).allowed);
    }

    #[test]
    fn test_reset_clears_state() {
        let store = WindowStore::new();
        store.record("k", 60);
        assert_eq!(store.count("k", 60), 1);
        assert!(store.reset("k"));
        assert_eq!(store.count("k", 60), 0);
    }
}
