use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Short SHA-256 prefix of a client identifier, safe to log and to use as a key.
pub fn client_fingerprint(client_id: &str) -> String {
    let digest = Sha256::digest(client_id.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

/// Storage for per-client violation windows and bans.
///
/// Implementations prune expired state lazily on access. There is no
/// background sweep.
pub trait ViolationStore: Send + Sync {
    /// Records one violation. Returns the ban expiry when this violation
    /// triggers a ban.
    fn record_violation(&self, client: &str, now: Instant) -> Option<Instant>;

    /// Active ban expiry for `client`, if any.
    fn ban_expiry(&self, client: &str, now: Instant) -> Option<Instant>;
}

#[derive(Debug, Default)]
struct ClientEntry {
    violations: VecDeque<Instant>,
    banned_until: Option<Instant>,
}

impl ClientEntry {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.violations.front() {
            if now.duration_since(oldest) >= window {
                self.violations.pop_front();
            } else {
                break;
            }
        }
        if self.banned_until.is_some_and(|until| until <= now) {
            self.banned_until = None;
        }
    }

    fn is_idle(&self) -> bool {
        self.violations.is_empty() && self.banned_until.is_none()
    }
}

/// Entries live in an arena of slots; the map points client keys at slots
/// and freed slots are reused.
#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Option<ClientEntry>>,
    index: HashMap<String, usize>,
    free: Vec<usize>,
}

impl Arena {
    fn get_mut(&mut self, client: &str) -> Option<&mut ClientEntry> {
        let slot = *self.index.get(client)?;
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn get_or_insert(&mut self, client: &str) -> &mut ClientEntry {
        let slot = match self.index.get(client) {
            Some(&slot) => slot,
            None => {
                let slot = match self.free.pop() {
                    Some(slot) => {
                        self.slots[slot] = Some(ClientEntry::default());
                        slot
                    }
                    None => {
                        self.slots.push(Some(ClientEntry::default()));
                        self.slots.len() - 1
                    }
                };
                self.index.insert(client.to_string(), slot);
                slot
            }
        };
        self.slots[slot].get_or_insert_with(ClientEntry::default)
    }

    fn remove(&mut self, client: &str) {
        if let Some(slot) = self.index.remove(client) {
            self.slots[slot] = None;
            self.free.push(slot);
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

/// In-process violation store guarded by a mutex.
pub struct InMemoryViolationStore {
    window: Duration,
    threshold: usize,
    ban: Duration,
    arena: Mutex<Arena>,
}

impl InMemoryViolationStore {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs),
            threshold: config.threshold.max(1),
            ban: Duration::from_secs(config.ban_secs),
            arena: Mutex::new(Arena::default()),
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.arena.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ViolationStore for InMemoryViolationStore {
    fn record_violation(&self, client: &str, now: Instant) -> Option<Instant> {
        let mut arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
        let entry = arena.get_or_insert(client);
        entry.prune(now, self.window);

        entry.violations.push_back(now);
        while entry.violations.len() > self.threshold {
            entry.violations.pop_front();
        }

        if entry.violations.len() >= self.threshold {
            let until = now + self.ban;
            entry.banned_until = Some(until);
            entry.violations.clear();
            return Some(until);
        }

        None
    }

    fn ban_expiry(&self, client: &str, now: Instant) -> Option<Instant> {
        let mut arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
        let entry = arena.get_mut(client)?;
        entry.prune(now, self.window);

        let until = entry.banned_until;
        if entry.is_idle() {
            arena.remove(client);
        }
        until
    }
}

/// Sliding-window violation counter with timed bans.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn ViolationStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn ViolationStore>) -> Self {
        Self { store }
    }

    pub fn in_memory(config: &RateLimitConfig) -> Self {
        Self::new(Arc::new(InMemoryViolationStore::new(config)))
    }

    /// Seconds until the ban on `client_id` lifts, if banned.
    pub fn retry_after(&self, client_id: &str, now: Instant) -> Option<u64> {
        let key = client_fingerprint(client_id);
        self.store
            .ban_expiry(&key, now)
            .map(|until| until.saturating_duration_since(now).as_secs().max(1))
    }

    /// Returns true when this violation caused a ban.
    pub fn record_violation(&self, client_id: &str, now: Instant) -> bool {
        let key = client_fingerprint(client_id);
        match self.store.record_violation(&key, now) {
            Some(until) => {
                tracing::warn!(
                    client = %key,
                    ban_secs = until.saturating_duration_since(now).as_secs(),
                    "Client banned after repeated violations"
                );
                true
            }
            None => {
                tracing::debug!(client = %key, "Violation recorded");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            window_secs: 300,
            threshold: 6,
            ban_secs: 900,
        }
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = client_fingerprint("10.1.2.3");
        assert_eq!(a.len(), 12);
        assert_eq!(a, client_fingerprint("10.1.2.3"));
        assert_ne!(a, client_fingerprint("10.1.2.4"));
    }

    #[test]
    fn test_sixth_violation_bans() {
        let store = InMemoryViolationStore::new(&config());
        let start = Instant::now();

        for i in 0..5 {
            assert!(store.record_violation("c", start + Duration::from_secs(i)).is_none());
            assert!(store.ban_expiry("c", start + Duration::from_secs(i)).is_none());
        }

        let until = store.record_violation("c", start + Duration::from_secs(5));
        assert_eq!(until, Some(start + Duration::from_secs(5 + 900)));
        assert!(store.ban_expiry("c", start + Duration::from_secs(6)).is_some());
    }

    #[test]
    fn test_old_violations_leave_the_window() {
        let store = InMemoryViolationStore::new(&config());
        let start = Instant::now();

        for i in 0..5 {
            store.record_violation("c", start + Duration::from_secs(i));
        }
        let later = start + Duration::from_secs(400);
        assert!(store.record_violation("c", later).is_none());
        assert!(store.ban_expiry("c", later).is_none());
    }

    #[test]
    fn test_ban_expires_and_entry_is_evicted_lazily() {
        let store = InMemoryViolationStore::new(&config());
        let start = Instant::now();

        for _ in 0..6 {
            store.record_violation("c", start);
        }
        assert_eq!(store.tracked_clients(), 1);
        assert!(store.ban_expiry("c", start + Duration::from_secs(899)).is_some());

        assert!(store.ban_expiry("c", start + Duration::from_secs(900)).is_none());
        assert_eq!(store.tracked_clients(), 0);
    }

    #[test]
    fn test_clients_are_independent_and_slots_reused() {
        let store = InMemoryViolationStore::new(&config());
        let start = Instant::now();

        store.record_violation("a", start);
        store.record_violation("b", start);
        assert_eq!(store.tracked_clients(), 2);

        assert!(store.ban_expiry("a", start + Duration::from_secs(301)).is_none());
        assert_eq!(store.tracked_clients(), 1);

        store.record_violation("c", start + Duration::from_secs(302));
        let arena = store.arena.lock().unwrap();
        assert_eq!(arena.slots.len(), 2);
    }

    #[test]
    fn test_rate_limiter_reports_retry_after() {
        let limiter = RateLimiter::in_memory(&config());
        let start = Instant::now();

        let banned: Vec<bool> = (0..6)
            .map(|_| limiter.record_violation("client-1", start))
            .collect();
        assert_eq!(banned, vec![false, false, false, false, false, true]);

        assert_eq!(limiter.retry_after("client-1", start), Some(900));
        assert_eq!(limiter.retry_after("client-2", start), None);
        assert_eq!(limiter.retry_after("client-1", start + Duration::from_secs(900)), None);
    }
}
