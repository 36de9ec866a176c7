use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Thread-safe LRU cache of standalone rewrites of follow-up questions.
///
/// Keys are hashes of the trimmed conversation plus the question, so the
/// same follow-up in a different conversation is a different entry.
#[derive(Clone)]
pub struct DecontextCache {
    cache: Arc<Mutex<LruCache<String, String>>>,
}

impl DecontextCache {
    /// Returns `None` for a zero capacity, which disables caching.
    pub fn new(capacity: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key).cloned()
    }

    /// Least recently used entry is evicted at capacity.
    pub fn put(&self, key: String, value: String) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(key, value);
    }

    pub fn generate_key(&self, history: &str, question: &str) -> String {
        let mut hasher = DefaultHasher::new();
        history.trim().as_bytes().hash(&mut hasher);
        question.trim().as_bytes().hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_zero_capacity_disables_cache() {
        assert!(DecontextCache::new(0).is_none());
    }

    #[test]
    fn test_cache_hit_after_put() {
        let cache = DecontextCache::new(10).unwrap();
        let key = cache.generate_key("Användare: Vad är LAS?", "Gäller den mig?");
        cache.put(key.clone(), "Gäller LAS för mig?".to_string());
        assert_eq!(cache.get(&key), Some("Gäller LAS för mig?".to_string()));
    }

    #[test]
    fn test_key_depends_on_history() {
        let cache = DecontextCache::new(10).unwrap();
        let a = cache.generate_key("Användare: Vad är LAS?", "Gäller den mig?");
        let b = cache.generate_key("Användare: Vad är MBL?", "Gäller den mig?");
        assert_ne!(a, b);
        assert_eq!(a, cache.generate_key("  Användare: Vad är LAS?  ", "Gäller den mig? "));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = DecontextCache::new(2).unwrap();
        let k1 = cache.generate_key("h", "q1");
        let k2 = cache.generate_key("h", "q2");
        let k3 = cache.generate_key("h", "q3");

        cache.put(k1.clone(), "v1".to_string());
        cache.put(k2.clone(), "v2".to_string());
        let _ = cache.get(&k1);
        cache.put(k3.clone(), "v3".to_string());

        assert_eq!(cache.get(&k1), Some("v1".to_string()));
        assert_eq!(cache.get(&k2), None);
        assert_eq!(cache.get(&k3), Some("v3".to_string()));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = DecontextCache::new(100).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let key = cache.generate_key("h", &format!("fråga {i}"));
                    cache.put(key.clone(), format!("svar {i}"));
                    assert_eq!(cache.get(&key), Some(format!("svar {i}")));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
