//! TTL-bounded, LRU-evicting cache of whole answer sections.
//!
//! Each entry is keyed by the full question (name, qtype, qclass) and
//! stores the exact RR list that answered it, so a cache hit only has
//! to rewrite TTLs, never rebuild an answer.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dns_message::types::{DomainName, QueryClass, QueryType, ResourceRecord};

const MUTEX_POISON_MESSAGE: &str = "cache mutex poisoned, cannot recover - aborting";

/// Default maximum number of entries; overridden by configuration's
/// `cache_capacity`.
pub const DEFAULT_CAPACITY: usize = 4096;

/// How often the background sweeper removes expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

type Key = (DomainName, QueryType, QueryClass);

#[derive(Debug, Clone)]
struct Entry {
    answers: Vec<ResourceRecord>,
    expiry: Instant,
}

/// A `Cache` behind a mutex, cheaply cloneable so every worker task
/// can hold a handle to the same underlying store.
#[derive(Debug, Clone)]
pub struct SharedCache {
    inner: Arc<Mutex<Cache>>,
}

impl SharedCache {
    pub fn new(capacity: usize) -> Self {
        SharedCache {
            inner: Arc::new(Mutex::new(Cache::new(capacity))),
        }
    }

    /// Look up a question. Returns answers with TTLs rewritten to the
    /// remaining time to live, floored at 1 second. Expired entries
    /// are removed and treated as a miss.
    pub fn get(&self, name: &DomainName, qtype: QueryType, qclass: QueryClass) -> Option<Vec<ResourceRecord>> {
        self.inner.lock().expect(MUTEX_POISON_MESSAGE).get(name, qtype, qclass)
    }

    /// Store an answer section under the given key with the given
    /// TTL. A TTL of 0 is not stored. Callers are expected to have
    /// already clamped `ttl` into `[MIN_TTL, MAX_TTL]` (see
    /// `clamp_ttl`).
    pub fn put(
        &self,
        name: DomainName,
        qtype: QueryType,
        qclass: QueryClass,
        answers: Vec<ResourceRecord>,
        ttl: u32,
    ) {
        if ttl == 0 {
            return;
        }
        self.inner
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .put(name, qtype, qclass, answers, ttl);
    }

    /// Remove every expired entry. Called periodically by the
    /// background sweeper task.
    pub fn sweep(&self) -> usize {
        self.inner.lock().expect(MUTEX_POISON_MESSAGE).sweep()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect(MUTEX_POISON_MESSAGE).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Cache {
    entries: HashMap<Key, Entry>,
    /// Order entries were last accessed in; the smallest `Reverse<Instant>`
    /// (i.e. the oldest access) pops first.
    access_order: priority_queue::PriorityQueue<Key, Reverse<Instant>>,
    capacity: usize,
}

impl Cache {
    fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be nonzero");
        Cache {
            entries: HashMap::with_capacity(capacity),
            access_order: priority_queue::PriorityQueue::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&mut self, name: &DomainName, qtype: QueryType, qclass: QueryClass) -> Option<Vec<ResourceRecord>> {
        let key = (name.clone(), qtype, qclass);
        let now = Instant::now();

        let expired = match self.entries.get(&key) {
            Some(entry) => entry.expiry <= now,
            None => return None,
        };
        if expired {
            self.remove(&key);
            return None;
        }

        let entry = self.entries.get(&key).expect("checked above");
        let remaining = entry.expiry.saturating_duration_since(now).as_secs();
        let remaining_ttl = u32::try_from(remaining).unwrap_or(u32::MAX).max(1);
        let answers = entry
            .answers
            .iter()
            .cloned()
            .map(|mut rr| {
                rr.ttl = remaining_ttl;
                rr
            })
            .collect();

        self.access_order.change_priority(&key, Reverse(now));
        Some(answers)
    }

    fn put(
        &mut self,
        name: DomainName,
        qtype: QueryType,
        qclass: QueryClass,
        answers: Vec<ResourceRecord>,
        ttl: u32,
    ) {
        let key = (name, qtype, qclass);
        let now = Instant::now();
        let expiry = now + Duration::from_secs(u64::from(ttl));

        if self.entries.insert(key.clone(), Entry { answers, expiry }).is_none() {
            self.access_order.push(key, Reverse(now));
        } else {
            self.access_order.change_priority(&key, Reverse(now));
        }

        self.evict_if_over_capacity();
    }

    fn evict_if_over_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            if let Some((key, _)) = self.access_order.pop() {
                self.entries.remove(&key);
            } else {
                break;
            }
        }
    }

    fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let expired_keys: Vec<Key> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expiry <= now)
            .map(|(key, _)| key.clone())
            .collect();
        let count = expired_keys.len();
        for key in expired_keys {
            self.remove(&key);
        }
        count
    }

    fn remove(&mut self, key: &Key) {
        self.entries.remove(key);
        self.access_order.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_message::types::test_util::{a_record, domain};
    use dns_message::types::RecordType;
    use std::thread::sleep;

    fn qtype_a() -> QueryType {
        QueryType::Record(RecordType::A)
    }

    fn qclass_in() -> QueryClass {
        QueryClass::Record(dns_message::types::RecordClass::IN)
    }

    #[test]
    fn miss_on_empty_cache() {
        let cache = SharedCache::new(16);
        assert_eq!(cache.get(&domain("example.com"), qtype_a(), qclass_in()), None);
    }

    #[test]
    fn put_then_get_returns_answers() {
        let cache = SharedCache::new(16);
        let rr = a_record("example.com", "1.2.3.4".parse().unwrap());
        cache.put(domain("example.com"), qtype_a(), qclass_in(), vec![rr.clone()], 300);

        let got = cache.get(&domain("example.com"), qtype_a(), qclass_in()).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].rtype_with_data, rr.rtype_with_data);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = SharedCache::new(16);
        let rr = a_record("example.com", "1.2.3.4".parse().unwrap());
        cache.put(domain("example.com"), qtype_a(), qclass_in(), vec![rr], 1);

        sleep(Duration::from_millis(1100));

        assert_eq!(cache.get(&domain("example.com"), qtype_a(), qclass_in()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_is_not_stored() {
        let cache = SharedCache::new(16);
        let rr = a_record("example.com", "1.2.3.4".parse().unwrap());
        cache.put(domain("example.com"), qtype_a(), qclass_in(), vec![rr], 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_bound_is_enforced_by_lru_eviction() {
        let cache = SharedCache::new(2);
        let rr = a_record("a.example.com", "1.1.1.1".parse().unwrap());

        cache.put(domain("a.example.com"), qtype_a(), qclass_in(), vec![rr.clone()], 300);
        cache.put(domain("b.example.com"), qtype_a(), qclass_in(), vec![rr.clone()], 300);
        // touch "a" so "b" becomes the least-recently-used entry
        cache.get(&domain("a.example.com"), qtype_a(), qclass_in());
        cache.put(domain("c.example.com"), qtype_a(), qclass_in(), vec![rr], 300);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&domain("b.example.com"), qtype_a(), qclass_in()).is_none());
        assert!(cache.get(&domain("a.example.com"), qtype_a(), qclass_in()).is_some());
        assert!(cache.get(&domain("c.example.com"), qtype_a(), qclass_in()).is_some());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let cache = SharedCache::new(16);
        let rr = a_record("short.example.com", "1.1.1.1".parse().unwrap());
        cache.put(domain("short.example.com"), qtype_a(), qclass_in(), vec![rr.clone()], 1);
        cache.put(domain("long.example.com"), qtype_a(), qclass_in(), vec![rr], 300);

        sleep(Duration::from_millis(1100));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }
}
