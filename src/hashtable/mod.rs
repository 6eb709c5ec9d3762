//! Shared-memory-style multimap keyed by a fixed-length byte key, hashed
//! into buckets behind one mutex. A hardware-offloaded NIC backend is a
//! data-plane concern out of scope for this table; it always uses the
//! mutex-guarded bucket-map path.
//!
//! Generic over `V: Clone` so callers get an owned copy back from
//! `lookup` rather than an aliased raw pointer into the table.

use crate::module::crc32::const_crc32;
use parking_lot::Mutex;
use std::collections::HashMap;

pub type HashValue = u32;

/// Default capacity hint; unlike the DPDK backend this table grows freely,
/// so the hint only pre-sizes the bucket map.
pub const DEFAULT_HASHTABLE_SIZE: usize = 1024;

struct Entry<V> {
    key: Vec<u8>,
    value: V,
}

/// A multimap from fixed-length byte keys to values, hashed into buckets by
/// CRC-32 and guarded by a single mutex.
pub struct Hashtable<V> {
    key_len: usize,
    buckets: Mutex<HashMap<HashValue, Vec<Entry<V>>>>,
}

impl<V: Clone> Hashtable<V> {
    pub fn new(key_len: usize) -> Self {
        Self {
            key_len,
            buckets: Mutex::new(HashMap::with_capacity(DEFAULT_HASHTABLE_SIZE)),
        }
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn hash_of(&self, key: &[u8]) -> HashValue {
        debug_assert_eq!(key.len(), self.key_len);
        const_crc32(key)
    }

    pub fn insert(&self, key: &[u8], value: V) {
        self.insert_with_hash(key, value, self.hash_of(key))
    }

    pub fn insert_with_hash(&self, key: &[u8], value: V, hash: HashValue) {
        debug_assert_eq!(key.len(), self.key_len);
        self.buckets.lock().entry(hash).or_default().push(Entry {
            key: key.to_vec(),
            value,
        });
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        self.delete_with_hash(key, self.hash_of(key))
    }

    pub fn delete_with_hash(&self, key: &[u8], hash: HashValue) -> bool {
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(&hash) else {
            return false;
        };
        if let Some(idx) = bucket.iter().position(|e| e.key == key) {
            bucket.remove(idx);
            true
        } else {
            false
        }
    }

    pub fn lookup(&self, key: &[u8]) -> Option<V> {
        self.lookup_with_hash(key, self.hash_of(key))
    }

    pub fn lookup_with_hash(&self, key: &[u8], hash: HashValue) -> Option<V> {
        let buckets = self.buckets.lock();
        buckets
            .get(&hash)?
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.clone())
    }

    pub fn lookup_key(&self, key: &[u8]) -> bool {
        self.lookup(key).is_some()
    }

    /// Visit every `(key, value)` pair under the lock. The callback must
    /// not call back into this table (it would deadlock on the same
    /// mutex).
    pub fn foreach(&self, mut callback: impl FnMut(&[u8], &V)) {
        let buckets = self.buckets.lock();
        for bucket in buckets.values() {
            for entry in bucket {
                callback(&entry.key, &entry.value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_returns_the_value() {
        let table: Hashtable<u64> = Hashtable::new(4);
        table.insert(b"abcd", 42);
        assert_eq!(table.lookup(b"abcd"), Some(42));
        assert_eq!(table.lookup(b"xxxx"), None);
    }

    #[test]
    fn delete_removes_only_the_matching_entry() {
        let table: Hashtable<u64> = Hashtable::new(4);
        table.insert(b"abcd", 1);
        table.insert(b"efgh", 2);
        assert!(table.delete(b"abcd"));
        assert_eq!(table.lookup(b"abcd"), None);
        assert_eq!(table.lookup(b"efgh"), Some(2));
        assert!(!table.delete(b"abcd"));
    }

    #[test]
    fn hash_collisions_are_disambiguated_by_key_equality() {
        let table: Hashtable<&'static str> = Hashtable::new(4);
        let hash = table.hash_of(b"aaaa");
        table.insert_with_hash(b"aaaa", "first", hash);
        table.insert_with_hash(b"bbbb", "second", hash);
        assert_eq!(table.lookup_with_hash(b"aaaa", hash), Some("first"));
        assert_eq!(table.lookup_with_hash(b"bbbb", hash), Some("second"));
    }

    #[test]
    fn foreach_visits_every_entry() {
        let table: Hashtable<u64> = Hashtable::new(4);
        table.insert(b"abcd", 1);
        table.insert(b"efgh", 2);
        let mut seen = Vec::new();
        table.foreach(|_, v| seen.push(*v));
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }
}
