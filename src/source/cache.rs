//! Session store for loaded call tables

use crate::error::{Error, Result};
use crate::records::{CallRecord, CallTable};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

struct StoreInner {
    lru: LruCache<String, Arc<CallTable>>,
    total_records: usize,
}

impl StoreInner {
    /// Evict least recently used sessions until `incoming` more records fit in `max_records`
    fn make_room(&mut self, incoming: usize, max_records: usize) {
        while self.total_records + incoming > max_records {
            if let Some((evicted_key, evicted)) = self.lru.pop_lru() {
                self.total_records = self.total_records.saturating_sub(evicted.len());
                tracing::debug!(session = %evicted_key, "evicted session");
            } else {
                break;
            }
        }
    }

    fn insert(&mut self, key: String, table: Arc<CallTable>) {
        self.total_records += table.len();
        // A full LRU drops its oldest entry on push; keep the record count in step
        if let Some((_, dropped)) = self.lru.push(key, table) {
            self.total_records = self.total_records.saturating_sub(dropped.len());
        }
    }
}

/// Loaded tables keyed by session, with entry count and record budget limits
pub struct SessionStore {
    inner: Mutex<StoreInner>,
    max_records: usize,
}

impl SessionStore {
    /// Create a new store with the specified session capacity and record budget
    pub fn new(capacity: usize, max_records: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(StoreInner {
                lru: LruCache::new(capacity),
                total_records: 0,
            }),
            max_records,
        }
    }

    /// Store a table under `key`, replacing any previous table.
    /// Returns `None` (and stores nothing) when the table alone exceeds the budget.
    /// Evicts least recently used sessions until the budget is satisfied.
    pub fn put(&self, key: String, table: CallTable) -> Option<Arc<CallTable>> {
        let new_size = table.len();

        if new_size > self.max_records {
            tracing::warn!(
                records = new_size,
                max_records = self.max_records,
                "call table exceeds session budget"
            );
            return None;
        }

        let mut inner = self.inner.lock();

        if let Some(old) = inner.lru.pop(&key) {
            inner.total_records = inner.total_records.saturating_sub(old.len());
        }

        inner.make_room(new_size, self.max_records);
        let table = Arc::new(table);
        inner.insert(key, Arc::clone(&table));
        Some(table)
    }

    /// Append records to an existing session in one step under the store lock.
    /// Returns the updated table; the session is left unchanged on error.
    pub fn append(&self, key: &str, records: Vec<CallRecord>) -> Result<Arc<CallTable>> {
        let mut inner = self.inner.lock();

        let current = inner
            .lru
            .get(key)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound {
                key: key.to_string(),
            })?;

        let new_size = current.len() + records.len();
        if new_size > self.max_records {
            tracing::warn!(
                session = %key,
                records = new_size,
                max_records = self.max_records,
                "call table exceeds session budget"
            );
            return Err(Error::SessionCapacity {
                records: new_size,
                max_records: self.max_records,
            });
        }

        if let Some(old) = inner.lru.pop(key) {
            inner.total_records = inner.total_records.saturating_sub(old.len());
        }
        inner.make_room(new_size, self.max_records);

        let mut table = Arc::unwrap_or_clone(current);
        table.extend(records);
        let table = Arc::new(table);
        inner.insert(key.to_string(), Arc::clone(&table));

        Ok(table)
    }

    /// Get a shared handle to a session's table
    pub fn get(&self, key: &str) -> Option<Arc<CallTable>> {
        self.inner.lock().lru.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    /// Remove a session
    pub fn remove(&self, key: &str) -> Option<Arc<CallTable>> {
        let mut inner = self.inner.lock();
        let table = inner.lru.pop(key)?;
        inner.total_records = inner.total_records.saturating_sub(table.len());
        Some(table)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.total_records = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }

    /// Total records held across all sessions
    pub fn total_records(&self) -> usize {
        self.inner.lock().total_records
    }

    /// Generate a session key that does not collide with existing sessions
    pub fn generate_unique_key(&self) -> String {
        let inner = self.inner.lock();
        loop {
            let key = uuid::Uuid::new_v4().to_string();
            if !inner.lru.contains(&key) {
                return key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{extract_records, CallRecord};

    fn table(rows: usize) -> CallTable {
        let line = "1 01-JAN-24 10:00:00 919876543210 120 120 0 120 1.20";
        let record: CallRecord = extract_records(line).remove(0);
        CallTable::from_records(vec![record; rows])
    }

    #[test]
    fn test_store_basic_operations() {
        let store = SessionStore::new(10, 1000);
        assert!(store.is_empty());

        assert!(store.put("s1".to_string(), table(3)).is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_records(), 3);
        assert_eq!(store.get("s1").unwrap().len(), 3);
        assert!(store.contains("s1"));
        assert!(!store.contains("s2"));
    }

    #[test]
    fn test_store_capacity_eviction() {
        let store = SessionStore::new(2, 1000);

        store.put("s1".to_string(), table(1));
        store.put("s2".to_string(), table(1));
        store.put("s3".to_string(), table(1));

        // s1 should be evicted (LRU)
        assert!(!store.contains("s1"));
        assert!(store.contains("s2"));
        assert!(store.contains("s3"));
        assert_eq!(store.total_records(), 2);
    }

    #[test]
    fn test_store_record_budget_eviction() {
        let store = SessionStore::new(10, 100);

        store.put("s1".to_string(), table(30));
        store.put("s2".to_string(), table(30));
        store.put("s3".to_string(), table(30));
        assert_eq!(store.total_records(), 90);

        store.put("s4".to_string(), table(30));
        assert!(!store.contains("s1"));
        assert!(store.contains("s4"));
        assert_eq!(store.total_records(), 90);
    }

    #[test]
    fn test_store_oversized_table_rejected() {
        let store = SessionStore::new(10, 5);
        assert!(store.put("big".to_string(), table(6)).is_none());
        assert!(store.is_empty());
        assert_eq!(store.total_records(), 0);
    }

    #[test]
    fn test_store_replace_adjusts_records() {
        let store = SessionStore::new(10, 1000);
        store.put("s1".to_string(), table(50));
        store.put("s1".to_string(), table(20));
        assert_eq!(store.total_records(), 20);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_remove_and_clear() {
        let store = SessionStore::new(10, 1000);
        store.put("s1".to_string(), table(2));
        store.put("s2".to_string(), table(2));

        assert_eq!(store.remove("s1").unwrap().len(), 2);
        assert!(store.remove("s1").is_none());
        assert_eq!(store.total_records(), 2);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.total_records(), 0);
    }

    #[test]
    fn test_store_append_extends_in_place() {
        let store = SessionStore::new(10, 1000);
        store.put("s1".to_string(), table(2));

        let updated = store.append("s1", table(3).records().to_vec()).unwrap();
        assert_eq!(updated.len(), 5);
        assert_eq!(store.get("s1").unwrap().len(), 5);
        assert_eq!(store.total_records(), 5);
    }

    #[test]
    fn test_store_append_errors_leave_session_intact() {
        let store = SessionStore::new(10, 4);
        store.put("s1".to_string(), table(3));

        let err = store.append("s1", table(2).records().to_vec()).unwrap_err();
        assert!(matches!(err, Error::SessionCapacity { records: 5, max_records: 4 }));
        assert_eq!(store.get("s1").unwrap().len(), 3);
        assert_eq!(store.total_records(), 3);

        let err = store.append("missing", Vec::new()).unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }

    #[test]
    fn test_store_append_evicts_other_sessions() {
        let store = SessionStore::new(10, 10);
        store.put("old".to_string(), table(4));
        store.put("s1".to_string(), table(4));

        store.append("s1", table(4).records().to_vec()).unwrap();
        assert!(!store.contains("old"));
        assert_eq!(store.total_records(), 8);
    }

    #[test]
    fn test_generate_unique_key() {
        let store = SessionStore::new(10, 1000);
        let a = store.generate_unique_key();
        let b = store.generate_unique_key();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36); // UUID format
    }
}
