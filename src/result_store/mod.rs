//! Bounded in-memory buffer of completed query outputs (C12).
//!
//! Keyed by query id; each entry carries its own retention deadline so
//! `evict_expired` can be driven by a background sweep without coordinating
//! with the executor that produced the rows.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

/// One page of a stored result, offset/limit applied.
#[derive(Debug, Clone)]
pub struct ResultPage {
    pub rows: Vec<HashMap<String, Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

struct StoredResult {
    rows: Vec<HashMap<String, Value>>,
    row_count: usize,
    truncated: bool,
    retained_until: DateTime<Utc>,
}

/// Process-wide store for completed query results. Entries are inserted
/// once by the executor on terminal success and read many times by
/// `results()` callers until eviction.
#[derive(Default)]
pub struct ResultStore {
    results: DashMap<Uuid, StoredResult>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, query_id: Uuid, rows: Vec<HashMap<String, Value>>, truncated: bool, retention: Duration) {
        let row_count = rows.len();
        let retained_until = Utc::now() + chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(24));
        self.results.insert(query_id, StoredResult { rows, row_count, truncated, retained_until });
    }

    pub fn get(&self, query_id: Uuid, offset: usize, limit: usize) -> Option<ResultPage> {
        self.results.get(&query_id).map(|r| ResultPage {
            rows: r.rows.iter().skip(offset).take(limit).cloned().collect(),
            row_count: r.row_count,
            truncated: r.truncated,
        })
    }

    pub fn contains(&self, query_id: Uuid) -> bool {
        self.results.contains_key(&query_id)
    }

    /// Evicts every entry whose retention deadline has passed, returning how
    /// many were removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Uuid> = self.results.iter().filter(|e| e.retained_until <= now).map(|e| *e.key()).collect();
        for id in &expired {
            self.results.remove(id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(n: i64) -> HashMap<String, Value> {
        let mut m = HashMap::new();
        m.insert("id".to_string(), Value::from(n));
        m
    }

    #[test]
    fn put_then_get_returns_requested_page() {
        let store = ResultStore::new();
        let id = Uuid::new_v4();
        store.put(id, vec![row(1), row(2), row(3)], false, Duration::from_secs(3600));

        let page = store.get(id, 1, 1).expect("result should be present");
        assert_eq!(page.row_count, 3);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].get("id"), Some(&Value::from(2)));
    }

    #[test]
    fn unknown_query_id_returns_none() {
        let store = ResultStore::new();
        assert!(store.get(Uuid::new_v4(), 0, 10).is_none());
    }

    #[test]
    fn evict_expired_removes_only_past_deadline_entries() {
        let store = ResultStore::new();
        let fresh = Uuid::new_v4();
        let stale = Uuid::new_v4();
        store.put(fresh, vec![row(1)], false, Duration::from_secs(3600));
        store.put(stale, vec![row(1)], false, Duration::from_secs(0));

        let removed = store.evict_expired(Utc::now());
        assert_eq!(removed, 1);
        assert!(store.contains(fresh));
        assert!(!store.contains(stale));
    }
}
