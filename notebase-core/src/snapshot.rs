use crate::base::canonical_base_key;
use crate::query::QueryRow;
use crate::vault::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Precomputed rows for one base.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: i64,
    pub rows: Vec<QueryRow>,
    pub total: usize,
}

impl Snapshot {
    pub fn new(rows: Vec<QueryRow>) -> Self {
        Self {
            timestamp: now_ms(),
            total: rows.len(),
            rows,
        }
    }

    pub fn page(&self, page: usize, limit: usize) -> Vec<QueryRow> {
        let start = page.saturating_sub(1).saturating_mul(limit).min(self.rows.len());
        let end = start.saturating_add(limit).min(self.rows.len());
        self.rows[start..end].to_vec()
    }
}

/// Snapshot store keyed by canonical base path.
///
/// Entries live until replaced: no TTL, no eviction, last writer wins.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: RwLock<HashMap<String, Snapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicked writer leaves the map itself intact.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Snapshot>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Snapshot>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, base: &str) -> Option<Snapshot> {
        self.read().get(&canonical_base_key(base)).cloned()
    }

    pub fn set(&self, base: &str, snapshot: Snapshot) {
        self.write().insert(canonical_base_key(base), snapshot);
    }

    /// Entry point for the live-evaluation feed.
    pub fn push(&self, base: &str, rows: Vec<QueryRow>) -> Snapshot {
        let snapshot = Snapshot::new(rows);
        tracing::debug!(
            base = %canonical_base_key(base),
            rows = snapshot.total,
            "snapshot pushed"
        );
        self.set(base, snapshot.clone());
        snapshot
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn entries(&self) -> Vec<(String, Snapshot)> {
        let mut entries: Vec<(String, Snapshot)> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn writes_survive_a_poisoned_lock() {
        let cache = Arc::new(SnapshotCache::new());
        cache.push("Tasks", Vec::new());

        let poisoner = cache.clone();
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            panic!("writer panicked while holding the lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(cache.entries.is_poisoned());

        cache.set("Views/Other", Snapshot::new(Vec::new()));
        assert_eq!(cache.keys(), vec!["Tasks.base", "Views/Other.base"]);
        assert!(cache.get("Tasks").is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.entries().len(), 2);
    }
}
