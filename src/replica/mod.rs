//! In-memory replica of one collection.
//!
//! Single-key changes go straight to the concurrent map. Whole-replica swaps
//! take the coarse lock for writing and snapshots take it for reading, so a
//! reader never observes a half-applied bulk replacement.
//!
//! Nested collections are keyed by `owner/key`, so the same entity key under
//! two owners names two records.

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::entity::{Entity, KeySpace};

pub struct Replica<T: Entity> {
    entries: DashMap<String, T>,
    bulk: RwLock<()>,
}

impl<T: Entity> Default for Replica<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Replica<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            bulk: RwLock::new(()),
        }
    }

    /// Replica key of the record stored at `key` (under `owner` for nested
    /// collections)
    pub fn record_key(owner: Option<&str>, key: &str) -> String {
        match (T::KEY_SPACE, owner) {
            (KeySpace::Nested, Some(owner)) => format!("{owner}/{key}"),
            _ => key.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        let _guard = self.bulk.read();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        let _guard = self.bulk.read();
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let _guard = self.bulk.read();
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        let _guard = self.bulk.read();
        self.entries.contains_key(key)
    }

    pub fn upsert(&self, key: impl Into<String>, entity: T) {
        self.entries.insert(key.into(), entity);
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.entries.remove(key).map(|(_, entity)| entity)
    }

    /// Remove every record owned by `owner`; returns how many were removed
    pub fn remove_owned_by(&self, owner: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entity| entity.owner().as_deref() != Some(owner));
        before.saturating_sub(self.entries.len())
    }

    /// Swap the whole content for `entries`
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (String, T)>) {
        let _guard = self.bulk.write();
        self.entries.clear();
        for (key, entity) in entries {
            self.entries.insert(key, entity);
        }
    }

    /// Current records sorted by key
    pub fn snapshot(&self) -> Vec<T> {
        self.keyed_snapshot().into_iter().map(|(_, v)| v).collect()
    }

    pub fn keyed_snapshot(&self) -> Vec<(String, T)> {
        let _guard = self.bulk.read();
        let mut items: Vec<(String, T)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }

    /// First record in key order matching `predicate`
    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<T> {
        self.keyed_snapshot()
            .into_iter()
            .map(|(_, entity)| entity)
            .find(|entity| predicate(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Booking, Food};

    fn booking(owner: &str, id: i64) -> Booking {
        Booking {
            id,
            account_id: owner.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_replace_all_drops_old_keys() {
        let replica = Replica::<Food>::new();
        replica.upsert("1", Food::default());
        replica.upsert("2", Food::default());
        replica.replace_all(vec![("3".to_string(), Food::default())]);

        assert_eq!(replica.len(), 1);
        assert!(replica.contains("3"));
        assert!(!replica.contains("1"));
    }

    #[test]
    fn test_remove_owned_by_only_touches_owner() {
        let replica = Replica::<Booking>::new();
        replica.upsert("acct1/1", booking("acct1", 1));
        replica.upsert("acct1/2", booking("acct1", 2));
        replica.upsert("acct2/1", booking("acct2", 1));

        assert_eq!(replica.remove_owned_by("acct1"), 2);
        assert_eq!(replica.len(), 1);
        assert!(replica.contains("acct2/1"));
    }

    #[test]
    fn test_nested_keys_include_owner() {
        assert_eq!(Replica::<Booking>::record_key(Some("acct1"), "5"), "acct1/5");
        assert_eq!(Replica::<Food>::record_key(Some("acct1"), "5"), "5");
        assert_eq!(Replica::<Food>::record_key(None, "5"), "5");

        let replica = Replica::<Booking>::new();
        replica.upsert("acct1/5", booking("acct1", 5));
        replica.upsert("acct2/5", booking("acct2", 5));
        assert_eq!(replica.len(), 2);
        assert_eq!(replica.find(|b| b.id == 5).unwrap().account_id, "acct1");
    }

    #[test]
    fn test_readers_never_see_a_half_replaced_replica() {
        let replica = Replica::<Food>::new();
        let batch = || (0..200).map(|i| (i.to_string(), Food::default()));
        replica.replace_all(batch());

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    replica.replace_all(batch());
                }
            });
            for _ in 0..2000 {
                assert!(!replica.is_empty());
                assert_eq!(replica.len(), 200);
                assert!(replica.get("199").is_some());
            }
        });
    }

    #[test]
    fn test_snapshot_is_sorted_by_key() {
        let replica = Replica::<Food>::new();
        for key in ["b", "c", "a"] {
            replica.upsert(key, Food::default());
        }
        let keys: Vec<String> = replica.keyed_snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
