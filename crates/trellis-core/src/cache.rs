//! Memoized remote sets, keyed by (collection, location).
//!
//! A `None` entry is a tombstone: a remote miss that the next update round
//! should try to fill.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::Mutex;

use crate::set::{Set, SetView};

#[derive(Default)]
pub struct Cache {
    collections: Mutex<HashMap<String, HashMap<String, Option<Set>>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look an entry up. The outer `Option` is presence, the inner one
    /// distinguishes a cached set from a tombstone. A hit refreshes the
    /// entry's read timestamp.
    pub fn get(&self, collection: &str, location: &str) -> Option<Option<SetView>> {
        let mut guard = self.collections.lock();
        let sets = guard.get_mut(collection)?;
        match sets.get_mut(location) {
            None => None,
            Some(Some(set)) => {
                set.reset();
                Some(Some(set.view()))
            }
            Some(None) => Some(None),
        }
    }

    /// Store an entry, but only when it is missing, a tombstone, or its
    /// count differs from the incoming one.
    pub fn put(&self, collection: &str, location: &str, set: Option<SetView>) {
        let mut guard = self.collections.lock();
        let sets = guard.entry(collection.to_string()).or_default();
        let replace = match (sets.get(location), &set) {
            (None, _) | (Some(None), _) | (Some(Some(_)), None) => true,
            (Some(Some(current)), Some(incoming)) => current.count() != incoming.count(),
        };
        if replace {
            sets.insert(location.to_string(), set.map(Set::from));
        }
    }

    /// Evict stale non-tombstone entries, then return the surviving keys
    /// grouped by collection: the refresh worklist for the update job.
    pub fn refresh(&self, expiration: Duration) -> BTreeMap<String, BTreeSet<String>> {
        let mut guard = self.collections.lock();
        let mut result = BTreeMap::new();

        guard.retain(|collection, sets| {
            sets.retain(|location, set| {
                if let Some(set) = set {
                    if set.expired(expiration) {
                        return false;
                    }
                }
                result
                    .entry(collection.clone())
                    .or_insert_with(BTreeSet::new)
                    .insert(location.clone());
                true
            });
            !sets.is_empty()
        });

        result
    }
}
