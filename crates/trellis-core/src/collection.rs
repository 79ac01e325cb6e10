//! Per-collection index: a tree of sets plus ownership and delegation
//! bookkeeping.
//!
//! The node is authoritative for a location when the nearest owned ancestor
//! does not delegate the path towards it. Aggregate counts flow upward on
//! every mutation so that each parent set's pointer equals its child set's
//! count.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::item::Item;
use crate::set::{Set, SetView, shrink};
use crate::space::{ROOT, parent};

/// Immediate sub-locations handed off to other nodes.
pub type Delegation = BTreeSet<String>;

/// Locations this node is authoritative for, each with its delegated
/// children.
pub type Ownership = BTreeMap<String, Delegation>;

pub struct Collection {
    name: String,
    inner: Mutex<Inner>,
}

struct Inner {
    sets: HashMap<String, Set>,
    owned: BTreeMap<String, Delegation>,
}

impl Collection {
    pub fn new(name: &str, root: &str) -> Self {
        Collection {
            name: name.to_string(),
            inner: Mutex::new(Inner {
                sets: HashMap::from([(root.to_string(), Set::new())]),
                owned: BTreeMap::from([(root.to_string(), Delegation::new())]),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create an empty set at `location` if none exists.
    pub fn ensure(&self, location: &str) {
        self.inner
            .lock()
            .sets
            .entry(location.to_string())
            .or_insert_with(Set::new);
    }

    pub fn get(&self, location: &str) -> Option<SetView> {
        self.inner.lock().sets.get(location).map(Set::view)
    }

    /// Whether this node is authoritative for `location`: the nearest owned
    /// ancestor exists and does not delegate the immediate child on the
    /// path.
    pub fn allowing(&self, location: &str) -> bool {
        let inner = self.inner.lock();
        let mut child = "";
        let mut current = location;
        while !current.is_empty() {
            if let Some(delegation) = inner.owned.get(current) {
                return !delegation.contains(child);
            }
            child = current;
            current = parent(current);
        }
        false
    }

    /// Insert `"location:id"` at the deepest present ancestor set and
    /// propagate counts up to the root. Every child counter that reaches
    /// `delegation_threshold` becomes a new area: the returned ownerships,
    /// with nested areas folded into their enclosing delegation maps.
    pub fn add(
        &self,
        location: &str,
        id: &str,
        set_length: usize,
        delegation_threshold: i64,
    ) -> Ownership {
        let mut inner = self.inner.lock();
        let entry = format!("{location}:{id}");

        let mut added = false;
        let mut areas = Ownership::new();

        let mut current = location.to_string();
        while !current.is_empty() {
            let up = parent(&current).to_string();
            let child = std::mem::replace(&mut current, up);

            if !inner.sets.contains_key(&current) {
                continue;
            }
            if !added {
                let full = match inner.sets.get_mut(&current) {
                    Some(set) => set.add(&entry, set_length),
                    None => continue,
                };
                if full {
                    shrink(&mut inner.sets, &current, set_length);
                }
                added = true;
            } else if let Some(set) = inner.sets.get_mut(&current) {
                if set.incr(&child, 1) == delegation_threshold {
                    areas.insert(child.clone(), Delegation::new());
                }
            }
        }

        let new_areas: Vec<String> = areas.keys().cloned().collect();
        for area in new_areas {
            let up = parent(&area).to_string();
            if up.is_empty() {
                continue;
            }
            if let Some(delegation) = inner.owned.get_mut(&up) {
                delegation.insert(area.clone());
            }
            if let Some(delegation) = areas.get_mut(&up) {
                delegation.insert(area);
            }
        }

        areas
    }

    /// Write an externally observed count for a delegated sub-location and
    /// propagate the delta up to the root.
    pub fn update(&self, location: &str, sublocation: &str, count: i64) {
        let mut inner = self.inner.lock();
        let Some(set) = inner.sets.get_mut(location) else {
            return;
        };
        let previous = set.get(sublocation).unwrap_or(0);
        let delta = count - previous;
        if delta == 0 {
            return;
        }
        set.put(sublocation, count);

        let mut current = location.to_string();
        loop {
            let up = parent(&current).to_string();
            let child = std::mem::replace(&mut current, up);
            match inner.sets.get_mut(&current) {
                Some(set) => set.incr(&child, delta),
                None => return,
            };
        }
    }

    /// Record ownership of `location`, merging any delegations already
    /// known for it.
    pub fn own(&self, location: &str, mut delegation: Delegation) {
        let mut inner = self.inner.lock();
        if let Some(current) = inner.owned.get(location) {
            delegation.extend(current.iter().cloned());
        }
        inner.owned.insert(location.to_string(), delegation);
    }

    /// After taking ownership of `root`, materialize every ancestor set and
    /// ownership entry on the path from each already-owned descendant back
    /// up to `root`, so aggregate counts stay coherent. Returns the
    /// ownerships touched.
    pub fn complete(&self, root: &str) -> Ownership {
        let mut inner = self.inner.lock();
        let mut areas = Ownership::from([(root.to_string(), Delegation::new())]);

        let keys: Vec<String> = inner.owned.keys().cloned().collect();
        for key in keys {
            if key == root || (root != ROOT && !key.starts_with(root)) {
                continue;
            }
            let mut current = key;
            while current != root {
                let up = parent(&current).to_string();
                let previous = std::mem::replace(&mut current, up);

                let count = inner.sets.get(&previous).map(Set::count).unwrap_or(0);
                inner
                    .sets
                    .entry(current.clone())
                    .or_insert_with(Set::new)
                    .put(&previous, count);
                areas
                    .entry(current.clone())
                    .or_default()
                    .insert(previous);
            }
        }
        areas
    }

    /// Hand the subtree at `location` off: drop its sets, collect the leaf
    /// entries as transferable items, record the delegation under the
    /// parent, and forget the ownership. The flag reports whether the
    /// collection has no ownerships left.
    pub fn delegate(&self, location: &str) -> (Vec<Item>, bool) {
        let mut inner = self.inner.lock();

        let mut removed: Vec<String> = Vec::new();
        let mut items: Vec<Item> = Vec::new();
        inner.traverse(
            location,
            &mut |set, _| removed.push(set.to_string()),
            &mut |_, location, id| {
                items.push(Item {
                    collection: self.name.clone(),
                    location: location.to_string(),
                    id: id.to_string(),
                })
            },
        );
        for key in removed {
            inner.sets.remove(&key);
        }

        let up = parent(location).to_string();
        if let Some(delegation) = inner.owned.get_mut(&up) {
            delegation.insert(location.to_string());
        }
        inner.owned.remove(location);

        (items, inner.owned.is_empty())
    }

    /// Delegations whose target is not itself a local ownership: the remote
    /// cache refresh worklist.
    pub fn refresh(&self) -> BTreeSet<String> {
        let inner = self.inner.lock();
        let mut result = BTreeSet::new();
        for delegation in inner.owned.values() {
            for location in delegation {
                if !inner.owned.contains_key(location) {
                    result.insert(location.clone());
                }
            }
        }
        result
    }

    /// Enumerate ownerships and their delegations.
    pub fn browse(&self, mut on_ownership: impl FnMut(&str), mut on_delegation: impl FnMut(&str, &str)) {
        let inner = self.inner.lock();
        for (ownership, delegations) in &inner.owned {
            on_ownership(ownership);
            for delegation in delegations {
                on_delegation(ownership, delegation);
            }
        }
    }

    /// Walk the browsable subtree under `location`, reporting each set with
    /// its aggregate total and each leaf item.
    pub fn traverse(
        &self,
        location: &str,
        mut on_set: impl FnMut(&str, i64),
        mut on_item: impl FnMut(&str, &str, &str),
    ) {
        self.inner.lock().traverse(location, &mut on_set, &mut on_item)
    }

    /// Report items reachable under `location` that no browsable path leads
    /// to: leftovers from delegations recorded without a matching handoff.
    pub fn clean(
        &self,
        location: &str,
        mut on_set: impl FnMut(&str, i64),
        mut on_item: impl FnMut(&str, &str, &str),
    ) {
        self.inner.lock().clean(location, &mut on_set, &mut on_item)
    }

    pub fn browsable(&self, location: &str, key: &str) -> bool {
        self.inner.lock().browsable(location, key)
    }
}

impl Inner {
    fn browsable(&self, location: &str, key: &str) -> bool {
        match self.owned.get(location) {
            Some(delegation) => !delegation.contains(key),
            None => true,
        }
    }

    fn traverse(
        &self,
        location: &str,
        on_set: &mut dyn FnMut(&str, i64),
        on_item: &mut dyn FnMut(&str, &str, &str),
    ) {
        // Restored delegations reference subtrees whose sets left with the
        // handoff; there is nothing to walk below them.
        let Some(set) = self.sets.get(location) else {
            return;
        };
        let entries: Vec<(String, i64)> = set.iter().map(|(k, v)| (k.to_string(), v)).collect();

        let mut total = 0;
        for (key, count) in entries {
            total += count;
            if count == 1 {
                if let Some((item_location, id)) = key.split_once(':') {
                    on_item(location, item_location, id);
                }
                continue;
            }
            if self.browsable(location, &key) && self.sets.contains_key(&key) {
                self.traverse(&key, on_set, on_item);
            }
        }
        on_set(location, total);
    }

    fn clean(
        &self,
        location: &str,
        on_set: &mut dyn FnMut(&str, i64),
        on_item: &mut dyn FnMut(&str, &str, &str),
    ) {
        let Some(set) = self.sets.get(location) else {
            return;
        };
        let entries: Vec<(String, i64)> = set.iter().map(|(k, v)| (k.to_string(), v)).collect();

        for (key, count) in entries {
            if count == 1 {
                let Some((item_location, id)) = key.split_once(':') else {
                    continue;
                };
                let prefix_len = if location == ROOT {
                    item_location.len().min(1)
                } else {
                    (location.len() + 1).min(item_location.len())
                };
                let prefix = &item_location[..prefix_len];
                if !self.browsable(location, prefix) {
                    on_item(location, item_location, id);
                }
                continue;
            }
            if !self.browsable(location, &key)
                && !self.owned.contains_key(&key)
                && self.sets.contains_key(&key)
            {
                self.traverse(&key, on_set, on_item);
            }
        }
    }
}

/// The mutex-guarded name registry of collections.
#[derive(Default)]
pub struct Collections {
    data: Mutex<HashMap<String, Arc<Collection>>>,
}

impl Collections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Collection>> {
        self.data.lock().get(name).cloned()
    }

    pub fn get_or_create(&self, name: &str, root: &str) -> Arc<Collection> {
        self.data
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Collection::new(name, root)))
            .clone()
    }

    pub fn delete(&self, name: &str) {
        self.data.lock().remove(name);
    }

    pub fn list(&self) -> Vec<Arc<Collection>> {
        self.data.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SET_LENGTH: usize = 20;
    const THRESHOLD: i64 = 1000;

    fn totals(collection: &Collection) -> BTreeMap<String, i64> {
        let mut result = BTreeMap::new();
        collection.traverse(ROOT, |set, total| {
            result.insert(set.to_string(), total);
        }, |_, _, _| {});
        result
    }

    #[test]
    fn add_lands_in_the_deepest_present_ancestor() {
        let collection = Collection::new("c", ROOT);
        collection.add("abcd", "1", SET_LENGTH, THRESHOLD);
        let view = collection.get(ROOT).unwrap();
        assert_eq!(view.list.get("abcd:1"), Some(&1));
        assert_eq!(view.count(), 1);
    }

    #[test]
    fn counts_match_child_sets_at_every_level() {
        let collection = Collection::new("c", ROOT);
        for i in 0..8 {
            collection.add(&format!("xy{i}"), &i.to_string(), 2, THRESHOLD);
        }
        collection.add("zz", "9", 2, THRESHOLD);

        // Wherever a parent holds a pointer to a present child set, the
        // pointer equals the child's aggregate count.
        let totals = totals(&collection);
        for (location, total) in &totals {
            if location == ROOT {
                continue;
            }
            let parent_view = collection.get(parent(location)).unwrap();
            assert_eq!(parent_view.list.get(location), Some(total));
        }
        assert_eq!(collection.get(ROOT).unwrap().count(), 9);
    }

    #[test]
    fn add_is_commutative_up_to_counts() {
        let items: Vec<(String, String)> = (0..12)
            .map(|i| (format!("ab{}{}", (b'a' + (i % 3)) as char, i), i.to_string()))
            .collect();

        let forward = Collection::new("c", ROOT);
        for (location, id) in &items {
            forward.add(location, id, 2, THRESHOLD);
        }
        let backward = Collection::new("c", ROOT);
        for (location, id) in items.iter().rev() {
            backward.add(location, id, 2, THRESHOLD);
        }

        assert_eq!(
            forward.get(ROOT).unwrap().count(),
            backward.get(ROOT).unwrap().count()
        );
        for (location, total) in totals(&forward) {
            assert_eq!(totals(&backward).get(&location), Some(&total), "at {location}");
        }
    }

    #[test]
    fn areas_open_at_the_delegation_threshold() {
        let collection = Collection::new("c", ROOT);
        let mut areas = Ownership::new();
        // Force a child set `x` then push its counter to the threshold.
        for i in 0..3 {
            collection.add(&format!("x{}", (b'a' + i) as char), &i.to_string(), 2, 4);
        }
        assert!(areas.is_empty());
        areas = collection.add("xd", "3", 2, 4);
        assert_eq!(areas.keys().collect::<Vec<_>>(), vec!["x"]);

        // The enclosing ownership now lists `x` as delegated.
        let mut delegations = Vec::new();
        collection.browse(|_| {}, |ownership, delegation| {
            delegations.push((ownership.to_string(), delegation.to_string()));
        });
        assert!(delegations.contains(&(ROOT.to_string(), "x".to_string())));
    }

    #[test]
    fn allowing_respects_delegations() {
        let collection = Collection::new("c", ROOT);
        assert!(collection.allowing("anything"));

        collection.own("x", Delegation::from(["xy".to_string()]));
        assert!(collection.allowing("x"));
        assert!(collection.allowing("xa"));
        assert!(!collection.allowing("xy"));
        assert!(!collection.allowing("xyz"));
    }

    #[test]
    fn update_writes_through_and_propagates() {
        let collection = Collection::new("c", ROOT);
        collection.ensure("x");
        collection.update(ROOT, "x", 5);
        assert_eq!(collection.get(ROOT).unwrap().list["x"], 5);

        collection.update(ROOT, "x", 3);
        assert_eq!(collection.get(ROOT).unwrap().list["x"], 3);

        // No-op when the count is unchanged.
        collection.update(ROOT, "x", 3);
        assert_eq!(collection.get(ROOT).unwrap().count(), 3);
    }

    #[test]
    fn delegate_conserves_items_and_revokes_authority() {
        let collection = Collection::new("c", ROOT);
        for i in 0..4 {
            collection.add(&format!("x{}", (b'a' + i) as char), &i.to_string(), 2, 1000);
        }
        collection.add("zz", "9", 2, 1000);
        collection.own("x", Delegation::new());

        let (items, empty) = collection.delegate("x");
        assert!(!empty);
        assert_eq!(items.len(), 4);
        for item in &items {
            assert!(item.location.starts_with('x'));
            assert_eq!(item.collection, "c");
        }
        assert!(!collection.allowing("x"));
        assert!(!collection.allowing("xa"));
        assert!(collection.allowing("zz"));

        let (rest, empty) = collection.delegate(ROOT);
        assert!(empty);
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn complete_materializes_the_path_to_the_new_root() {
        let collection = Collection::new("c", "abc");
        collection.add("abcd", "1", SET_LENGTH, THRESHOLD);

        // Ownership expands upward: everything from `abc` back to `@`.
        collection.own("abc", Delegation::new());
        let areas = collection.complete(ROOT);
        assert!(areas.contains_key(ROOT));
        assert!(areas.contains_key("a"));
        assert!(areas.contains_key("ab"));
        assert_eq!(areas["ab"], Delegation::from(["abc".to_string()]));

        for (location, delegation) in areas {
            collection.own(&location, delegation);
        }
        assert_eq!(collection.get(ROOT).unwrap().list["a"], 1);
        assert_eq!(collection.get("ab").unwrap().list["abc"], 1);
    }

    #[test]
    fn refresh_lists_foreign_delegations_only() {
        let collection = Collection::new("c", ROOT);
        collection.own(ROOT, Delegation::from(["x".to_string(), "y".to_string()]));
        collection.own("y", Delegation::new());
        assert_eq!(collection.refresh(), BTreeSet::from(["x".to_string()]));
    }

    #[test]
    fn registry_creates_once_and_deletes() {
        let collections = Collections::new();
        let a = collections.get_or_create("c", ROOT);
        let b = collections.get_or_create("c", ROOT);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(collections.list().len(), 1);
        collections.delete("c");
        assert!(collections.get("c").is_none());
    }
}
