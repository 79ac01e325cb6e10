//! Read-only observability over the node's tables.

use std::collections::{BTreeMap, BTreeSet};

use trellis_core::decode_location;

use crate::node::Node;

/// collection -> ownership -> delegated sub-locations.
pub type OwnershipReport = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

impl Node {
    pub fn acknowledged_hosts(&self) -> Vec<String> {
        self.acknowledged_contacts(true)
            .iter()
            .map(|c| c.host())
            .collect()
    }

    pub fn registered_hosts(&self) -> Vec<String> {
        self.registered_contacts(true)
            .iter()
            .map(|c| c.host())
            .collect()
    }

    pub fn routing_hosts(&self) -> Vec<String> {
        self.routing_contacts(true)
            .iter()
            .map(|c| c.host())
            .collect()
    }

    pub fn ownership(&self) -> OwnershipReport {
        let mut report = OwnershipReport::new();
        for collection in self.collections.list() {
            let entry = std::cell::RefCell::new(BTreeMap::<String, BTreeSet<String>>::new());
            collection.browse(
                |ownership| {
                    entry.borrow_mut().entry(ownership.to_string()).or_default();
                },
                |ownership, delegation| {
                    entry
                        .borrow_mut()
                        .entry(ownership.to_string())
                        .or_default()
                        .insert(delegation.to_string());
                },
            );
            report.insert(collection.name().to_string(), entry.into_inner());
        }
        report
    }

    /// Total number of items in every owned subtree.
    pub fn count(&self) -> i64 {
        let mut keys = Vec::new();
        self.owned.traverse(|_, _, owned| keys.extend(owned.iter().cloned()));

        let mut total = 0;
        for key in keys {
            let Some(collection) = self.collections.get(&key.collection) else {
                continue;
            };
            collection.traverse(&key.location, |_, _| {}, |_, _, _| total += 1);
        }
        total
    }

    /// Coherence report: ownerships missing from the owned-key index, and
    /// indexed keys whose collection or set is gone.
    pub fn check(&self) -> Vec<String> {
        let mut findings = Vec::new();

        for collection in self.collections.list() {
            collection.browse(
                |ownership| {
                    let Ok(id) = decode_location(collection.name(), ownership) else {
                        return;
                    };
                    if self.owned.get(&id).is_none() {
                        findings.push(format!("{}:{ownership}", collection.name()));
                    }
                },
                |_, _| {},
            );
        }

        let mut keys = Vec::new();
        self.owned.traverse(|_, _, owned| keys.extend(owned.iter().cloned()));
        for key in keys {
            match self.collections.get(&key.collection) {
                None => findings.push(format!("{}:{}", key.collection, key.location)),
                Some(collection) => {
                    if collection.get(&key.location).is_none() {
                        findings.push(format!("{}:{}", key.collection, key.location));
                    }
                }
            }
        }
        findings
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}
