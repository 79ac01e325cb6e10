//! Value types shared across the node and its wire surfaces.

use serde::{Deserialize, Serialize};

/// The atomic indexed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub collection: String,
    pub location: String,
    pub id: String,
}

impl Item {
    /// The backup-log line form: `collection|location|id`.
    pub fn content(&self) -> String {
        format!("{}|{}|{}", self.collection, self.location, self.id)
    }

    pub fn parse(line: &str) -> Option<Item> {
        let mut parts = line.splitn(3, '|');
        Some(Item {
            collection: parts.next()?.to_string(),
            location: parts.next()?.to_string(),
            id: parts.next()?.to_string(),
        })
    }
}

/// A (collection, location) pair: one owned subtree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub collection: String,
    pub location: String,
}

/// One ingest attempt: `current` starts at the item's location and walks up
/// through its ancestors until an owner accepts it.
#[derive(Debug, Clone)]
pub struct Element {
    pub item: Item,
    pub root: String,
    pub current: String,
    pub requeues: u32,
}

impl Element {
    pub fn new(item: Item, root: &str, current: &str) -> Self {
        Element {
            item,
            root: root.to_string(),
            current: current.to_string(),
            requeues: 0,
        }
    }
}
