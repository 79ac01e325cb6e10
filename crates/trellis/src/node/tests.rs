use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, unbounded};
use parking_lot::Mutex;

use trellis_core::{
    Element, Item, ROOT, Storage, StorageError, encode_id, random_id,
};

use crate::node::{MAX_REQUEUES, Node};
use crate::rpc::RemoteContact;
use crate::settings::Settings;

#[derive(Default)]
struct MemStorage {
    snapshot: Mutex<Option<Vec<String>>>,
    logs: Mutex<Vec<String>>,
}

impl MemStorage {
    fn with_state(snapshot: Vec<String>, logs: Vec<String>) -> Self {
        MemStorage {
            snapshot: Mutex::new(Some(snapshot)),
            logs: Mutex::new(logs),
        }
    }

    fn logged(&self) -> Vec<String> {
        self.logs.lock().clone()
    }
}

impl Storage for MemStorage {
    fn exist(&self) -> bool {
        self.snapshot.lock().is_some()
    }

    fn reset(&self) -> Result<(), StorageError> {
        *self.snapshot.lock() = None;
        self.logs.lock().clear();
        Ok(())
    }

    fn save(&self, commands: Vec<String>) -> Result<(), StorageError> {
        *self.snapshot.lock() = Some(commands);
        Ok(())
    }

    fn load(&self) -> Result<Vec<String>, StorageError> {
        self.snapshot.lock().clone().ok_or(StorageError::Corrupted {
            reason: "no snapshot".to_string(),
        })
    }

    fn append(&self, line: String) {
        self.logs.lock().push(line);
    }

    fn stream(&self, start: usize) -> Receiver<String> {
        let (tx, rx) = unbounded();
        for line in self.logs.lock().iter().skip(start) {
            let _ = tx.send(line.clone());
        }
        rx
    }
}

fn settings(set_length: usize, threshold: i64) -> Settings {
    Settings::new(
        &encode_id(&random_id()),
        "127.0.0.1",
        0,
        Duration::from_secs(3600),
        Duration::from_secs(300),
        threshold,
        set_length,
    )
    .unwrap()
}

fn node_with(storage: Arc<MemStorage>, set_length: usize, threshold: i64) -> Arc<Node> {
    Node::new(settings(set_length, threshold), RemoteContact::factory(), Vec::new(), storage)
        .unwrap()
}

fn item(collection: &str, location: &str, id: &str) -> Item {
    Item {
        collection: collection.to_string(),
        location: location.to_string(),
        id: id.to_string(),
    }
}

#[test]
fn self_is_always_registered() {
    let node = node_with(Arc::new(MemStorage::default()), 20, 1000);
    let hosts = node.registered_hosts();
    assert_eq!(hosts.len(), 1);
    assert!(hosts[0].starts_with(node.name()));
    assert!(node.acknowledged_hosts().is_empty());
}

#[test]
fn local_insert_owns_the_root() {
    let storage = Arc::new(MemStorage::default());
    let node = node_with(storage.clone(), 20, 1000);
    let collection = encode_id(&random_id());

    node.insert(Element::new(item(&collection, "abcd", "1"), ROOT, "abcd"))
        .unwrap();

    let report = node.ownership();
    assert!(report[&collection].contains_key(ROOT));
    let (_, set) = node.get(&collection, ROOT).unwrap();
    assert_eq!(set.unwrap().count(), 1);
    assert_eq!(node.count(), 1);
    assert_eq!(storage.logged(), vec![format!("{collection}|abcd|1")]);
    assert!(node.check().is_empty());
}

#[test]
fn shared_prefixes_shrink_into_a_child_set() {
    let node = node_with(Arc::new(MemStorage::default()), 2, 1000);
    let collection = encode_id(&random_id());

    for (i, location) in ["xa", "xb", "xc"].iter().enumerate() {
        node.insert(Element::new(
            item(&collection, location, &i.to_string()),
            ROOT,
            location,
        ))
        .unwrap();
    }

    let (_, root) = node.get(&collection, ROOT).unwrap();
    let root = root.unwrap();
    assert_eq!(root.list.len(), 1);
    assert_eq!(root.list.get("x"), Some(&3));
    assert_eq!(root.count(), 3);

    let (_, child) = node.get(&collection, "x").unwrap();
    assert_eq!(child.unwrap().count(), 3);
}

#[test]
fn unplaceable_items_are_requeued_then_dropped() {
    let node = node_with(Arc::new(MemStorage::default()), 20, 1000);
    let collection = encode_id(&random_id());

    // Root `x` never lies on the walk from `zz` up to `@`, so no ownership
    // is ever created and the element cycles back to its own location.
    node.insert(Element::new(item(&collection, "zz", "1"), "x", "zz"))
        .unwrap();
    assert_eq!(node.queue_len(), 1);

    for _ in 0..MAX_REQUEUES {
        let element = node.queue.consume().unwrap();
        node.insert(element).unwrap();
    }
    assert_eq!(node.queue_len(), 0);
    assert!(node.ownership().is_empty());
}

#[test]
fn transfer_roots_items_at_the_key_location() {
    let node = node_with(Arc::new(MemStorage::default()), 20, 1000);
    let collection = encode_id(&random_id());

    node.transfer(
        node.name(),
        trellis_core::Key {
            collection: collection.clone(),
            location: "x".to_string(),
        },
        vec![item(&collection, "xa", "1"), item(&collection, "xb", "2")],
    )
    .unwrap();
    assert_eq!(node.queue_len(), 2);
    while node.queue_len() > 0 {
        let element = node.queue.consume().unwrap();
        node.insert(element).unwrap();
    }

    let report = node.ownership();
    assert!(report[&collection].contains_key("x"));
    assert!(!report[&collection].contains_key(ROOT));
    let (_, set) = node.get(&collection, "x").unwrap();
    assert_eq!(set.unwrap().count(), 2);
}

#[test]
fn get_leaves_a_tombstone_on_miss() {
    let node = node_with(Arc::new(MemStorage::default()), 20, 1000);
    let collection = encode_id(&random_id());

    let (contact, set) = node.get(&collection, "xy").unwrap();
    assert_eq!(contact.name, node.name());
    assert!(set.is_none());

    // The miss is memoized: the same read now hits the tombstone.
    let (_, again) = node.get(&collection, "xy").unwrap();
    assert!(again.is_none());
}

#[test]
fn restore_replays_snapshot_then_log() {
    let collection = encode_id(&random_id());
    let storage = Arc::new(MemStorage::with_state(
        vec![
            format!("collection|{collection}"),
            "ownership|@".to_string(),
            "delegation|x".to_string(),
        ],
        vec![
            format!("{collection}|xy|1"),
            format!("{collection}|xz|2"),
            format!("{collection}|ab|3"),
        ],
    ));
    let node = node_with(storage, 20, 1000);

    let report = node.ownership();
    assert!(report[&collection][ROOT].contains("x"));

    // Items under the delegated subtree were dropped, the other applied.
    let (_, set) = node.get(&collection, ROOT).unwrap();
    let set = set.unwrap();
    assert_eq!(set.count(), 1);
    assert_eq!(set.list.get("ab:3"), Some(&1));
}

#[test]
fn corrupt_snapshot_resets_the_store() {
    let storage = Arc::new(MemStorage::with_state(
        vec!["garbage command".to_string()],
        vec!["c|xy|1".to_string()],
    ));
    let node = node_with(storage.clone(), 20, 1000);
    assert!(node.ownership().is_empty());
    assert!(!storage.exist());
    assert!(storage.logged().is_empty());
}

#[test]
fn snapshot_orders_ownership_after_collection() {
    let node = node_with(Arc::new(MemStorage::default()), 2, 1000);
    let collection = encode_id(&random_id());
    for (i, location) in ["xa", "xb", "xc"].iter().enumerate() {
        node.insert(Element::new(
            item(&collection, location, &i.to_string()),
            ROOT,
            location,
        ))
        .unwrap();
    }

    let commands = node.snapshot();
    let collection_at = commands
        .iter()
        .position(|c| *c == format!("collection|{collection}"))
        .unwrap();
    let ownership_at = commands.iter().position(|c| c == "ownership|@").unwrap();
    assert!(collection_at < ownership_at);
}

#[test]
fn observe_falls_back_to_bootstraps_when_alone() {
    let bootstrap = trellis_core::ContactInfo {
        name: encode_id(&[0u8; trellis_core::ID_LEN]),
        ips: ["127.0.0.1".to_string()].into(),
        ip: "127.0.0.1".to_string(),
        port: 1,
    };
    let node = Node::new(
        settings(20, 1000),
        RemoteContact::factory(),
        vec![bootstrap.clone()],
        Arc::new(MemStorage::default()),
    )
    .unwrap();
    assert_eq!(node.acknowledged_hosts().len(), 1);

    // The bootstrap is unreachable: the observe round ignores it, then
    // re-acknowledges it the round after, once both tables look empty.
    node.observe().unwrap();
    assert!(node.acknowledged_hosts().is_empty());
    node.observe().unwrap();
    assert_eq!(node.acknowledged_hosts().len(), 1);
}
