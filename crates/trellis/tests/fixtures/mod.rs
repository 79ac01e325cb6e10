//! In-process test doubles: a name-keyed network of nodes reachable
//! through the contact surface, and an in-memory backup store.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, unbounded};
use parking_lot::Mutex;

use trellis::{Node, Settings};
use trellis_core::{
    Contact, ContactInfo, Id, Item, Key, NewContact, Peer, PeerError, SetView, Storage,
    StorageError, encode_id, random_id,
};

/// A process-local overlay: nodes registered by name, contacts routed by
/// lookup instead of sockets.
#[derive(Default)]
pub struct Network {
    nodes: Mutex<HashMap<String, Arc<Node>>>,
}

impl Network {
    pub fn new() -> Arc<Network> {
        Arc::new(Network::default())
    }

    pub fn join(&self, node: &Arc<Node>) {
        self.nodes
            .lock()
            .insert(node.name().to_string(), Arc::clone(node));
    }

    pub fn drop_node(&self, name: &str) {
        self.nodes.lock().remove(name);
    }

    fn lookup(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.lock().get(name).cloned()
    }

    pub fn factory(self: &Arc<Network>) -> NewContact {
        let network = Arc::downgrade(self);
        Arc::new(move |info| {
            Ok(Arc::new(TestContact {
                id: info.decode_id()?,
                info: info.clone(),
                network: network.clone(),
            }) as Arc<dyn Contact>)
        })
    }
}

/// A contact whose remote side is another node in the same process.
pub struct TestContact {
    id: Id,
    info: ContactInfo,
    network: Weak<Network>,
}

impl TestContact {
    fn target(&self) -> Result<Arc<Node>, PeerError> {
        self.network
            .upgrade()
            .and_then(|network| network.lookup(&self.info.name))
            .ok_or_else(|| PeerError::Unavailable {
                reason: format!("{} is not reachable", self.info.name),
            })
    }
}

fn service<T>(result: trellis::Result<T>) -> Result<T, PeerError> {
    result.map_err(|err| PeerError::Rejected {
        reason: err.to_string(),
    })
}

impl Peer for TestContact {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.info.name
    }
}

impl Contact for TestContact {
    fn ips(&self) -> BTreeSet<String> {
        self.info.ips.clone()
    }

    fn ip(&self) -> String {
        self.info.ip.clone()
    }

    fn port(&self) -> u16 {
        self.info.port
    }

    fn ping(&self, origin: ContactInfo) -> Result<ContactInfo, PeerError> {
        service(self.target()?.ping(origin))
    }

    fn neighbors(&self, origin: &str) -> Result<Vec<ContactInfo>, PeerError> {
        service(self.target()?.neighbors(origin))
    }

    fn random(&self, origin: &str) -> Result<Option<ContactInfo>, PeerError> {
        service(self.target()?.random(origin))
    }

    fn transfer(&self, origin: &str, key: Key, items: Vec<Item>) -> Result<(), PeerError> {
        service(self.target()?.transfer(origin, key, items))
    }

    fn get(
        &self,
        collection: &str,
        location: &str,
    ) -> Result<(ContactInfo, Option<SetView>), PeerError> {
        service(self.target()?.get(collection, location))
    }

    fn publish(&self, item: Item, root: &str, current: &str) -> Result<(), PeerError> {
        service(self.target()?.publish(item, root, current))
    }
}

/// An in-memory backup store.
#[derive(Default)]
pub struct MemStorage {
    snapshot: Mutex<Option<Vec<String>>>,
    logs: Mutex<Vec<String>>,
}

impl MemStorage {
    pub fn with_state(snapshot: Vec<String>, logs: Vec<String>) -> Self {
        MemStorage {
            snapshot: Mutex::new(Some(snapshot)),
            logs: Mutex::new(logs),
        }
    }

    pub fn logged(&self) -> Vec<String> {
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

pub struct NodeOptions {
    pub set_length: usize,
    pub delegation_threshold: i64,
    pub bootstraps: Vec<ContactInfo>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        NodeOptions {
            set_length: 20,
            delegation_threshold: 1000,
            bootstraps: Vec::new(),
        }
    }
}

/// Spawn a node under a given name and register it on the network. The
/// tick delay is an hour so recurring jobs only run when a test calls
/// them.
pub fn named_node(network: &Arc<Network>, name: &str, options: NodeOptions) -> Arc<Node> {
    let settings = Settings::new(
        name,
        "127.0.0.1",
        0,
        Duration::from_secs(3600),
        Duration::from_secs(300),
        options.delegation_threshold,
        options.set_length,
    )
    .expect("valid node name");
    let node = Node::new(
        settings,
        network.factory(),
        options.bootstraps,
        Arc::new(MemStorage::default()),
    )
    .expect("node construction");
    network.join(&node);
    node
}

pub fn spawn_node(network: &Arc<Network>, options: NodeOptions) -> Arc<Node> {
    named_node(network, &encode_id(&random_id()), options)
}

/// Poll until `check` holds or the timeout passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
