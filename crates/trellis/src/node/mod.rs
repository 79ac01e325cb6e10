//! The node orchestrator: peer tables, the owned-key index, the collection
//! engine, and the service surface the wire layers expose.

mod jobs;
pub mod monitoring;
mod snapshot;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use trellis_core::{
    Cache, Collection, Collections, Contact, ContactInfo, Element, Id, Item, Key, NewContact,
    Ownership, Peer, PeerError, PeerInfo, Queue, SetView, Storage, Tree, decode_location, parent,
};

use crate::error::{Error, Result};
use crate::settings::Settings;

/// How many times an element may fall all the way back to its own location
/// before the node drops it instead of re-enqueueing forever.
const MAX_REQUEUES: u32 = 8;

pub struct Node {
    settings: Settings,
    new_contact: NewContact,
    bootstraps: Vec<ContactInfo>,
    routing: Tree<PeerInfo>,
    registered: Tree<Arc<dyn Contact>>,
    acknowledged: Tree<Arc<dyn Contact>>,
    collections: Collections,
    owned: Tree<BTreeSet<Key>>,
    cache: Cache,
    queue: Queue<Element>,
    storage: Arc<dyn Storage>,
    ready: AtomicBool,
    self_contact: OnceLock<Arc<dyn Contact>>,
}

impl Node {
    /// Build a node: register its own contact, acknowledge the bootstraps,
    /// and restore from backup. A corrupt backup is logged, reset, and
    /// otherwise ignored.
    pub fn new(
        settings: Settings,
        new_contact: NewContact,
        bootstraps: Vec<ContactInfo>,
        storage: Arc<dyn Storage>,
    ) -> Result<Arc<Node>> {
        let node = Arc::new(Node {
            settings,
            new_contact,
            bootstraps,
            routing: Tree::new(),
            registered: Tree::new(),
            acknowledged: Tree::new(),
            collections: Collections::new(),
            owned: Tree::new(),
            cache: Cache::new(),
            queue: Queue::new(),
            storage,
            ready: AtomicBool::new(false),
            self_contact: OnceLock::new(),
        });

        let local: Arc<dyn Contact> = Arc::new(LocalContact::new(&node));
        let _ = node.self_contact.set(local.clone());
        node.register(vec![local]);
        node.acknowledge(node.make_contacts(&node.bootstraps));

        if let Err(err) = node.restore() {
            tracing::warn!(error = %err, "restoring from backup failed, starting empty");
            node.storage.reset()?;
        }
        node.ready.store(true, Ordering::Release);

        Ok(node)
    }

    pub fn name(&self) -> &str {
        self.settings.name()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn contact_info(&self) -> ContactInfo {
        self.settings.contact_info()
    }

    /// Stop accepting ingest work; the feed loop ends once drained.
    pub fn close(&self) {
        self.queue.close();
    }

    // ------------------------------------------------------------------
    // Service surface
    // ------------------------------------------------------------------

    /// Probe: acknowledge the caller and answer with our own contact.
    pub fn ping(&self, origin: ContactInfo) -> Result<ContactInfo> {
        if !origin.name.is_empty() {
            self.acknowledge(self.make_contacts(std::slice::from_ref(&origin)));
        }
        Ok(self.contact_info())
    }

    /// The routing snapshot towards `origin`: one registered contact per
    /// distance bucket.
    pub fn neighbors(&self, origin: &str) -> Result<Vec<ContactInfo>> {
        let peer = PeerInfo::new(origin)?;
        let mut buckets: Vec<Option<Arc<dyn Contact>>> = vec![None; trellis_core::BITS];
        self.registered.extract(&peer.id(), &mut buckets);
        Ok(buckets.into_iter().flatten().map(|c| c.info()).collect())
    }

    /// Any one registered contact, excluding ourselves.
    pub fn random(&self, origin: &str) -> Result<Option<ContactInfo>> {
        let _ = PeerInfo::new(origin)?;
        let contacts = self.registered_contacts(false);
        if contacts.is_empty() {
            return Ok(None);
        }
        let pick = rand::random_range(0..contacts.len());
        Ok(Some(contacts[pick].info()))
    }

    /// Accept a delegated subtree: every item re-enters through the ingest
    /// queue rooted at the transferred key.
    pub fn transfer(&self, _origin: &str, key: Key, items: Vec<Item>) -> Result<()> {
        for item in items {
            self.publish(item, &key.location, &key.location)?;
        }
        Ok(())
    }

    /// Fetch the membership set at (collection, location) along with the
    /// nearest registered contact; a local miss leaves a cache tombstone
    /// for the update job to fill.
    pub fn get(&self, collection: &str, location: &str) -> Result<(ContactInfo, Option<SetView>)> {
        let id = decode_location(collection, location)?;
        let nearest = match self.registered.nearest(&id) {
            Some(contact) => contact,
            None => self.local(),
        };
        let nearest = nearest.info();

        if let Some(c) = self.collections.get(collection) {
            if let Some(view) = c.get(location) {
                return Ok((nearest, Some(view)));
            }
        }
        if let Some(cached) = self.cache.get(collection, location) {
            return Ok((nearest, cached));
        }
        self.cache.put(collection, location, None);
        Ok((nearest, None))
    }

    /// Enqueue an ingest attempt.
    pub fn publish(&self, item: Item, root: &str, current: &str) -> Result<()> {
        self.queue.add(Element::new(item, root, current));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Peer lifecycle
    // ------------------------------------------------------------------

    fn acknowledge(&self, candidates: Vec<Arc<dyn Contact>>) {
        for candidate in candidates {
            let id = candidate.id();
            if !self.registered.contains(&id) {
                self.acknowledged.insert(&id, candidate);
            }
        }
    }

    fn ignore(&self, candidates: Vec<Arc<dyn Contact>>) {
        for candidate in candidates {
            self.acknowledged.remove(&candidate.id());
        }
    }

    fn register(&self, contacts: Vec<Arc<dyn Contact>>) {
        for contact in contacts {
            let id = contact.id();
            self.acknowledged.remove(&id);
            if !self.registered.contains(&id) {
                self.registered.insert(&id, contact);
            }
        }
    }

    fn reject(&self, contacts: Vec<Arc<dyn Contact>>) {
        for contact in &contacts {
            self.routing.remove(&contact.id());
        }
        for contact in &contacts {
            self.registered.remove(&contact.id());
        }
    }

    fn subscribe(&self, peers: Vec<PeerInfo>) {
        for peer in peers {
            self.routing.insert(&peer.id(), peer);
        }
    }

    /// Rebuild the routing table from our own neighborhood.
    fn clean(&self) -> Result<()> {
        let neighbors = self.neighbors(self.settings.name())?;
        self.routing.clear();

        let mut peers: Vec<PeerInfo> = Vec::with_capacity(neighbors.len() + 1);
        for info in &neighbors {
            match PeerInfo::new(&info.name) {
                Ok(peer) => peers.push(peer),
                Err(err) => tracing::debug!(name = %info.name, error = %err, "skipping neighbor"),
            }
        }
        peers.push(PeerInfo::new(self.settings.name())?);
        self.subscribe(peers);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// The nearest registered contact for (collection, location), falling
    /// back to ourselves.
    fn find(&self, collection: &str, location: &str) -> Result<Arc<dyn Contact>> {
        let id = decode_location(collection, location)?;
        Ok(self.registered.nearest(&id).unwrap_or_else(|| self.local()))
    }

    /// Pull an item towards an owned ancestor: forward to the closest
    /// registered peer for the current prefix, or ingest locally, walking
    /// `current` upward until an insertion lands.
    pub(crate) fn insert(&self, element: Element) -> Result<()> {
        let Element {
            item,
            root,
            mut current,
            requeues,
        } = element;

        loop {
            let contact = self.find(&item.collection, &current)?;
            if contact.name() != self.settings.name() {
                if let Err(err) = contact.publish(item.clone(), &root, &current) {
                    tracing::debug!(peer = contact.name(), error = %err, "forwarding item failed");
                }
                return Ok(());
            }

            if current == root {
                self.create(&item.collection, &root);
            }
            if self.add(&item) {
                return Ok(());
            }

            current = parent(&current).to_string();
            if current.is_empty() {
                if requeues >= MAX_REQUEUES {
                    tracing::warn!(item = %item.content(), "dropping item after {MAX_REQUEUES} requeues");
                    return Ok(());
                }
                self.queue.add(Element {
                    current: item.location.clone(),
                    item,
                    root,
                    requeues: requeues + 1,
                });
                return Ok(());
            }
        }
    }

    /// Ensure the collection exists rooted at `root` and own the whole path
    /// down from it.
    fn create(&self, name: &str, root: &str) {
        let collection = self.collections.get_or_create(name, root);
        collection.ensure(root);
        let areas = collection.complete(root);
        self.own(&collection, areas);
    }

    /// Mutate the collection for one item. False when the collection is
    /// absent or we are not authoritative for the item's location.
    fn add(&self, item: &Item) -> bool {
        let Some(collection) = self.collections.get(&item.collection) else {
            return false;
        };
        if !collection.allowing(&item.location) {
            return false;
        }

        let areas = collection.add(
            &item.location,
            &item.id,
            self.settings.set_length(),
            self.settings.delegation_threshold(),
        );
        if self.ready.load(Ordering::Acquire) {
            self.storage.append(item.content());
        }
        if !areas.is_empty() {
            self.own(&collection, areas);
        }
        true
    }

    /// Record ownerships in the collection and the global owned-key index.
    fn own(&self, collection: &Arc<Collection>, owned: Ownership) {
        for (location, delegation) in owned {
            let id = match decode_location(collection.name(), &location) {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(location = %location, error = %err, "cannot index ownership");
                    continue;
                }
            };
            self.owned.upsert(&id, BTreeSet::new, |keys| {
                keys.insert(Key {
                    collection: collection.name().to_string(),
                    location: location.clone(),
                });
            });
            collection.own(&location, delegation);
        }
    }

    /// Stage every owned subtree that now lies closer to a routing peer
    /// than to us: delegate it out of the collection, then forget the keys
    /// locally.
    fn control(&self) -> Vec<(Arc<dyn Contact>, Key, Vec<Item>)> {
        let mut transferable = Vec::new();
        for candidate in self.routing_contacts(false) {
            let mut keys: Vec<Key> = Vec::new();
            self.owned.range(&self.settings.id(), &candidate.id(), |_, _, owned| {
                keys.extend(owned.iter().cloned());
            });

            for key in keys {
                let Some(collection) = self.collections.get(&key.collection) else {
                    continue;
                };
                let (items, empty) = collection.delegate(&key.location);
                if empty {
                    self.collections.delete(&key.collection);
                }
                transferable.push((candidate.clone(), key, items));
            }
            self.owned.truncate(&self.settings.id(), &candidate.id());
        }
        transferable
    }

    // ------------------------------------------------------------------
    // Table traversal helpers
    // ------------------------------------------------------------------

    fn registered_contacts(&self, include_self: bool) -> Vec<Arc<dyn Contact>> {
        let mut contacts = Vec::new();
        self.registered.traverse(|_, _, contact| {
            if include_self || contact.name() != self.settings.name() {
                contacts.push(contact.clone());
            }
        });
        contacts
    }

    fn acknowledged_contacts(&self, include_self: bool) -> Vec<Arc<dyn Contact>> {
        let mut contacts = Vec::new();
        self.acknowledged.traverse(|_, _, contact| {
            if include_self || contact.name() != self.settings.name() {
                contacts.push(contact.clone());
            }
        });
        contacts
    }

    fn routing_contacts(&self, include_self: bool) -> Vec<Arc<dyn Contact>> {
        let mut peers: Vec<PeerInfo> = Vec::new();
        self.routing.traverse(|_, _, peer| {
            if include_self || peer.name() != self.settings.name() {
                peers.push(peer.clone());
            }
        });
        peers
            .into_iter()
            .filter_map(|peer| self.registered.get(&peer.id()))
            .collect()
    }

    fn make_contacts(&self, infos: &[ContactInfo]) -> Vec<Arc<dyn Contact>> {
        infos
            .iter()
            .filter_map(|info| match (self.new_contact)(info) {
                Ok(contact) => Some(contact),
                Err(err) => {
                    tracing::debug!(name = %info.name, error = %err, "skipping invalid contact");
                    None
                }
            })
            .collect()
    }

    fn local(&self) -> Arc<dyn Contact> {
        self.self_contact
            .get()
            .expect("self contact is set at construction")
            .clone()
    }
}

/// The node's own seat in its registered table: a weak self-handle that
/// serves the contact surface without creating a reference cycle.
struct LocalContact {
    id: Id,
    info: ContactInfo,
    node: Weak<Node>,
}

impl LocalContact {
    fn new(node: &Arc<Node>) -> Self {
        LocalContact {
            id: node.settings.id(),
            info: node.settings.contact_info(),
            node: Arc::downgrade(node),
        }
    }

    fn node(&self) -> std::result::Result<Arc<Node>, PeerError> {
        self.node.upgrade().ok_or(PeerError::Unavailable {
            reason: "node stopped".to_string(),
        })
    }
}

fn service<T>(result: Result<T>) -> std::result::Result<T, PeerError> {
    result.map_err(|err| match err {
        Error::Peer(err) => err,
        other => PeerError::Rejected {
            reason: other.to_string(),
        },
    })
}

impl Peer for LocalContact {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.info.name
    }
}

impl Contact for LocalContact {
    fn ips(&self) -> std::collections::BTreeSet<String> {
        self.info.ips.clone()
    }

    fn ip(&self) -> String {
        self.info.ip.clone()
    }

    fn port(&self) -> u16 {
        self.info.port
    }

    fn ping(&self, origin: ContactInfo) -> std::result::Result<ContactInfo, PeerError> {
        service(self.node()?.ping(origin))
    }

    fn neighbors(&self, origin: &str) -> std::result::Result<Vec<ContactInfo>, PeerError> {
        service(self.node()?.neighbors(origin))
    }

    fn random(&self, origin: &str) -> std::result::Result<Option<ContactInfo>, PeerError> {
        service(self.node()?.random(origin))
    }

    fn transfer(
        &self,
        origin: &str,
        key: Key,
        items: Vec<Item>,
    ) -> std::result::Result<(), PeerError> {
        service(self.node()?.transfer(origin, key, items))
    }

    fn get(
        &self,
        collection: &str,
        location: &str,
    ) -> std::result::Result<(ContactInfo, Option<SetView>), PeerError> {
        service(self.node()?.get(collection, location))
    }

    fn publish(&self, item: Item, root: &str, current: &str) -> std::result::Result<(), PeerError> {
        service(self.node()?.publish(item, root, current))
    }
}
