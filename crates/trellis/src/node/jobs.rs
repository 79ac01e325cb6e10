//! The recurring jobs the worker drives each round: observe the peer
//! tables, refresh routing and ownership, update delegated counts.

use std::sync::Arc;

use trellis_core::{Contact, parent};

use crate::error::Result;
use crate::node::Node;

impl Node {
    /// Probe every peer. Registered peers that stop answering are
    /// rejected; acknowledged peers are registered when the response name
    /// matches and ignored otherwise. Empty tables fall back to the
    /// bootstraps.
    pub fn observe(&self) -> Result<()> {
        let mut to_ignore: Vec<Arc<dyn Contact>> = Vec::new();
        let mut to_register: Vec<Arc<dyn Contact>> = Vec::new();
        let mut to_reject: Vec<Arc<dyn Contact>> = Vec::new();

        let mut empty = true;

        for contact in self.registered_contacts(false) {
            empty = false;
            if let Err(err) = contact.ping(self.contact_info()) {
                tracing::debug!(peer = contact.name(), error = %err, "registered peer unreachable");
                to_reject.push(contact);
            }
        }
        for contact in self.acknowledged_contacts(false) {
            empty = false;
            match contact.ping(self.contact_info()) {
                Ok(responder) => {
                    let matches = responder.name == contact.name();
                    to_register.extend(self.make_contacts(std::slice::from_ref(&responder)));
                    if !matches {
                        to_ignore.push(contact);
                    }
                }
                Err(err) => {
                    tracing::debug!(peer = contact.name(), error = %err, "acknowledged peer unreachable");
                    to_ignore.push(contact);
                }
            }
        }

        if empty {
            let bootstraps = self.make_contacts(&self.bootstraps);
            self.acknowledge(bootstraps);
        }

        self.ignore(to_ignore);
        self.reject(to_reject);
        self.register(to_register);
        Ok(())
    }

    /// Harvest neighbors from every routing peer, hand off the subtrees
    /// that now belong elsewhere, persist a snapshot, and rebuild the
    /// routing table.
    pub fn refresh(&self) -> Result<()> {
        let mut to_register: Vec<Arc<dyn Contact>> = Vec::new();
        for contact in self.routing_contacts(false) {
            match contact.neighbors(self.settings.name()) {
                Ok(neighbors) => to_register.extend(self.make_contacts(&neighbors)),
                Err(err) => {
                    tracing::debug!(peer = contact.name(), error = %err, "neighbors harvest failed");
                }
            }
        }
        self.register(to_register);

        for (candidate, key, items) in self.control() {
            let staged = items.len();
            if let Err(err) = candidate.transfer(self.settings.name(), key.clone(), items) {
                tracing::warn!(
                    peer = candidate.name(),
                    collection = %key.collection,
                    location = %key.location,
                    staged,
                    error = %err,
                    "transfer failed, subtree abandoned"
                );
            } else {
                tracing::info!(
                    peer = candidate.name(),
                    collection = %key.collection,
                    location = %key.location,
                    staged,
                    "subtree handed off"
                );
            }
        }

        self.storage.save(self.snapshot())?;
        self.clean()
    }

    /// Union the cache's refresh worklist with every collection's foreign
    /// delegations, then re-fetch each entry from its owner and propagate
    /// the observed counts.
    pub fn update(&self) -> Result<()> {
        let mut worklist = self.cache.refresh(self.settings.expiration());
        for collection in self.collections.list() {
            for location in collection.refresh() {
                worklist
                    .entry(collection.name().to_string())
                    .or_default()
                    .insert(location);
            }
        }

        for (collection, locations) in worklist {
            for location in locations {
                let contact = match self.find(&collection, &location) {
                    Ok(contact) => contact,
                    Err(err) => {
                        tracing::debug!(collection = %collection, location = %location, error = %err, "owner lookup failed");
                        continue;
                    }
                };
                let set = match contact.get(&collection, &location) {
                    Ok((_, set)) => set,
                    Err(err) => {
                        tracing::debug!(peer = contact.name(), error = %err, "remote fetch failed");
                        continue;
                    }
                };
                let Some(set) = set else { continue };

                let count = set.count();
                self.cache.put(&collection, &location, Some(set));
                if let Some(c) = self.collections.get(&collection) {
                    c.update(parent(&location), &location, count);
                }
            }
        }
        Ok(())
    }

    /// Drain the ingest queue until the node closes. The first insertion
    /// error is fatal to the loop.
    pub fn feed(&self) -> Result<()> {
        while let Some(element) = self.queue.consume() {
            self.insert(element)?;
        }
        Ok(())
    }
}
