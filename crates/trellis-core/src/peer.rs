//! Peer capabilities.
//!
//! `Peer` is the minimal identity (an identifier and its display name);
//! `Contact` extends it with addressing and the six remote operations. The
//! local node and remote stubs both satisfy `Contact`, which breaks the
//! cycle between "a node" and "a handle to a node".

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PeerError, SpaceError};
use crate::item::{Item, Key};
use crate::set::SetView;
use crate::space::{Id, decode_name};

pub trait Peer: Send + Sync {
    fn id(&self) -> Id;
    fn name(&self) -> &str;
}

/// A peer descriptor as it travels on the wire and sits in the routing
/// table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    id: Id,
    name: String,
}

impl PeerInfo {
    pub fn new(name: &str) -> Result<Self, SpaceError> {
        Ok(PeerInfo {
            id: decode_name(name)?,
            name: name.to_string(),
        })
    }
}

impl Peer for PeerInfo {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A contact descriptor: everything needed to reach a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    #[serde(default)]
    pub ips: BTreeSet<String>,
    #[serde(default)]
    pub ip: String,
    pub port: u16,
}

impl ContactInfo {
    pub fn host(&self) -> String {
        format!("{}@{}|{}", self.name, self.ip, self.port)
    }

    pub fn decode_id(&self) -> Result<Id, SpaceError> {
        decode_name(&self.name)
    }
}

/// A reachable peer: identity, addressing, and the remote operations of the
/// overlay surface.
pub trait Contact: Peer {
    fn ips(&self) -> BTreeSet<String>;
    fn ip(&self) -> String;
    fn port(&self) -> u16;

    fn host(&self) -> String {
        format!("{}@{}|{}", self.name(), self.ip(), self.port())
    }

    fn info(&self) -> ContactInfo {
        ContactInfo {
            name: self.name().to_string(),
            ips: self.ips(),
            ip: self.ip(),
            port: self.port(),
        }
    }

    /// Probe the peer; the responder's own contact comes back.
    fn ping(&self, origin: ContactInfo) -> Result<ContactInfo, PeerError>;

    /// The peer's routing snapshot towards `origin`: up to one contact per
    /// distance bucket.
    fn neighbors(&self, origin: &str) -> Result<Vec<ContactInfo>, PeerError>;

    /// Any one registered contact of the peer.
    fn random(&self, origin: &str) -> Result<Option<ContactInfo>, PeerError>;

    /// Hand a delegated subtree's items over.
    fn transfer(&self, origin: &str, key: Key, items: Vec<Item>) -> Result<(), PeerError>;

    /// Fetch the membership set at (collection, location), along with the
    /// nearest contact the peer knows for it.
    fn get(&self, collection: &str, location: &str)
    -> Result<(ContactInfo, Option<SetView>), PeerError>;

    /// Submit an item for ingestion at prefix `current`.
    fn publish(&self, item: Item, root: &str, current: &str) -> Result<(), PeerError>;
}

/// Factory turning wire descriptors into live contacts. The node uses it
/// for restored snapshots, ping responses and harvested neighbors alike.
pub type NewContact = Arc<dyn Fn(&ContactInfo) -> Result<Arc<dyn Contact>, SpaceError> + Send + Sync>;
