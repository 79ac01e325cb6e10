//! The remote contact stub: implements the peer surface by dialing the
//! other node's p2p listener, one request/response line per call.

use std::collections::BTreeSet;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use trellis_core::{
    Contact, ContactInfo, Id, Item, Key, NewContact, Peer, PeerError, SetView, decode_name,
};

use crate::rpc::codec::{self, Reply, RpcError};
use crate::rpc::p2p::{Accepted, Fetched, NeighborList, Pong, RandomContact, Request};

/// Per-call deadline for connect, read, and write alike.
pub const CALL_TIMEOUT: Duration = Duration::from_millis(200);

pub struct RemoteContact {
    id: Id,
    name: String,
    ips: BTreeSet<String>,
    ip: String,
    port: u16,
}

impl RemoteContact {
    pub fn from_info(info: &ContactInfo) -> Result<Self, trellis_core::SpaceError> {
        Ok(RemoteContact {
            id: decode_name(&info.name)?,
            name: info.name.clone(),
            ips: info.ips.clone(),
            ip: info.ip.clone(),
            port: info.port,
        })
    }

    /// The production contact factory.
    pub fn factory() -> NewContact {
        Arc::new(|info| Ok(Arc::new(RemoteContact::from_info(info)?) as Arc<dyn Contact>))
    }

    /// Candidate addresses: the pinned ip first, then every advertised one.
    fn dial_ips(&self) -> Vec<&str> {
        let mut ips: Vec<&str> = Vec::with_capacity(self.ips.len() + 1);
        if !self.ip.is_empty() {
            ips.push(&self.ip);
        }
        for ip in &self.ips {
            if *ip != self.ip {
                ips.push(ip);
            }
        }
        ips
    }

    fn call<T: DeserializeOwned>(&self, ip: &str, request: &Request) -> Result<T, RpcError> {
        let ip: IpAddr = ip.parse().map_err(|_| RpcError::Address {
            addr: ip.to_string(),
        })?;
        let addr = SocketAddr::new(ip, self.port);
        let stream = TcpStream::connect_timeout(&addr, CALL_TIMEOUT)?;
        stream.set_read_timeout(Some(CALL_TIMEOUT))?;
        stream.set_write_timeout(Some(CALL_TIMEOUT))?;

        let mut writer = stream.try_clone()?;
        codec::send(&mut writer, request)?;

        let mut reader = BufReader::new(stream);
        let line = codec::read_line(&mut reader)?.ok_or(RpcError::Closed)?;
        codec::decode::<Reply<T>>(&line)?.into_result()
    }

    /// Try every candidate address in turn; the first answer wins.
    fn call_any<T: DeserializeOwned>(&self, request: &Request) -> Result<T, PeerError> {
        let mut last: Option<RpcError> = None;
        for ip in self.dial_ips() {
            match self.call(ip, request) {
                Ok(payload) => return Ok(payload),
                Err(err) => last = Some(err),
            }
        }
        Err(unavailable(&self.name, last))
    }
}

fn unavailable(name: &str, last: Option<RpcError>) -> PeerError {
    PeerError::Unavailable {
        reason: match last {
            Some(err) => format!("{name}: {err}"),
            None => format!("{name}: no address to dial"),
        },
    }
}

impl Peer for RemoteContact {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Contact for RemoteContact {
    fn ips(&self) -> BTreeSet<String> {
        self.ips.clone()
    }

    fn ip(&self) -> String {
        self.ip.clone()
    }

    fn port(&self) -> u16 {
        self.port
    }

    /// Probe every advertised address; the answering one gets pinned on the
    /// returned contact.
    fn ping(&self, origin: ContactInfo) -> Result<ContactInfo, PeerError> {
        let request = Request::Ping { origin };
        let mut last: Option<RpcError> = None;
        for ip in self.dial_ips() {
            match self.call::<Pong>(ip, &request) {
                Ok(pong) => {
                    let mut contact = pong.contact;
                    contact.ips.insert(ip.to_string());
                    contact.ip = ip.to_string();
                    return Ok(contact);
                }
                Err(err) => last = Some(err),
            }
        }
        Err(unavailable(&self.name, last))
    }

    fn neighbors(&self, origin: &str) -> Result<Vec<ContactInfo>, PeerError> {
        let list: NeighborList = self.call_any(&Request::Neighbors {
            origin: origin.to_string(),
        })?;
        let mut neighbors = list.neighbors;
        for neighbor in &mut neighbors {
            // The responder reports itself without knowing which of its
            // addresses we can reach; keep the one that just worked.
            if neighbor.name == self.name {
                neighbor.ip = self.ip.clone();
            }
        }
        Ok(neighbors)
    }

    fn random(&self, origin: &str) -> Result<Option<ContactInfo>, PeerError> {
        let payload: RandomContact = self.call_any(&Request::Random {
            origin: origin.to_string(),
        })?;
        Ok(payload.contact)
    }

    fn transfer(&self, origin: &str, key: Key, items: Vec<Item>) -> Result<(), PeerError> {
        let _: Accepted = self.call_any(&Request::Transfer {
            origin: origin.to_string(),
            key,
            items,
        })?;
        Ok(())
    }

    fn get(
        &self,
        collection: &str,
        location: &str,
    ) -> Result<(ContactInfo, Option<SetView>), PeerError> {
        let fetched: Fetched = self.call_any(&Request::Get {
            collection: collection.to_string(),
            location: location.to_string(),
        })?;
        Ok((fetched.contact, fetched.set))
    }

    fn publish(&self, item: Item, root: &str, current: &str) -> Result<(), PeerError> {
        let _: Accepted = self.call_any(&Request::Publish {
            item,
            root: root.to_string(),
            current: current.to_string(),
        })?;
        Ok(())
    }
}
