//! The peer-to-peer surface.
//!
//! One thread per connection; each request line is decoded, validated, and
//! dispatched to the node. Bad input gets an error reply and never mutates
//! state. `ping` attaches the caller's source address to the origin contact
//! before the node sees it, so freshly discovered peers are dialable.

use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use trellis_core::{
    ContactInfo, Item, Key, ROOT, SetView, decode_location, decode_name, valid_location,
};

use crate::node::Node;
use crate::rpc::codec::{self, Reply, RpcError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping {
        origin: ContactInfo,
    },
    Neighbors {
        origin: String,
    },
    Random {
        origin: String,
    },
    Transfer {
        origin: String,
        key: Key,
        items: Vec<Item>,
    },
    Get {
        collection: String,
        location: String,
    },
    Publish {
        item: Item,
        root: String,
        current: String,
    },
}

impl Request {
    fn op(&self) -> &'static str {
        match self {
            Request::Ping { .. } => "ping",
            Request::Neighbors { .. } => "neighbors",
            Request::Random { .. } => "random",
            Request::Transfer { .. } => "transfer",
            Request::Get { .. } => "get",
            Request::Publish { .. } => "publish",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Pong {
    pub contact: ContactInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NeighborList {
    pub neighbors: Vec<ContactInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RandomContact {
    pub contact: Option<ContactInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Fetched {
    pub contact: ContactInfo,
    pub set: Option<SetView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {}

/// Accept connections until the listener fails.
pub fn serve(listener: TcpListener, node: Arc<Node>) -> Result<(), RpcError> {
    tracing::info!(addr = ?listener.local_addr().ok(), "p2p surface listening");
    loop {
        let (stream, _) = listener.accept()?;
        let node = Arc::clone(&node);
        std::thread::spawn(move || handle(stream, node));
    }
}

fn handle(stream: TcpStream, node: Arc<Node>) {
    let source_ip = stream
        .peer_addr()
        .ok()
        .map(|addr| addr.ip().to_string());
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            tracing::debug!(error = %err, "cannot clone p2p stream");
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    loop {
        let line = match codec::read_line(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                tracing::debug!(error = %err, "p2p read failed");
                return;
            }
        };
        let bytes = match codec::decode::<Request>(&line) {
            Ok(request) => {
                let span = tracing::info_span!("p2p_request", op = request.op());
                let _guard = span.enter();
                dispatch(&node, source_ip.as_deref(), request)
            }
            Err(err) => fail(err.to_string()),
        };
        if let Err(err) = std::io::Write::write_all(&mut writer, &bytes) {
            tracing::debug!(error = %err, "p2p write failed");
            return;
        }
    }
}

fn dispatch(node: &Node, source_ip: Option<&str>, request: Request) -> Vec<u8> {
    match request {
        Request::Ping { mut origin } => {
            if let Some(ip) = source_ip {
                origin.ips.insert(ip.to_string());
            }
            respond(node.ping(origin).map(|contact| Pong { contact }))
        }
        Request::Neighbors { origin } => {
            respond(node.neighbors(&origin).map(|neighbors| NeighborList { neighbors }))
        }
        Request::Random { origin } => {
            respond(node.random(&origin).map(|contact| RandomContact { contact }))
        }
        Request::Transfer { origin, key, items } => {
            if let Err(reason) = validate_key(&key) {
                return fail(reason);
            }
            for item in &items {
                if let Err(reason) = validate_item(item) {
                    return fail(reason);
                }
            }
            respond(node.transfer(&origin, key, items).map(|()| Accepted {}))
        }
        Request::Get { collection, location } => {
            if let Err(reason) = validate_target(&collection, &location) {
                return fail(reason);
            }
            respond(
                node.get(&collection, &location)
                    .map(|(contact, set)| Fetched { contact, set }),
            )
        }
        Request::Publish { item, root, current } => {
            if let Err(reason) = validate_item(&item) {
                return fail(reason);
            }
            if !valid_location(&root) || !valid_location(&current) {
                return fail("root and current must be locations".to_string());
            }
            respond(node.publish(item, &root, &current).map(|()| Accepted {}))
        }
    }
}

fn respond<T: Serialize>(result: crate::error::Result<T>) -> Vec<u8> {
    let reply = match result {
        Ok(payload) => Reply::Ok(payload),
        Err(err) => Reply::err(err.to_string()),
    };
    encode_reply(&reply)
}

fn fail(reason: String) -> Vec<u8> {
    encode_reply(&Reply::<Accepted>::err(reason))
}

fn encode_reply<T: Serialize>(reply: &Reply<T>) -> Vec<u8> {
    codec::encode(reply).unwrap_or_else(|err| {
        tracing::error!(error = %err, "reply encoding failed");
        b"{\"err\":{\"error\":\"internal encoding failure\"}}\n".to_vec()
    })
}

/// Items must address a real point of the key space and survive the log
/// line format.
fn validate_item(item: &Item) -> Result<(), String> {
    if item.location == ROOT || !valid_location(&item.location) {
        return Err(format!("`{}` is not an item location", item.location));
    }
    if item.id.is_empty() || item.id.contains('|') || item.id.contains('\n') {
        return Err("item id is empty or carries reserved characters".to_string());
    }
    if item.collection.contains('|') {
        return Err("collection name carries reserved characters".to_string());
    }
    decode_name(&item.collection).map_err(|err| err.to_string())?;
    decode_location(&item.collection, &item.location).map_err(|err| err.to_string())?;
    Ok(())
}

fn validate_key(key: &Key) -> Result<(), String> {
    validate_target(&key.collection, &key.location)
}

fn validate_target(collection: &str, location: &str) -> Result<(), String> {
    if !valid_location(location) {
        return Err(format!("`{location}` is not a location"));
    }
    decode_location(collection, location).map_err(|err| err.to_string())?;
    Ok(())
}
