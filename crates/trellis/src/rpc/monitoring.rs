//! The read-only monitoring surface.

use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::node::monitoring::OwnershipReport;
use crate::rpc::codec::{self, Reply, RpcError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Acknowledged,
    Registered,
    Routing,
    Ownership,
    Queue,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Hosts {
    pub hosts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Pending {
    pub pending: usize,
}

/// Accept connections until the listener fails.
pub fn serve(listener: TcpListener, node: Arc<Node>) -> Result<(), RpcError> {
    tracing::info!(addr = ?listener.local_addr().ok(), "monitoring surface listening");
    loop {
        let (stream, _) = listener.accept()?;
        let node = Arc::clone(&node);
        std::thread::spawn(move || handle(stream, node));
    }
}

fn handle(stream: TcpStream, node: Arc<Node>) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            tracing::debug!(error = %err, "cannot clone monitoring stream");
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    loop {
        let line = match codec::read_line(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                tracing::debug!(error = %err, "monitoring read failed");
                return;
            }
        };
        let bytes = match codec::decode::<Request>(&line) {
            Ok(request) => dispatch(&node, request),
            Err(err) => encode_reply(&Reply::<Pending>::err(err.to_string())),
        };
        if let Err(err) = std::io::Write::write_all(&mut writer, &bytes) {
            tracing::debug!(error = %err, "monitoring write failed");
            return;
        }
    }
}

fn dispatch(node: &Node, request: Request) -> Vec<u8> {
    match request {
        Request::Acknowledged => encode_reply(&Reply::Ok(Hosts {
            hosts: node.acknowledged_hosts(),
        })),
        Request::Registered => encode_reply(&Reply::Ok(Hosts {
            hosts: node.registered_hosts(),
        })),
        Request::Routing => encode_reply(&Reply::Ok(Hosts {
            hosts: node.routing_hosts(),
        })),
        Request::Ownership => encode_reply(&Reply::<OwnershipReport>::Ok(node.ownership())),
        Request::Queue => encode_reply(&Reply::Ok(Pending {
            pending: node.queue_len(),
        })),
    }
}

fn encode_reply<T: Serialize>(reply: &Reply<T>) -> Vec<u8> {
    codec::encode(reply).unwrap_or_else(|err| {
        tracing::error!(error = %err, "reply encoding failed");
        b"{\"err\":{\"error\":\"internal encoding failure\"}}\n".to_vec()
    })
}
