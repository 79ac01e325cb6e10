//! Wire surfaces: newline-delimited JSON over TCP.
//!
//! Two listeners run per node: the peer-to-peer surface (`p2p`) and the
//! read-only monitoring surface (`monitoring`). `client` holds the remote
//! contact stub that speaks the p2p protocol towards other nodes.

pub mod client;
pub mod codec;
pub mod monitoring;
pub mod p2p;

pub use client::RemoteContact;
pub use codec::{Reply, RpcError};
