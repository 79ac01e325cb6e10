//! A node of the trellis decentralized indexing overlay.
//!
//! Nodes cooperate to index items keyed by alphabet-string locations: each
//! node owns the slice of the 160-bit key space nearest to its own
//! identifier, tracks peers in Kademlia-style tables, and hands subtrees of
//! its collection index off to closer peers as they grow. This crate wires
//! the `trellis-core` engine to the outside world: the orchestrating
//! [`node::Node`], the recurring worker jobs, the file-backed backup store,
//! the ndjson-over-TCP peer and monitoring surfaces, and the CLI.

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod node;
pub mod rpc;
pub mod settings;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};
pub use node::Node;
pub use settings::Settings;
pub use worker::Worker;
