//! Domain engine for the trellis indexing overlay.
//!
//! This crate holds everything a node needs to make decisions without doing
//! IO: the identifier space, the bitwise prefix trie backing the peer and
//! ownership tables, the per-collection set tree with adaptive splitting,
//! the remote-set cache, and the ingest queue. The node orchestration, the
//! wire surfaces and persistence live in the `trellis` crate.

#![forbid(unsafe_code)]

pub mod cache;
pub mod collection;
pub mod error;
pub mod item;
pub mod peer;
pub mod queue;
pub mod set;
pub mod space;
pub mod storage;
pub mod tree;

pub use cache::Cache;
pub use collection::{Collection, Collections, Delegation, Ownership};
pub use error::{PeerError, SpaceError, StorageError};
pub use item::{Element, Item, Key};
pub use peer::{Contact, ContactInfo, NewContact, Peer, PeerInfo};
pub use queue::Queue;
pub use set::{Set, SetView};
pub use space::{
    ALPHABET, BITS, ENCODED_LEN, ID_LEN, Id, ROOT, decode_location, decode_name, encode_id, parent,
    random_id, valid_location,
};
pub use storage::Storage;
pub use tree::Tree;
