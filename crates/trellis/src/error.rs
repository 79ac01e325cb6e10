use thiserror::Error;

use trellis_core::{PeerError, SpaceError, StorageError};

use crate::config::ConfigError;
use crate::rpc::RpcError;

/// Crate-level convenience error: a thin wrapper over the capability
/// errors, not a grab bag.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
