use awgbot_common::codec::CodecError;
use awgbot_common::{PeerName, PeerNameError};
use thiserror::Error;

use crate::db::StoreError;
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Invalid peer name: {0}")]
    InvalidName(#[from] PeerNameError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Peer '{0}' already exists")]
    NameConflict(PeerName),
    #[error("Control plane error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// The first failure of a best-effort deactivation. The remaining cleanup
/// steps were still attempted.
#[derive(Error, Debug)]
pub enum DeactivateError {
    #[error("Removing '{name}' from the interface failed: {source}")]
    Registry {
        name: PeerName,
        #[source]
        source: RegistryError,
    },
    #[error("Cleaning up stored data for '{name}' failed: {source}")]
    Store {
        name: PeerName,
        #[source]
        source: StoreError,
    },
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Peer '{0}' not found")]
    NotFound(PeerName),
    #[error("Invalid peer name: {0}")]
    InvalidName(#[from] PeerNameError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Control plane error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Deactivate(#[from] DeactivateError),
}
