//! The WireGuard control plane behind a port, so the engine can run against
//! the docker-hosted AmneziaWG interface or an in-memory fake.

use async_trait::async_trait;
use awgbot_common::relative_time::parse_relative_time;
use awgbot_common::units::{parse_transfer, TransferReading, UnitParseError};
use awgbot_common::PeerName;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::RemoveOutcome;

pub mod awg_cli;
pub mod clients_table;
#[cfg(test)]
pub(crate) mod memory;
pub mod wg_text;

pub use awg_cli::AwgCliRegistry;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Command `{command}` failed with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("Command `{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse control plane output: {0}")]
    Parse(String),
    #[error("Control plane unavailable: {0}")]
    Unavailable(String),
}

/// Result of materialising a new peer on the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedPeer {
    pub public_key: String,
    pub allowed_ips: String,
    /// Full client config text (`[Interface]`/`[Peer]`).
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredPeer {
    /// Stored client name, or the raw public key when the peer is unnamed.
    pub name: String,
    pub public_key: String,
    pub allowed_ips: String,
}

impl ConfiguredPeer {
    pub fn is_unnamed(&self) -> bool {
        self.name == self.public_key
    }
}

/// A peer as reported by `wg show`, with its raw text fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePeer {
    pub name: String,
    pub public_key: String,
    /// e.g. `"3 minutes, 12 seconds ago"`
    pub latest_handshake: Option<String>,
    /// e.g. `"1.50 MiB received, 200.00 KB sent"`
    pub transfer: Option<String>,
    pub endpoint: Option<String>,
}

impl ActivePeer {
    /// Raw counters; a peer without a transfer line has moved no data yet.
    pub fn transfer_reading(&self) -> Result<TransferReading, UnitParseError> {
        match &self.transfer {
            Some(text) => parse_transfer(text),
            None => Ok(TransferReading::default()),
        }
    }

    pub fn handshake_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.latest_handshake
            .as_deref()
            .and_then(|text| parse_relative_time(text, now))
    }
}

#[async_trait]
pub trait PeerRegistry: Send + Sync {
    /// Creates keys, allocates addresses and installs the peer on the interface.
    async fn add_peer(&self, name: &PeerName, ipv6: bool) -> Result<MaterializedPeer, RegistryError>;

    /// Removes the peer from the interface. Unknown names report `Absent`.
    async fn remove_peer(&self, name: &PeerName) -> Result<RemoveOutcome, RegistryError>;

    /// Removes one specific key, leaving other entries under the same name.
    async fn remove_key(&self, public_key: &str) -> Result<RemoveOutcome, RegistryError>;

    async fn list_configured_peers(&self) -> Result<Vec<ConfiguredPeer>, RegistryError>;

    /// Peers that have completed at least one handshake.
    async fn list_active_peers(&self) -> Result<Vec<ActivePeer>, RegistryError>;

    /// Attaches `name` to the peer holding `public_key`.
    async fn rename_peer(&self, public_key: &str, name: &PeerName) -> Result<(), RegistryError>;

    /// Checks that the control plane is reachable and initialised.
    async fn verify_environment(&self) -> Result<(), RegistryError>;
}
