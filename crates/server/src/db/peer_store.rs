use awgbot_common::PeerName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{read_optional, write_atomic, StoreError};

const PEERS_DIR: &str = "peers";
const USERS_DIR: &str = "users";

/// Persisted metadata for one provisioned peer, one JSON file per peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub name: PeerName,
    pub public_key: String,
    pub allowed_ips: String,
    #[serde(default)]
    pub ipv6: bool,
    pub created_at: DateTime<Utc>,
    /// `None` means the peer never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Byte ceiling on incoming + outgoing traffic; `None` means unlimited.
    pub traffic_quota: Option<u64>,
}

impl PeerRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// First IPv4 network in `allowed_ips`, without the prefix length.
    pub fn ipv4_address(&self) -> Option<&str> {
        self.allowed_ips
            .split(',')
            .map(str::trim)
            .find(|net| !net.contains(':'))
            .map(|net| net.split('/').next().unwrap_or(net))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Absent,
}

/// File-backed store for peer metadata and per-peer artifacts.
///
/// Layout under `data_dir`:
/// - `peers/<name>.json`: [`PeerRecord`]
/// - `users/<name>/<name>.conf`: client config
/// - `users/<name>/traffic.json`: traffic counters (see `TrafficAccountant`)
#[derive(Debug, Clone)]
pub struct PeerStore {
    data_dir: PathBuf,
}

impl PeerStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        for dir in [self.peers_dir(), self.users_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn peers_dir(&self) -> PathBuf {
        self.data_dir.join(PEERS_DIR)
    }

    fn users_dir(&self) -> PathBuf {
        self.data_dir.join(USERS_DIR)
    }

    fn record_path(&self, name: &PeerName) -> PathBuf {
        self.peers_dir().join(format!("{name}.json"))
    }

    pub fn peer_dir(&self, name: &PeerName) -> PathBuf {
        self.users_dir().join(name.as_str())
    }

    pub fn config_path(&self, name: &PeerName) -> PathBuf {
        self.peer_dir(name).join(format!("{name}.conf"))
    }

    pub async fn load(&self, name: &PeerName) -> Result<Option<PeerRecord>, StoreError> {
        match read_optional(&self.record_path(name)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, record: &PeerRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(self.record_path(&record.name), bytes).await?;
        debug!(peer = %record.name, "Saved peer record.");
        Ok(())
    }

    pub async fn remove(&self, name: &PeerName) -> Result<RemoveOutcome, StoreError> {
        let path = self.record_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(RemoveOutcome::Removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RemoveOutcome::Absent),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// All readable records. Unreadable files are logged and skipped so one
    /// bad record cannot hide the rest.
    pub async fn list(&self) -> Result<Vec<PeerRecord>, StoreError> {
        let dir = self.peers_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<PeerRecord>(&bytes).map_err(StoreError::from),
                Err(e) => Err(StoreError::io(&path, e)),
            };
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable peer record."),
            }
        }
        records.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(records)
    }

    pub async fn find_by_public_key(&self, public_key: &str) -> Result<Option<PeerRecord>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|record| record.public_key == public_key))
    }

    pub async fn write_config(&self, name: &PeerName, config_text: &str) -> Result<(), StoreError> {
        write_atomic(self.config_path(name), config_text.as_bytes().to_vec()).await
    }

    pub async fn read_config(&self, name: &PeerName) -> Result<Option<String>, StoreError> {
        let path = self.config_path(name);
        match read_optional(&path).await? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                StoreError::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }),
            None => Ok(None),
        }
    }

    /// Deletes the peer's directory (config and traffic counters).
    pub async fn remove_artifacts(&self, name: &PeerName) -> Result<RemoveOutcome, StoreError> {
        let dir = self.peer_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(RemoveOutcome::Removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RemoveOutcome::Absent),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }
}
