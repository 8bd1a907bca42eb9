use awgbot_common::units::TransferReading;
use awgbot_common::PeerName;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{read_optional, write_atomic, StoreError};

const TRAFFIC_FILE: &str = "traffic.json";

/// On-disk counters for one peer.
///
/// `total_*` are this system's monotonic totals; `last_*` are the raw
/// interface readings they were last reconciled against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRecord {
    #[serde(default)]
    pub total_incoming: u64,
    #[serde(default)]
    pub total_outgoing: u64,
    #[serde(default)]
    pub last_incoming: u64,
    #[serde(default)]
    pub last_outgoing: u64,
}

impl TrafficRecord {
    /// Folds a raw reading in. A raw value below the previous baseline means
    /// the interface counter was reset, which contributes zero, not a negative.
    pub fn apply(&mut self, reading: TransferReading) {
        let delta_incoming = reading.received.saturating_sub(self.last_incoming);
        let delta_outgoing = reading.sent.saturating_sub(self.last_outgoing);

        self.total_incoming = self.total_incoming.saturating_add(delta_incoming);
        self.total_outgoing = self.total_outgoing.saturating_add(delta_outgoing);
        self.last_incoming = reading.received;
        self.last_outgoing = reading.sent;
    }

    pub fn totals(&self) -> CumulativeTotals {
        CumulativeTotals {
            incoming: self.total_incoming,
            outgoing: self.total_outgoing,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CumulativeTotals {
    pub incoming: u64,
    pub outgoing: u64,
}

impl CumulativeTotals {
    pub fn total(&self) -> u64 {
        self.incoming.saturating_add(self.outgoing)
    }

    /// `None` quota never trips.
    pub fn exceeds(&self, quota: Option<u64>) -> bool {
        quota.is_some_and(|limit| self.total() >= limit)
    }
}

/// Totals as read, plus whether the stored file was unreadable and had to be
/// restarted from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub totals: CumulativeTotals,
    pub reinitialised: bool,
}

/// Turns resettable raw counters into persisted monotonic totals.
///
/// Callers serialize access per peer; the accountant itself only does a
/// read-modify-write of one file.
#[derive(Debug, Clone)]
pub struct TrafficAccountant {
    users_dir: PathBuf,
}

impl TrafficAccountant {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            users_dir: data_dir.into().join("users"),
        }
    }

    fn traffic_path(&self, name: &PeerName) -> PathBuf {
        self.users_dir.join(name.as_str()).join(TRAFFIC_FILE)
    }

    /// Loads the record, creating a zeroed one if it is missing. A corrupt
    /// file is reinitialised; the flag tells the caller so it can be reported.
    async fn load(&self, name: &PeerName) -> Result<(TrafficRecord, bool), StoreError> {
        let path = self.traffic_path(name);
        let Some(bytes) = read_optional(&path).await? else {
            let fresh = TrafficRecord::default();
            self.store(name, &fresh).await?;
            return Ok((fresh, false));
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok((record, false)),
            Err(e) => {
                warn!(peer = %name, error = %e, "Corrupt traffic file, reinitialising.");
                let fresh = TrafficRecord::default();
                self.store(name, &fresh).await?;
                Ok((fresh, true))
            }
        }
    }

    async fn store(&self, name: &PeerName, record: &TrafficRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        write_atomic(self.traffic_path(name), bytes).await
    }

    pub async fn totals(&self, name: &PeerName) -> Result<TrafficSnapshot, StoreError> {
        let (record, reinitialised) = self.load(name).await?;
        Ok(TrafficSnapshot {
            totals: record.totals(),
            reinitialised,
        })
    }

    pub async fn update(
        &self,
        name: &PeerName,
        reading: TransferReading,
    ) -> Result<TrafficSnapshot, StoreError> {
        let (mut record, reinitialised) = self.load(name).await?;
        record.apply(reading);
        self.store(name, &record).await?;
        debug!(
            peer = %name,
            incoming = record.total_incoming,
            outgoing = record.total_outgoing,
            "Updated traffic totals."
        );
        Ok(TrafficSnapshot {
            totals: record.totals(),
            reinitialised,
        })
    }

    /// Moves the raw baseline to the given reading without adding traffic.
    /// Used after a key reissue, where the new interface entry starts at zero.
    pub async fn rebase(
        &self,
        name: &PeerName,
        reading: TransferReading,
    ) -> Result<TrafficSnapshot, StoreError> {
        let (mut record, reinitialised) = self.load(name).await?;
        record.last_incoming = reading.received;
        record.last_outgoing = reading.sent;
        self.store(name, &record).await?;
        Ok(TrafficSnapshot {
            totals: record.totals(),
            reinitialised,
        })
    }
}
