use awgbot_common::relative_time::{classify_handshake, ConnectionStatus};
use awgbot_common::PeerName;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::warn;

use super::errors::LifecycleError;
use super::lifecycle::{LifecycleManager, TrafficOutcome};
use crate::db::{CumulativeTotals, PeerRecord};
use crate::registry::ActivePeer;

/// Everything the admin sees about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerOverview {
    pub name: PeerName,
    pub ipv4: Option<String>,
    pub status: ConnectionStatus,
    pub last_handshake: Option<DateTime<Utc>>,
    pub days_since_handshake: Option<i64>,
    pub totals: CumulativeTotals,
    pub quota: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Time left until expiry, never negative.
    pub remaining: Option<Duration>,
    pub endpoint: Option<String>,
    /// Set when the counters read for this overview pushed the peer over its
    /// quota and it was deactivated.
    pub deactivated: bool,
}

impl LifecycleManager {
    pub async fn overview(&self, name: &PeerName) -> Result<PeerOverview, LifecycleError> {
        let record = self.load_existing(name).await?;
        let live = self
            .registry
            .list_active_peers()
            .await?
            .into_iter()
            .find(|peer| peer.public_key == record.public_key);
        self.build_overview(record, live).await
    }

    /// Overviews of every stored peer, sorted by name. The active-peer list is
    /// read once for the whole batch.
    pub async fn list_overviews(&self) -> Result<Vec<PeerOverview>, LifecycleError> {
        let mut live: HashMap<String, ActivePeer> = self
            .registry
            .list_active_peers()
            .await?
            .into_iter()
            .map(|peer| (peer.public_key.clone(), peer))
            .collect();

        let mut overviews = Vec::new();
        for record in self.store.list().await? {
            let active = live.remove(&record.public_key);
            overviews.push(self.build_overview(record, active).await?);
        }
        Ok(overviews)
    }

    async fn build_overview(
        &self,
        record: PeerRecord,
        live: Option<ActivePeer>,
    ) -> Result<PeerOverview, LifecycleError> {
        let now = Utc::now();
        let mut deactivated = false;

        let totals = match live.as_ref().map(ActivePeer::transfer_reading) {
            Some(Ok(reading)) => match self.record_traffic(&record.name, reading).await? {
                TrafficOutcome::Recorded(totals) => totals,
                TrafficOutcome::QuotaExceeded(totals) => {
                    deactivated = true;
                    totals
                }
                TrafficOutcome::Dropped => {
                    deactivated = true;
                    CumulativeTotals::default()
                }
            },
            Some(Err(e)) => {
                warn!(peer = %record.name, error = %e, "Unreadable transfer counters, showing stored totals.");
                let snapshot = self.accountant.totals(&record.name).await?;
                self.checked_totals(&record.name, snapshot).await
            }
            None => {
                let snapshot = self.accountant.totals(&record.name).await?;
                self.checked_totals(&record.name, snapshot).await
            }
        };

        let last_handshake = live.as_ref().and_then(|peer| peer.handshake_at(now));
        Ok(PeerOverview {
            ipv4: record.ipv4_address().map(str::to_string),
            status: classify_handshake(last_handshake, now),
            last_handshake,
            days_since_handshake: last_handshake.map(|at| (now - at).num_days()),
            totals,
            quota: record.traffic_quota,
            expires_at: record.expires_at,
            remaining: record.expires_at.map(|at| (at - now).max(Duration::zero())),
            endpoint: live.and_then(|peer| peer.endpoint),
            deactivated,
            name: record.name,
        })
    }
}
