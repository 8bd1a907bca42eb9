use awgbot_common::codec::{self, HostResolver};
use awgbot_common::units::{humanize_bytes, TransferReading};
use awgbot_common::PeerName;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::errors::{DeactivateError, LifecycleError, ProvisionError};
use super::locks::PeerLocks;
use crate::db::{
    CumulativeTotals, PeerRecord, PeerStore, RemoveOutcome, StoreError, TrafficAccountant,
    TrafficSnapshot,
};
use crate::notifications::{AdminNotifier, PeerEvent};
use crate::registry::{ActivePeer, PeerRegistry};
use crate::scheduler::ExpiryJobs;

/// A fired job may wake marginally before the wall clock reaches its instant.
const EXPIRY_GRACE_SECONDS: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeactivationReason {
    Manual,
    Expired,
    /// Expired while the service was not running; found at startup.
    ExpiredWhileDown,
    QuotaExceeded { used: u64, quota: u64 },
    /// The interface entry disappeared out from under the stored record.
    Reconciled,
}

impl fmt::Display for DeactivationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeactivationReason::Manual => write!(f, "removed by the admin"),
            DeactivationReason::Expired => write!(f, "lifetime expired"),
            DeactivationReason::ExpiredWhileDown => {
                write!(f, "lifetime expired while the service was down")
            }
            DeactivationReason::QuotaExceeded { used, quota } => write!(
                f,
                "traffic limit exceeded ({} of {})",
                humanize_bytes(*used),
                humanize_bytes(*quota)
            ),
            DeactivationReason::Reconciled => write!(f, "its interface entry disappeared"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivateOutcome {
    Deactivated,
    /// Nothing was left to remove; no side effects happened.
    AlreadyGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub name: String,
    /// `None` means the peer never expires.
    pub lifetime: Option<Duration>,
    /// `None` means unlimited traffic.
    pub quota: Option<u64>,
    pub ipv6: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandle {
    pub record: PeerRecord,
    pub config: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficOutcome {
    Recorded(CumulativeTotals),
    /// The reading pushed the peer over its quota and it was deactivated.
    QuotaExceeded(CumulativeTotals),
    /// The peer is no longer stored; the reading was discarded.
    Dropped,
}

/// A reading folded into the totals, before any enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountedTraffic {
    WithinQuota(CumulativeTotals),
    /// The totals reached the quota; the peer is still installed.
    OverQuota(CumulativeTotals),
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaUpdate {
    Applied,
    /// The new quota is already used up; the peer was deactivated.
    Deactivated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub scheduled: usize,
    pub deactivated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub renamed: usize,
    pub deactivated: usize,
    pub failed: usize,
}

/// Orchestrates a peer's life: provisioning, expiry bookkeeping, traffic
/// enforcement and exactly-once teardown. Every mutation of one peer runs
/// under that peer's lock.
pub struct LifecycleManager {
    pub(super) store: PeerStore,
    pub(super) accountant: TrafficAccountant,
    pub(super) registry: Arc<dyn PeerRegistry>,
    pub(super) jobs: ExpiryJobs,
    pub(super) locks: PeerLocks,
    pub(super) notifier: AdminNotifier,
    pub(super) resolver: Arc<dyn HostResolver>,
}

impl LifecycleManager {
    pub fn new(
        store: PeerStore,
        accountant: TrafficAccountant,
        registry: Arc<dyn PeerRegistry>,
        jobs: ExpiryJobs,
        notifier: AdminNotifier,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            store,
            accountant,
            registry,
            jobs,
            locks: PeerLocks::new(),
            notifier,
            resolver,
        }
    }

    pub fn jobs(&self) -> &ExpiryJobs {
        &self.jobs
    }

    pub fn store(&self) -> &PeerStore {
        &self.store
    }

    /// Peers currently handshaking, as the interface reports them.
    pub async fn active_peers(&self) -> Result<Vec<ActivePeer>, LifecycleError> {
        Ok(self.registry.list_active_peers().await?)
    }

    pub(super) async fn load_existing(&self, name: &PeerName) -> Result<PeerRecord, LifecycleError> {
        self.store
            .load(name)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(name.clone()))
    }

    #[instrument(skip(self, request), fields(peer = %request.name))]
    pub async fn provision(&self, request: ProvisionRequest) -> Result<PeerHandle, ProvisionError> {
        let name = PeerName::parse(&request.name)?;
        if request.lifetime.is_some_and(|d| d <= Duration::zero()) {
            return Err(ProvisionError::InvalidRequest(
                "lifetime must be positive".to_string(),
            ));
        }
        if request.quota == Some(0) {
            return Err(ProvisionError::InvalidRequest(
                "traffic limit must be positive".to_string(),
            ));
        }

        let _guard = self.locks.lock(&name).await;

        if self.store.load(&name).await?.is_some()
            || self
                .registry
                .list_configured_peers()
                .await?
                .iter()
                .any(|peer| peer.name == name.as_str())
        {
            return Err(ProvisionError::NameConflict(name));
        }

        let now = Utc::now();
        let expires_at = match request.lifetime {
            Some(lifetime) => Some(now.checked_add_signed(lifetime).ok_or_else(|| {
                ProvisionError::InvalidRequest("lifetime is out of range".to_string())
            })?),
            None => None,
        };

        let materialized = self.registry.add_peer(&name, request.ipv6).await?;
        let record = PeerRecord {
            name: name.clone(),
            public_key: materialized.public_key,
            allowed_ips: materialized.allowed_ips,
            ipv6: request.ipv6,
            created_at: now,
            expires_at,
            traffic_quota: request.quota,
        };

        if let Err(e) = self.persist_new_peer(&record, &materialized.config).await {
            error!(error = %e, "Persisting the new peer failed, removing it again.");
            if let Err(rollback) = self.registry.remove_peer(&name).await {
                error!(error = %rollback, "Could not remove the half-provisioned peer.");
            }
            if let Err(cleanup) = self.store.remove_artifacts(&name).await {
                warn!(error = %cleanup, "Could not remove partial peer files.");
            }
            return Err(e.into());
        }

        if let Some(at) = expires_at {
            self.jobs.schedule(&name, at);
        }
        info!(allowed_ips = %record.allowed_ips, expires_at = ?expires_at, quota = ?record.traffic_quota, "Peer provisioned.");
        self.notifier
            .notify(PeerEvent::Provisioned {
                name: name.clone(),
                expires_at,
                quota: record.traffic_quota,
            })
            .await;

        Ok(PeerHandle {
            record,
            config: materialized.config,
        })
    }

    async fn persist_new_peer(&self, record: &PeerRecord, config: &str) -> Result<(), StoreError> {
        // Leftovers of an earlier peer with this name must not leak into the new one.
        self.store.remove_artifacts(&record.name).await?;
        self.store.write_config(&record.name, config).await?;
        self.accountant.totals(&record.name).await?;
        self.store.save(record).await
    }

    /// Tears the peer down. Safe to call any number of times; only the call
    /// that actually removed something notifies the admin.
    #[instrument(skip(self, name), fields(peer = %name))]
    pub async fn deactivate(
        &self,
        name: &PeerName,
        reason: DeactivationReason,
    ) -> Result<DeactivateOutcome, DeactivateError> {
        let _guard = self.locks.lock(name).await;
        self.deactivate_locked(name, reason).await
    }

    /// Caller must hold the peer's lock.
    pub(super) async fn deactivate_locked(
        &self,
        name: &PeerName,
        reason: DeactivationReason,
    ) -> Result<DeactivateOutcome, DeactivateError> {
        let mut failures = Vec::new();
        let mut removed_anything = false;

        match self.registry.remove_peer(name).await {
            Ok(outcome) => removed_anything |= outcome == RemoveOutcome::Removed,
            Err(source) => failures.push(DeactivateError::Registry {
                name: name.clone(),
                source,
            }),
        }
        match self.store.remove(name).await {
            Ok(outcome) => removed_anything |= outcome == RemoveOutcome::Removed,
            Err(source) => failures.push(DeactivateError::Store {
                name: name.clone(),
                source,
            }),
        }
        removed_anything |= self.jobs.cancel(name);
        match self.store.remove_artifacts(name).await {
            Ok(outcome) => removed_anything |= outcome == RemoveOutcome::Removed,
            Err(source) => failures.push(DeactivateError::Store {
                name: name.clone(),
                source,
            }),
        }

        for failure in &failures {
            error!(peer = %name, error = %failure, "Deactivation step failed.");
        }

        if !removed_anything && failures.is_empty() {
            debug!(peer = %name, "Peer already gone, nothing to deactivate.");
            return Ok(DeactivateOutcome::AlreadyGone);
        }

        if removed_anything {
            info!(peer = %name, reason = %reason, "Peer deactivated.");
            self.notifier
                .notify(PeerEvent::Deactivated {
                    name: name.clone(),
                    reason,
                })
                .await;
        }

        match failures.into_iter().next() {
            Some(first) => {
                self.notifier
                    .notify(PeerEvent::CleanupFailed {
                        name: name.clone(),
                        error: first.to_string(),
                    })
                    .await;
                Err(first)
            }
            None => Ok(DeactivateOutcome::Deactivated),
        }
    }

    /// Unwraps totals read from the accountant, telling the admin when the
    /// stored counters were lost.
    pub(super) async fn checked_totals(
        &self,
        name: &PeerName,
        snapshot: TrafficSnapshot,
    ) -> CumulativeTotals {
        if snapshot.reinitialised {
            self.notifier
                .notify(PeerEvent::TrafficReset { name: name.clone() })
                .await;
        }
        snapshot.totals
    }

    /// Folds a raw reading into the peer's totals and enforces its quota.
    /// Readings for peers that are no longer stored are discarded.
    pub async fn record_traffic(
        &self,
        name: &PeerName,
        reading: TransferReading,
    ) -> Result<TrafficOutcome, LifecycleError> {
        let accounted = {
            let _guard = self.locks.lock(name).await;
            self.account_locked(name, None, reading).await?
        };
        match accounted {
            AccountedTraffic::WithinQuota(totals) => Ok(TrafficOutcome::Recorded(totals)),
            AccountedTraffic::Dropped => Ok(TrafficOutcome::Dropped),
            AccountedTraffic::OverQuota(totals) => Ok(match self.enforce_quota(name).await? {
                Some(QuotaUpdate::Deactivated) => TrafficOutcome::QuotaExceeded(totals),
                Some(QuotaUpdate::Applied) => TrafficOutcome::Recorded(totals),
                None => TrafficOutcome::Dropped,
            }),
        }
    }

    /// Folds a reading taken from the interface entry holding `public_key`
    /// into the peer's totals, without tearing anything down; pair with
    /// [`enforce_quota`](Self::enforce_quota). Readings from a key the record
    /// no longer holds are dropped.
    pub async fn account_traffic(
        &self,
        name: &PeerName,
        public_key: &str,
        reading: TransferReading,
    ) -> Result<AccountedTraffic, LifecycleError> {
        let _guard = self.locks.lock(name).await;
        self.account_locked(name, Some(public_key), reading).await
    }

    async fn account_locked(
        &self,
        name: &PeerName,
        public_key: Option<&str>,
        reading: TransferReading,
    ) -> Result<AccountedTraffic, LifecycleError> {
        let Some(record) = self.store.load(name).await? else {
            debug!(peer = %name, "Dropping traffic reading for a peer that is gone.");
            return Ok(AccountedTraffic::Dropped);
        };
        if public_key.is_some_and(|key| key != record.public_key) {
            debug!(peer = %name, "Dropping traffic reading from a replaced key.");
            return Ok(AccountedTraffic::Dropped);
        }
        let snapshot = self.accountant.update(name, reading).await?;
        let totals = self.checked_totals(name, snapshot).await;
        if totals.exceeds(record.traffic_quota) {
            warn!(peer = %name, used = totals.total(), quota = ?record.traffic_quota, "Traffic limit reached.");
            Ok(AccountedTraffic::OverQuota(totals))
        } else {
            Ok(AccountedTraffic::WithinQuota(totals))
        }
    }

    /// Re-checks stored totals against the current quota and deactivates the
    /// peer if it is used up. `None` when the peer is no longer stored.
    pub async fn enforce_quota(
        &self,
        name: &PeerName,
    ) -> Result<Option<QuotaUpdate>, LifecycleError> {
        let _guard = self.locks.lock(name).await;
        self.enforce_quota_locked(name).await
    }

    async fn enforce_quota_locked(
        &self,
        name: &PeerName,
    ) -> Result<Option<QuotaUpdate>, LifecycleError> {
        let Some(record) = self.store.load(name).await? else {
            return Ok(None);
        };
        let snapshot = self.accountant.totals(name).await?;
        let totals = self.checked_totals(name, snapshot).await;
        self.deactivate_over_quota(name, record.traffic_quota, totals)
            .await
            .map(Some)
    }

    /// Caller must hold the peer's lock.
    async fn deactivate_over_quota(
        &self,
        name: &PeerName,
        quota: Option<u64>,
        totals: CumulativeTotals,
    ) -> Result<QuotaUpdate, LifecycleError> {
        let limit = match quota {
            Some(limit) if totals.exceeds(quota) => limit,
            _ => return Ok(QuotaUpdate::Applied),
        };
        self.deactivate_locked(
            name,
            DeactivationReason::QuotaExceeded {
                used: totals.total(),
                quota: limit,
            },
        )
        .await?;
        Ok(QuotaUpdate::Deactivated)
    }

    /// Entry point for a fired one-shot job. Failures are logged here; a job
    /// for a peer that is already gone is a silent no-op.
    pub async fn handle_expiry_fired(&self, name: &PeerName) {
        let _guard = self.locks.lock(name).await;
        self.expire_locked(name).await;
    }

    async fn expire_locked(&self, name: &PeerName) {
        let record = match self.store.load(name).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(peer = %name, "Expiry fired for a peer that is already gone.");
                return;
            }
            Err(e) => {
                error!(peer = %name, error = %e, "Could not load peer for expiry.");
                return;
            }
        };

        let now = Utc::now() + Duration::seconds(EXPIRY_GRACE_SECONDS);
        if !record.is_expired(now) {
            // The fired job already left the table; without a new one the
            // peer would never expire.
            if let Some(at) = record.expires_at {
                self.jobs.schedule(name, at);
            }
            debug!(peer = %name, expires_at = ?record.expires_at, "Expiry fired but the peer is not due, rescheduled.");
            return;
        }
        if let Err(e) = self.deactivate_locked(name, DeactivationReason::Expired).await {
            error!(peer = %name, error = %e, "Expiry deactivation incomplete.");
        }
    }

    /// Replaces the peer's keys, keeping its expiry and traffic totals.
    /// Returns the new client config.
    ///
    /// The new entry is installed before the old one is removed, so a failed
    /// install leaves the peer working on its old keys.
    #[instrument(skip(self, name), fields(peer = %name))]
    pub async fn reissue(&self, name: &PeerName) -> Result<String, LifecycleError> {
        let _guard = self.locks.lock(name).await;
        let mut record = self.load_existing(name).await?;
        let old_key = record.public_key.clone();
        let old_config = self.store.read_config(name).await?;

        let materialized = match self.registry.add_peer(name, record.ipv6).await {
            Ok(materialized) => materialized,
            Err(e) => {
                error!(error = %e, "New keys could not be installed, keeping the old ones.");
                self.notifier
                    .notify(PeerEvent::ReissueFailed {
                        name: name.clone(),
                        error: e.to_string(),
                    })
                    .await;
                return Err(e.into());
            }
        };

        record.public_key = materialized.public_key.clone();
        record.allowed_ips = materialized.allowed_ips.clone();
        if let Err(e) = self.persist_reissue(&record, &materialized.config).await {
            error!(error = %e, "Persisting the new keys failed, removing them again.");
            self.undo_reissue(name, &materialized.public_key, old_config.as_deref())
                .await;
            self.notifier
                .notify(PeerEvent::ReissueFailed {
                    name: name.clone(),
                    error: e.to_string(),
                })
                .await;
            return Err(e.into());
        }

        // The new interface entry counts from zero.
        let snapshot = self
            .accountant
            .rebase(name, TransferReading::default())
            .await?;
        self.checked_totals(name, snapshot).await;

        match self.registry.remove_key(&old_key).await {
            Ok(_) => info!("Peer keys reissued."),
            Err(e) => {
                error!(error = %e, public_key = %old_key, "Old key could not be removed after reissue.");
                self.notifier
                    .notify(PeerEvent::CleanupFailed {
                        name: name.clone(),
                        error: format!("old key {old_key} is still installed: {e}"),
                    })
                    .await;
            }
        }
        Ok(materialized.config)
    }

    async fn persist_reissue(&self, record: &PeerRecord, config: &str) -> Result<(), StoreError> {
        self.store.write_config(&record.name, config).await?;
        self.store.save(record).await
    }

    async fn undo_reissue(&self, name: &PeerName, new_key: &str, old_config: Option<&str>) {
        if let Err(e) = self.registry.remove_key(new_key).await {
            error!(peer = %name, error = %e, "Could not remove the unused new key.");
        }
        if let Some(config) = old_config {
            if let Err(e) = self.store.write_config(name, config).await {
                error!(peer = %name, error = %e, "Could not restore the previous client config.");
            }
        }
    }

    /// Sets a new lifetime counted from now; `None` removes the expiry.
    pub async fn set_expiry(
        &self,
        name: &PeerName,
        lifetime: Option<Duration>,
    ) -> Result<Option<DateTime<Utc>>, LifecycleError> {
        if lifetime.is_some_and(|d| d <= Duration::zero()) {
            return Err(LifecycleError::InvalidRequest(
                "lifetime must be positive".to_string(),
            ));
        }
        let _guard = self.locks.lock(name).await;
        let mut record = self.load_existing(name).await?;

        record.expires_at = match lifetime {
            Some(lifetime) => Some(Utc::now().checked_add_signed(lifetime).ok_or_else(|| {
                LifecycleError::InvalidRequest("lifetime is out of range".to_string())
            })?),
            None => None,
        };
        self.apply_expiry(&record).await?;
        Ok(record.expires_at)
    }

    /// Saves the record and brings its job in line with `expires_at`.
    /// Caller must hold the peer's lock.
    pub(super) async fn apply_expiry(&self, record: &PeerRecord) -> Result<(), LifecycleError> {
        self.store.save(record).await?;
        match record.expires_at {
            Some(at) => self.jobs.schedule(&record.name, at),
            None => {
                self.jobs.cancel(&record.name);
            }
        }
        info!(peer = %record.name, expires_at = ?record.expires_at, "Peer expiry updated.");
        Ok(())
    }

    /// Changes the traffic limit and re-checks it against traffic so far.
    pub async fn set_quota(
        &self,
        name: &PeerName,
        quota: Option<u64>,
    ) -> Result<QuotaUpdate, LifecycleError> {
        if quota == Some(0) {
            return Err(LifecycleError::InvalidRequest(
                "traffic limit must be positive".to_string(),
            ));
        }
        let _guard = self.locks.lock(name).await;
        self.set_quota_locked(name, quota).await
    }

    async fn set_quota_locked(
        &self,
        name: &PeerName,
        quota: Option<u64>,
    ) -> Result<QuotaUpdate, LifecycleError> {
        let mut record = self.load_existing(name).await?;
        record.traffic_quota = quota;
        self.store.save(&record).await?;
        info!(peer = %name, quota = ?quota, "Peer traffic limit updated.");

        let snapshot = self.accountant.totals(name).await?;
        let totals = self.checked_totals(name, snapshot).await;
        self.deactivate_over_quota(name, quota, totals).await
    }

    /// Startup pass: re-registers future expiries and deactivates peers whose
    /// expiry passed while the service was down.
    pub async fn restore_schedule(&self) -> Result<RestoreSummary, LifecycleError> {
        let now = Utc::now();
        let mut summary = RestoreSummary::default();

        for record in self.store.list().await? {
            match record.expires_at {
                Some(at) if at > now => {
                    self.jobs.schedule(&record.name, at);
                    summary.scheduled += 1;
                    info!(peer = %record.name, at = %at, "Restored expiry job.");
                }
                Some(at) => {
                    warn!(peer = %record.name, expired_at = %at, "Peer expired while the service was down.");
                    match self
                        .deactivate(&record.name, DeactivationReason::ExpiredWhileDown)
                        .await
                    {
                        Ok(_) => summary.deactivated += 1,
                        Err(e) => {
                            error!(peer = %record.name, error = %e, "Catch-up deactivation incomplete.");
                            summary.failed += 1;
                        }
                    }
                }
                None => {}
            }
        }
        Ok(summary)
    }

    /// Heals drift between the interface and the store: names raw-key peers
    /// after their stored record, and deactivates records whose interface
    /// entry is gone.
    pub async fn reconcile(&self) -> Result<ReconcileSummary, LifecycleError> {
        let configured = self.registry.list_configured_peers().await?;
        let records = self.store.list().await?;
        let mut summary = ReconcileSummary::default();

        for peer in configured.iter().filter(|peer| peer.is_unnamed()) {
            let Some(record) = records.iter().find(|r| r.public_key == peer.public_key) else {
                continue;
            };
            let _guard = self.locks.lock(&record.name).await;
            match self.registry.rename_peer(&peer.public_key, &record.name).await {
                Ok(()) => {
                    summary.renamed += 1;
                    info!(peer = %record.name, public_key = %peer.public_key, "Named raw-key peer.");
                    self.notifier
                        .notify(PeerEvent::Renamed {
                            name: record.name.clone(),
                            public_key: peer.public_key.clone(),
                        })
                        .await;
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(peer = %record.name, error = %e, "Could not name raw-key peer.");
                }
            }
        }

        if configured.is_empty() && !records.is_empty() {
            warn!(
                stored = records.len(),
                "Interface lists no peers at all; not treating stored peers as vanished."
            );
            return Ok(summary);
        }

        let live_keys: HashSet<&str> = configured.iter().map(|p| p.public_key.as_str()).collect();
        for record in records
            .iter()
            .filter(|record| !live_keys.contains(record.public_key.as_str()))
        {
            match self.deactivate_if_vanished(&record.name).await {
                Ok(true) => summary.deactivated += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.failed += 1;
                    error!(peer = %record.name, error = %e, "Reconciling vanished peer failed.");
                }
            }
        }
        Ok(summary)
    }

    // Re-checks under the lock, since a reissue may have swapped the key
    // after the listing was taken.
    async fn deactivate_if_vanished(&self, name: &PeerName) -> Result<bool, LifecycleError> {
        let _guard = self.locks.lock(name).await;
        self.vanished_locked(name).await
    }

    async fn vanished_locked(&self, name: &PeerName) -> Result<bool, LifecycleError> {
        let Some(record) = self.store.load(name).await? else {
            return Ok(false);
        };
        let still_present = self
            .registry
            .list_configured_peers()
            .await?
            .iter()
            .any(|peer| peer.public_key == record.public_key);
        if still_present {
            return Ok(false);
        }

        warn!(peer = %name, public_key = %record.public_key, "Stored peer has no interface entry.");
        let outcome = self
            .deactivate_locked(name, DeactivationReason::Reconciled)
            .await?;
        Ok(outcome == DeactivateOutcome::Deactivated)
    }

    /// The peer's config as a shareable `vpn://` URI.
    pub async fn share_uri(&self, name: &PeerName) -> Result<String, LifecycleError> {
        self.load_existing(name).await?;
        let config = self
            .store
            .read_config(name)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(name.clone()))?;
        Ok(codec::encode_resolved(&config, self.resolver.as_ref()).await?)
    }
}
