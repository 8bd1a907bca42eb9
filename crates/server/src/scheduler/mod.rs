use awgbot_common::PeerName;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub mod jobs;

pub use jobs::ExpiryJobs;

use crate::registry::ActivePeer;
use crate::services::{
    AccountedTraffic, LifecycleError, LifecycleManager, QuotaUpdate, ReconcileSummary, RestoreSummary,
};

/// What one sweep tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub polled: usize,
    pub recorded: usize,
    pub quota_deactivated: usize,
    /// Active peers without a stored record, e.g. raw-key entries.
    pub skipped: usize,
    pub failed: usize,
    /// `None` when the reconciliation pass itself failed.
    pub reconcile: Option<ReconcileSummary>,
}

enum PeerPoll {
    Recorded,
    QuotaDeactivated,
    Skipped,
    Failed,
}

/// Drives fired expiry jobs and the fixed-interval sweep.
pub struct ExpiryScheduler {
    lifecycle: Arc<LifecycleManager>,
    fired_rx: Option<mpsc::Receiver<PeerName>>,
    sweep_interval: Duration,
    per_peer_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl ExpiryScheduler {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        fired_rx: mpsc::Receiver<PeerName>,
        sweep_interval: Duration,
        per_peer_timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            fired_rx: Some(fired_rx),
            sweep_interval,
            per_peer_timeout,
            tasks: Vec::new(),
        }
    }

    /// Rehydrates expiry jobs (deactivating anything that lapsed while the
    /// process was down), then starts the background loops.
    pub async fn start(&mut self) -> Result<RestoreSummary, LifecycleError> {
        let summary = self.lifecycle.restore_schedule().await?;
        info!(
            scheduled = summary.scheduled,
            deactivated = summary.deactivated,
            failed = summary.failed,
            "Expiry schedule restored."
        );

        match self.fired_rx.take() {
            Some(fired_rx) => self.tasks.push(spawn_fired_loop(
                Arc::clone(&self.lifecycle),
                fired_rx,
            )),
            None => warn!("Scheduler already started, not starting a second fired-job loop."),
        }
        self.tasks.push(spawn_sweep_loop(
            Arc::clone(&self.lifecycle),
            self.sweep_interval,
            self.per_peer_timeout,
        ));
        info!(interval_secs = self.sweep_interval.as_secs(), "Scheduler started.");
        Ok(summary)
    }

    /// Runs one sweep tick now.
    pub async fn run_sweep(&self) -> SweepReport {
        sweep(&self.lifecycle, self.per_peer_timeout).await
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let cancelled = self.lifecycle.jobs().cancel_all();
        info!(cancelled_jobs = cancelled, "Scheduler stopped.");
    }
}

fn spawn_fired_loop(
    lifecycle: Arc<LifecycleManager>,
    mut fired_rx: mpsc::Receiver<PeerName>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(name) = fired_rx.recv().await {
            // Each peer gets its own task so a slow teardown never delays
            // another peer's expiry.
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                lifecycle.handle_expiry_fired(&name).await;
            });
        }
        debug!("Expiry channel closed, fired-job loop exiting.");
    })
}

fn spawn_sweep_loop(
    lifecycle: Arc<LifecycleManager>,
    period: Duration,
    per_peer_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = sweep(&lifecycle, per_peer_timeout).await;
            if report.quota_deactivated > 0 || report.failed > 0 {
                info!(?report, "Sweep finished.");
            } else {
                debug!(?report, "Sweep finished.");
            }
        }
    })
}

async fn sweep(lifecycle: &Arc<LifecycleManager>, per_peer_timeout: Duration) -> SweepReport {
    let (mut report, reconcile) =
        tokio::join!(poll_traffic(lifecycle, per_peer_timeout), lifecycle.reconcile());
    report.reconcile = match reconcile {
        Ok(summary) => Some(summary),
        Err(e) => {
            error!(error = %e, "Peer reconciliation failed this tick.");
            None
        }
    };
    report
}

async fn poll_traffic(lifecycle: &Arc<LifecycleManager>, per_peer_timeout: Duration) -> SweepReport {
    let mut report = SweepReport::default();
    let active = match lifecycle.active_peers().await {
        Ok(active) => active,
        Err(e) => {
            error!(error = %e, "Could not list active peers, skipping traffic poll.");
            report.failed += 1;
            return report;
        }
    };

    report.polled = active.len();
    let polls = join_all(
        active
            .into_iter()
            .map(|peer| poll_peer(lifecycle, peer, per_peer_timeout)),
    )
    .await;
    for poll in polls {
        match poll {
            PeerPoll::Recorded => report.recorded += 1,
            PeerPoll::QuotaDeactivated => report.quota_deactivated += 1,
            PeerPoll::Skipped => report.skipped += 1,
            PeerPoll::Failed => report.failed += 1,
        }
    }
    report
}

async fn poll_peer(
    lifecycle: &Arc<LifecycleManager>,
    peer: ActivePeer,
    per_peer_timeout: Duration,
) -> PeerPoll {
    let name = match PeerName::parse(&peer.name) {
        Ok(name) if peer.name != peer.public_key => name,
        _ => {
            debug!(peer = %peer.name, "Active peer has no usable name yet, skipping.");
            return PeerPoll::Skipped;
        }
    };
    let reading = match peer.transfer_reading() {
        Ok(reading) => reading,
        Err(e) => {
            warn!(peer = %name, error = %e, "Unreadable transfer counters.");
            return PeerPoll::Failed;
        }
    };

    // Only the read-and-account step is bounded; teardown must not be cut off.
    let accounting = lifecycle.account_traffic(&name, &peer.public_key, reading);
    let accounted = match time::timeout(per_peer_timeout, accounting).await {
        Ok(Ok(accounted)) => accounted,
        Ok(Err(e)) => {
            error!(peer = %name, error = %e, "Traffic accounting failed.");
            return PeerPoll::Failed;
        }
        Err(_) => {
            error!(peer = %name, timeout_secs = per_peer_timeout.as_secs(), "Traffic accounting timed out.");
            return PeerPoll::Failed;
        }
    };

    match accounted {
        AccountedTraffic::WithinQuota(_) => PeerPoll::Recorded,
        AccountedTraffic::Dropped => PeerPoll::Skipped,
        AccountedTraffic::OverQuota(_) => enforce_detached(lifecycle, name).await,
    }
}

/// Runs quota teardown on its own task, so it finishes even if the sweep
/// that started it is aborted.
async fn enforce_detached(lifecycle: &Arc<LifecycleManager>, name: PeerName) -> PeerPoll {
    let enforcer = Arc::clone(lifecycle);
    let target = name.clone();
    let task = tokio::spawn(async move { enforcer.enforce_quota(&target).await });
    match task.await {
        Ok(Ok(Some(QuotaUpdate::Deactivated))) => PeerPoll::QuotaDeactivated,
        Ok(Ok(Some(QuotaUpdate::Applied))) => PeerPoll::Recorded,
        Ok(Ok(None)) => PeerPoll::Skipped,
        Ok(Err(e)) => {
            error!(peer = %name, error = %e, "Quota deactivation failed.");
            PeerPoll::Failed
        }
        Err(e) => {
            error!(peer = %name, error = %e, "Quota deactivation task did not finish.");
            PeerPoll::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{name, request, Harness};
    use crate::services::ProvisionRequest;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::Ordering;

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_sweep_enforces_quota_and_isolates_bad_peers() {
        let h = Harness::new().await;
        h.manager
            .provision(ProvisionRequest {
                quota: Some(10_000_000),
                ..request("alice")
            })
            .await
            .unwrap();
        h.manager.provision(request("bob")).await.unwrap();
        h.manager.provision(request("carol")).await.unwrap();
        h.registry.set_transfer("alice", "6.00 MB received, 5.00 MB sent");
        h.registry.set_transfer("bob", "lots received, some sent");
        h.registry.set_transfer("carol", "1.00 KiB received, 2.00 KiB sent");

        let scheduler =
            ExpiryScheduler::new(h.manager.clone(), h.fired, Duration::from_secs(60), Duration::from_secs(5));
        let report = scheduler.run_sweep().await;

        assert_eq!(report.polled, 3);
        assert_eq!(report.quota_deactivated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.recorded, 1);
        assert!(!h.registry.contains("alice"));
        assert!(h.registry.contains("bob"));
        assert_eq!(
            h.manager.overview(&name("carol")).await.unwrap().totals.incoming,
            1_024
        );

        // alice is gone; the next tick has nothing to do for her.
        let next = scheduler.run_sweep().await;
        assert_eq!(next.quota_deactivated, 0);
        assert_eq!(h.sender.count_containing("Peer alice was deactivated"), 1);
    }

    #[tokio::test]
    async fn test_raw_key_peers_are_skipped_then_named() {
        let h = Harness::new().await;
        h.manager.provision(request("dave")).await.unwrap();
        let key = h.registry.public_key_of("dave").unwrap();
        h.registry.drop_externally("dave");
        h.registry.insert_raw(&key, "10.8.1.2/32");
        h.registry.set_handshake(&key, "10 seconds ago");

        let scheduler =
            ExpiryScheduler::new(h.manager.clone(), h.fired, Duration::from_secs(60), Duration::from_secs(5));
        let report = scheduler.run_sweep().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.reconcile.map(|r| r.renamed), Some(1));
        assert!(h.registry.contains("dave"));
    }

    #[tokio::test]
    async fn test_start_catches_up_and_fires_jobs() {
        let h = Harness::new().await;
        for peer in ["erin", "fay"] {
            h.manager
                .provision(ProvisionRequest {
                    lifetime: Some(ChronoDuration::days(1)),
                    ..request(peer)
                })
                .await
                .unwrap();
        }
        let erin = name("erin");
        let mut lapsed = h.manager.store().load(&erin).await.unwrap().unwrap();
        lapsed.expires_at = Some(Utc::now() - ChronoDuration::hours(1));
        h.manager.store().save(&lapsed).await.unwrap();

        let mut scheduler =
            ExpiryScheduler::new(h.manager.clone(), h.fired, Duration::from_secs(60), Duration::from_secs(5));
        let summary = scheduler.start().await.unwrap();
        assert_eq!(summary.deactivated, 1);
        assert_eq!(summary.scheduled, 1);
        assert!(!h.registry.contains("erin"));

        // Bring fay's expiry to now and let her job fire.
        let fay = name("fay");
        let mut due = h.manager.store().load(&fay).await.unwrap().unwrap();
        let now = Utc::now();
        due.expires_at = Some(now);
        h.manager.store().save(&due).await.unwrap();
        h.manager.jobs().schedule(&fay, now);

        let registry = h.registry.clone();
        assert!(eventually(|| !registry.contains("fay")).await);
        scheduler.stop();
        assert!(h.manager.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_loop_runs_on_its_interval() {
        let h = Harness::new().await;
        h.manager
            .provision(ProvisionRequest {
                quota: Some(1_000),
                ..request("gus")
            })
            .await
            .unwrap();
        h.registry.set_transfer("gus", "1.00 KB received, 1.00 KB sent");

        let mut scheduler = ExpiryScheduler::new(
            h.manager.clone(),
            h.fired,
            Duration::from_millis(50),
            Duration::from_secs(5),
        );
        scheduler.start().await.unwrap();
        let registry = h.registry.clone();
        assert!(eventually(|| !registry.contains("gus")).await);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_slow_teardown_outlives_the_per_peer_timeout() {
        let h = Harness::new().await;
        h.manager
            .provision(ProvisionRequest {
                quota: Some(10_000_000),
                lifetime: Some(ChronoDuration::days(30)),
                ..request("alice")
            })
            .await
            .unwrap();
        h.registry.set_transfer("alice", "6.00 MB received, 5.00 MB sent");
        h.registry.delay_removals(Duration::from_millis(300));

        let scheduler = ExpiryScheduler::new(
            h.manager.clone(),
            h.fired,
            Duration::from_secs(60),
            Duration::from_millis(100),
        );
        let report = scheduler.run_sweep().await;

        assert_eq!(report.quota_deactivated, 1);
        assert_eq!(report.failed, 0);
        let alice = name("alice");
        assert!(!h.registry.contains("alice"));
        assert!(h.manager.store().load(&alice).await.unwrap().is_none());
        assert!(h.manager.jobs().scheduled_at(&alice).is_none());
        assert_eq!(h.sender.count_containing("Peer alice was deactivated"), 1);
    }

    #[tokio::test]
    async fn test_aborted_sweep_still_finishes_teardown() {
        let h = Harness::new().await;
        h.manager
            .provision(ProvisionRequest {
                quota: Some(1_000),
                ..request("bea")
            })
            .await
            .unwrap();
        h.registry.set_transfer("bea", "1.00 KB received, 1.00 KB sent");
        h.registry.delay_removals(Duration::from_millis(200));

        let lifecycle = h.manager.clone();
        let sweep_task = tokio::spawn(async move { sweep(&lifecycle, Duration::from_secs(5)).await });
        // Abort while the removal is still sleeping.
        let registry = h.registry.clone();
        assert!(eventually(|| registry.remove_calls.load(Ordering::SeqCst) > 0).await);
        sweep_task.abort();

        let registry = h.registry.clone();
        assert!(eventually(|| !registry.contains("bea")).await);
        let sender = h.sender.clone();
        assert!(eventually(|| sender.count_containing("Peer bea was deactivated") == 1).await);
    }
}
