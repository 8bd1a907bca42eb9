use awgbot_common::PeerName;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const FIRED_CHANNEL_CAPACITY: usize = 256;

struct Job {
    generation: u64,
    at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

type JobTable = Arc<Mutex<HashMap<PeerName, Job>>>;

/// One-shot deactivation jobs, at most one per peer name.
///
/// A fired job only reports its name if it is still the registered
/// generation, so a job replaced while it was waking up never fires.
#[derive(Clone)]
pub struct ExpiryJobs {
    jobs: JobTable,
    next_generation: Arc<AtomicU64>,
    fired_tx: mpsc::Sender<PeerName>,
}

impl ExpiryJobs {
    /// Creates the job table and the receiving end for fired names.
    pub fn new() -> (Self, mpsc::Receiver<PeerName>) {
        let (fired_tx, fired_rx) = mpsc::channel(FIRED_CHANNEL_CAPACITY);
        let jobs = Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
            fired_tx,
        };
        (jobs, fired_rx)
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<PeerName, Job>> {
        // The table holds no invariants a panicking holder could break.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers (or replaces) the job for `name`. The old job is aborted
    /// under the same lock the new one is inserted with.
    pub fn schedule(&self, name: &PeerName, at: DateTime<Utc>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = (at - Utc::now()).to_std().unwrap_or_default();

        let jobs = Arc::clone(&self.jobs);
        let fired_tx = self.fired_tx.clone();
        let job_name = name.clone();

        let mut table = self.table();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_current = {
                let mut table = jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                match table.get(&job_name) {
                    Some(job) if job.generation == generation => {
                        table.remove(&job_name);
                        true
                    }
                    _ => false,
                }
            };
            if !still_current {
                debug!(peer = %job_name, "Superseded expiry job woke up, ignoring.");
                return;
            }
            info!(peer = %job_name, "Expiry job fired.");
            if fired_tx.send(job_name.clone()).await.is_err() {
                error!(peer = %job_name, "Expiry job fired after the scheduler stopped.");
            }
        });

        if let Some(old) = table.insert(name.clone(), Job { generation, at, handle }) {
            old.handle.abort();
            debug!(peer = %name, previous = %old.at, next = %at, "Replaced expiry job.");
        } else {
            debug!(peer = %name, at = %at, "Scheduled expiry job.");
        }
    }

    /// Cancels the job for `name`; returns whether one was registered.
    pub fn cancel(&self, name: &PeerName) -> bool {
        match self.table().remove(name) {
            Some(job) => {
                job.handle.abort();
                debug!(peer = %name, "Cancelled expiry job.");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Job> = self.table().drain().map(|(_, job)| job).collect();
        for job in &drained {
            job.handle.abort();
        }
        drained.len()
    }

    pub fn scheduled_at(&self, name: &PeerName) -> Option<DateTime<Utc>> {
        self.table().get(name).map(|job| job.at)
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn name(raw: &str) -> PeerName {
        PeerName::parse(raw).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_fires_once_at_its_time() {
        let (jobs, mut fired) = ExpiryJobs::new();
        let alice = name("alice");
        jobs.schedule(&alice, Utc::now() + ChronoDuration::hours(1));
        assert_eq!(jobs.len(), 1);

        tokio::time::sleep(Duration::from_secs(3599)).await;
        assert!(fired.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.recv().await, Some(alice.clone()));
        assert!(jobs.is_empty());
        assert!(jobs.scheduled_at(&alice).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous_job() {
        let (jobs, mut fired) = ExpiryJobs::new();
        let bob = name("bob");
        jobs.schedule(&bob, Utc::now() + ChronoDuration::minutes(10));
        let later = Utc::now() + ChronoDuration::minutes(30);
        jobs.schedule(&bob, later);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs.scheduled_at(&bob), Some(later));

        tokio::time::sleep(Duration::from_secs(15 * 60)).await;
        assert!(fired.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(16 * 60)).await;
        assert_eq!(fired.recv().await, Some(bob));
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (jobs, mut fired) = ExpiryJobs::new();
        let carol = name("carol");
        jobs.schedule(&carol, Utc::now() + ChronoDuration::seconds(5));
        assert!(jobs.cancel(&carol));
        assert!(!jobs.cancel(&carol));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_instant_fires_immediately() {
        let (jobs, mut fired) = ExpiryJobs::new();
        let dave = name("dave");
        jobs.schedule(&dave, Utc::now() - ChronoDuration::seconds(5));
        assert_eq!(fired.recv().await, Some(dave));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (jobs, mut fired) = ExpiryJobs::new();
        jobs.schedule(&name("a"), Utc::now() + ChronoDuration::seconds(5));
        jobs.schedule(&name("b"), Utc::now() + ChronoDuration::seconds(6));
        assert_eq!(jobs.cancel_all(), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(fired.try_recv().is_err());
    }
}
