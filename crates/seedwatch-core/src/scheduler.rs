//! Job scheduler - runs each job on its own recurring timer
//!
//! Every job gets a timer loop that awaits the run before ticking again, so
//! a job never overlaps with itself. Ticks that come due while a run is in
//! progress are skipped. Runs execute in their own task; errors and panics
//! are logged and the next firing happens as usual.

use crate::error::SeedwatchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A unit of recurring work
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Time between firings
    fn interval(&self) -> Duration;

    async fn run(&self) -> Result<(), SeedwatchError>;
}

/// How a single run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    Panicked,
}

#[derive(Debug, Clone)]
pub struct JobRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: JobOutcome,
}

/// Snapshot of a registered job
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub name: &'static str,
    pub interval: Duration,
    pub running: bool,
    pub runs: u64,
    pub last_run: Option<JobRun>,
}

struct JobSlot {
    job: Arc<dyn ScheduledJob>,
    running: AtomicBool,
    runs: Mutex<u64>,
    last_run: RwLock<Option<JobRun>>,
}

impl JobSlot {
    fn new(job: Arc<dyn ScheduledJob>) -> Self {
        Self {
            job,
            running: AtomicBool::new(false),
            runs: Mutex::new(0),
            last_run: RwLock::new(None),
        }
    }

    /// Claim the slot; false if a run is already in progress
    fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self, run: JobRun) {
        *self.runs.lock() += 1;
        *self.last_run.write() = Some(run);
        self.running.store(false, Ordering::Release);
    }

    fn status(&self) -> JobStatus {
        JobStatus {
            name: self.job.name(),
            interval: self.job.interval(),
            running: self.running.load(Ordering::Acquire),
            runs: *self.runs.lock(),
            last_run: self.last_run.read().clone(),
        }
    }
}

/// Recurring-timer host for [`ScheduledJob`]s
pub struct Scheduler {
    slots: RwLock<HashMap<&'static str, Arc<JobSlot>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a running scheduler with no jobs
    pub fn start() -> Self {
        info!("Starting job scheduler");
        Self {
            slots: RwLock::new(HashMap::new()),
            loops: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a job and start its timer. The first run fires immediately.
    /// Names are unique; scheduling a name twice is an error.
    pub fn schedule(&self, job: Arc<dyn ScheduledJob>) -> Result<(), SeedwatchError> {
        let name = job.name();
        let period = job.interval();
        let slot = Arc::new(JobSlot::new(job));

        match self.slots.write().entry(name) {
            Entry::Occupied(_) => {
                warn!("Job {} is already scheduled", name);
                return Err(SeedwatchError::JobAlreadyScheduled(name.to_string()));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&slot));
            }
        }

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !slot.try_begin() {
                    debug!("Job {} still running, skipping this firing", name);
                    continue;
                }
                execute(&slot).await;
            }

            debug!("Timer for job {} stopped", name);
        });

        self.loops.lock().push(handle);
        info!("Scheduled job {} every {:?}", name, period);
        Ok(())
    }

    /// Run a job right now, outside its timer
    pub async fn trigger(&self, name: &str) -> Result<JobRun, SeedwatchError> {
        let slot = self
            .slots
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SeedwatchError::JobNotFound(name.to_string()))?;

        if !slot.try_begin() {
            return Err(SeedwatchError::JobAlreadyRunning(name.to_string()));
        }
        Ok(execute(&slot).await)
    }

    /// Status of every registered job, sorted by name
    pub fn jobs(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self.slots.read().values().map(|s| s.status()).collect();
        jobs.sort_by_key(|j| j.name);
        jobs
    }

    /// Stop all timers. A run in progress is allowed to finish.
    pub async fn shutdown(&self) {
        info!("Stopping job scheduler");
        self.cancel.cancel();
        let loops = std::mem::take(&mut *self.loops.lock());
        join_all(loops).await;
    }
}

/// Run the job in its own task and record how it ended. The slot must
/// already be claimed.
async fn execute(slot: &JobSlot) -> JobRun {
    let name = slot.job.name();
    let job = Arc::clone(&slot.job);
    let started_at = Utc::now();
    debug!("Running job {}", name);

    let outcome = match tokio::spawn(async move { job.run().await }).await {
        Ok(Ok(())) => JobOutcome::Succeeded,
        Ok(Err(e)) => {
            if e.is_transient() {
                warn!("Job {} failed: {}", name, e);
            } else {
                error!("Job {} failed: {}", name, e);
            }
            JobOutcome::Failed(e.to_string())
        }
        Err(e) => {
            error!("Job {} panicked: {}", name, e);
            JobOutcome::Panicked
        }
    };

    let run = JobRun {
        started_at,
        finished_at: Utc::now(),
        outcome,
    };
    slot.finish(run.clone());
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    struct Flaky {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ScheduledJob for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn run(&self) -> Result<(), SeedwatchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match n % 3 {
                0 => Err(SeedwatchError::Feed("boom".to_string())),
                1 => panic!("job exploded"),
                _ => Ok(()),
            }
        }
    }

    /// Blocks until released
    struct Gate {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ScheduledJob for Gate {
        fn name(&self) -> &'static str {
            "gate"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(3600)
        }

        async fn run(&self) -> Result<(), SeedwatchError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_job_keeps_firing() {
        let job = Arc::new(Flaky {
            calls: AtomicU32::new(0),
        });
        let scheduler = Scheduler::start();
        scheduler.schedule(job.clone()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while job.calls.load(Ordering::SeqCst) < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job stopped firing");

        scheduler.shutdown().await;
        let status = &scheduler.jobs()[0];
        assert!(status.runs >= 6);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn trigger_while_running_is_rejected() {
        let job = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let scheduler = Scheduler::start();
        scheduler.schedule(job.clone()).unwrap();

        // The first firing is immediate and parks in the gate
        job.entered.notified().await;
        assert!(scheduler.jobs()[0].running);

        let result = scheduler.trigger("gate").await;
        assert!(matches!(result, Err(SeedwatchError::JobAlreadyRunning(_))));

        job.release.notify_one();
        scheduler.shutdown().await;

        let status = &scheduler.jobs()[0];
        assert_eq!(status.runs, 1);
        assert_eq!(
            status.last_run.as_ref().map(|r| r.outcome.clone()),
            Some(JobOutcome::Succeeded)
        );
    }

    #[tokio::test]
    async fn a_name_can_only_be_scheduled_once() {
        let first = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let second = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let scheduler = Scheduler::start();
        scheduler.schedule(first.clone()).unwrap();

        let result = scheduler.schedule(second.clone());
        assert!(matches!(result, Err(SeedwatchError::JobAlreadyScheduled(_))));
        assert_eq!(scheduler.jobs().len(), 1);

        first.entered.notified().await;
        let started = tokio::time::timeout(Duration::from_millis(50), second.entered.notified());
        assert!(started.await.is_err());

        first.release.notify_one();
        scheduler.shutdown().await;
        assert_eq!(scheduler.jobs()[0].runs, 1);
    }

    #[tokio::test]
    async fn unknown_job_cannot_be_triggered() {
        let scheduler = Scheduler::start();
        let result = scheduler.trigger("nope").await;
        assert!(matches!(result, Err(SeedwatchError::JobNotFound(_))));
    }
}
