//! Public job operations used by the HTTP layer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::engine::{OutputLayout, SeparationEngine};
use crate::error::StemsplitError;
use crate::state_machine::{JobId, JobRecord, Lifecycle, ProgressPolicy};
use crate::store::JobStore;
use crate::supervisor::ExecutionSupervisor;

/// Tunables for job execution.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub policy: ProgressPolicy,
    pub poll_interval: Duration,
    /// Jobs beyond this many wait as `starting` until a slot frees up.
    pub max_concurrent_jobs: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            policy: ProgressPolicy::default(),
            poll_interval: Duration::from_secs(1),
            max_concurrent_jobs: 2,
        }
    }
}

/// Creates jobs and answers progress queries.
///
/// Every submission gets its own supervised tokio task; a semaphore caps how
/// many engine processes run at once.
pub struct JobService<E> {
    store: JobStore,
    supervisor: Arc<ExecutionSupervisor<E>>,
    permits: Arc<Semaphore>,
    max_concurrent_jobs: usize,
}

impl<E> Clone for JobService<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            supervisor: Arc::clone(&self.supervisor),
            permits: Arc::clone(&self.permits),
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }
}

impl<E: SeparationEngine> JobService<E> {
    pub fn new(
        store: JobStore,
        engine: E,
        layout: OutputLayout,
        settings: ServiceSettings,
    ) -> Self {
        let max_concurrent_jobs = settings.max_concurrent_jobs.max(1);
        let supervisor = ExecutionSupervisor::new(
            store.clone(),
            Arc::new(engine),
            Arc::new(layout),
            settings.policy,
            settings.poll_interval,
        );
        Self {
            store,
            supervisor: Arc::new(supervisor),
            permits: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
        }
    }

    /// Registers a new job for `input` and starts it in the background.
    ///
    /// Returns as soon as the job is registered; must be called from within a
    /// tokio runtime.
    pub fn submit(&self, input: PathBuf) -> Result<JobId, StemsplitError> {
        let id = JobId::generate();
        self.store.create(id.clone(), JobRecord::new(id.clone()))?;
        info!(job_id = %id, input = %input.display(), "job submitted");

        let supervisor = Arc::clone(&self.supervisor);
        let permits = Arc::clone(&self.permits);
        let store = self.store.clone();
        let job_id = id.clone();
        let task = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                let _ = store.update(&job_id, |r| Lifecycle::fail(r, "job queue closed"));
                return;
            };
            supervisor.run(job_id, input).await;
        });
        self.watch(id.clone(), task);

        Ok(id)
    }

    pub fn query(&self, id: &JobId) -> Result<JobRecord, StemsplitError> {
        self.store.get(id)
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    pub fn running_jobs(&self) -> usize {
        self.max_concurrent_jobs
            .saturating_sub(self.permits.available_permits())
    }

    /// Periodically drops terminal jobs that have not changed for `ttl`.
    pub fn spawn_eviction(&self, ttl: Duration, every: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = store.evict_terminal_older_than(ttl);
                if evicted > 0 {
                    info!(evicted, remaining = store.len(), "evicted finished jobs");
                }
            }
        })
    }

    /// Marks the job failed if its task dies without reaching a terminal state.
    fn watch(&self, id: JobId, task: JoinHandle<()>) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!(job_id = %id, "supervisor task ended abnormally: {e}");
                let message = if e.is_panic() {
                    "supervisor task panicked"
                } else {
                    "supervisor task was cancelled"
                };
                let _ = store.update(&id, |r| Lifecycle::fail(r, message));
            }
        });
    }
}
