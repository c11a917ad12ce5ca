//! Job registry: enqueue, poll, reconcile, clear.
//!
//! Jobs live in the [`StateStore`]; the registry is the only writer of
//! the job list. Every poll interval it issues one phase poll per active
//! job that has no poll outstanding. Results are applied through the
//! store only if the job is still present and still active, so a job
//! cleared or terminated while its request was in flight simply drops
//! the late response. Poll passes run on a [`TaskTracker`]; cancelling
//! the registry abandons outstanding requests and waits for the passes
//! to wind down.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use sodalite_core::error::CoreError;
use sodalite_core::job::{
    FinalStatus, Job, JobRequest, PhaseObservation, ESTIMATE_CAP, TRANSPORT_FAILURE_MESSAGE,
};
use sodalite_core::types::TaskId;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::{SodaliteApiError, TaskService};
use crate::store::StateStore;

/// Default interval between phase polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Bounds of the random per-tick progress estimate increment.
const ESTIMATE_STEP_MIN: f64 = 1.0;
const ESTIMATE_STEP_MAX: f64 = 8.0;

/// Errors returned to callers of [`JobRegistry::enqueue`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid job request: {0}")]
    InvalidRequest(#[from] CoreError),

    #[error("Failed to create task: {0}")]
    CreateFailed(#[from] SodaliteApiError),

    #[error("Registry is shut down")]
    ShutDown,
}

/// Shared handle to the job registry. Cheap to clone.
#[derive(Clone)]
pub struct JobRegistry {
    service: Arc<dyn TaskService>,
    store: StateStore,
    /// Ids with a poll currently outstanding.
    in_flight: Arc<Mutex<HashSet<TaskId>>>,
    wake: Arc<Notify>,
    /// Poll passes spawned by [`run`](Self::run).
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl JobRegistry {
    pub fn new(service: Arc<dyn TaskService>, store: StateStore, cancel: CancellationToken) -> Self {
        Self {
            service,
            store,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            wake: Arc::new(Notify::new()),
            tasks: TaskTracker::new(),
            cancel,
        }
    }

    /// Create a task remotely and start tracking it.
    ///
    /// The job is prepended (most recent first) in phase `initializing`
    /// and a running poll loop is woken to poll it right away.
    pub async fn enqueue(&self, request: JobRequest) -> Result<TaskId, RegistryError> {
        request.validate()?;
        if self.cancel.is_cancelled() {
            return Err(RegistryError::ShutDown);
        }

        let task_id = self.service.create_task(&request).await?;
        if self.cancel.is_cancelled() {
            return Err(RegistryError::ShutDown);
        }

        let job = Job::new(task_id.clone(), request, Utc::now());
        tracing::info!(
            task_id = %task_id,
            url = %job.source_url,
            format = job.format.as_str(),
            "Job enqueued",
        );

        self.store.update(|snapshot| {
            if snapshot.job(&task_id).is_some() {
                return false;
            }
            snapshot.jobs.insert(0, job);
            true
        });

        // Start polling without waiting for the next tick.
        self.wake.notify_one();

        Ok(task_id)
    }

    /// Stop tracking a job regardless of its state.
    pub fn clear(&self, task_id: &str) -> bool {
        let removed = self.store.update(|snapshot| {
            let before = snapshot.jobs.len();
            snapshot.jobs.retain(|job| job.id != task_id);
            snapshot.jobs.len() != before
        });
        if removed {
            tracing::debug!(task_id, "Job cleared");
        }
        removed
    }

    /// Remove every job that is no longer processing. Returns how many
    /// were removed.
    pub fn clear_terminal(&self) -> usize {
        let mut removed = 0;
        self.store.update(|snapshot| {
            let before = snapshot.jobs.len();
            snapshot.jobs.retain(Job::is_active);
            removed = before - snapshot.jobs.len();
            removed > 0
        });
        if removed > 0 {
            tracing::debug!(removed, "Terminal jobs cleared");
        }
        removed
    }

    /// Poll on `interval` until cancelled. An enqueue triggers an extra
    /// poll pass without advancing the progress estimates.
    ///
    /// Each pass runs as its own task so one slow job never delays the
    /// next tick for the others.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.spawn_pass(true),
                _ = self.wake.notified() => self.spawn_pass(false),
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
        tracing::debug!("Job registry stopped");
    }

    /// One timed pass: advance estimates, then [`poll_active`](Self::poll_active).
    pub async fn tick(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.advance_estimates();
        self.poll_active().await;
    }

    /// Poll every active job that has no poll outstanding and wait for
    /// those polls to settle.
    pub async fn poll_active(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        let active: Vec<TaskId> = self
            .store
            .snapshot()
            .jobs
            .iter()
            .filter(|job| job.is_active())
            .map(|job| job.id.clone())
            .collect();

        let mut due = Vec::with_capacity(active.len());
        for id in active {
            if self.try_begin_poll(&id).await {
                due.push(id);
            }
        }

        if !due.is_empty() {
            tracing::debug!(count = due.len(), "Polling active jobs");
        }
        join_all(due.into_iter().map(|id| self.poll_job(id))).await;
    }

    /// Whether a poll for `task_id` is outstanding.
    pub async fn is_polling(&self, task_id: &str) -> bool {
        self.in_flight.lock().await.contains(task_id)
    }

    // ---- private helpers ----

    fn spawn_pass(&self, timed: bool) {
        let registry = self.clone();
        self.tasks.spawn(async move {
            if timed {
                registry.tick().await;
            } else {
                registry.poll_active().await;
            }
        });
    }

    /// Claim the in-flight slot for a job. `false` if one is outstanding.
    async fn try_begin_poll(&self, task_id: &str) -> bool {
        self.in_flight.lock().await.insert(task_id.to_string())
    }

    /// Poll one job and release its in-flight slot. Cancellation drops
    /// the outstanding request.
    async fn poll_job(&self, task_id: TaskId) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(task_id = %task_id, "Poll abandoned on shutdown");
            }
            _ = self.reconcile(&task_id) => {}
        }
        self.in_flight.lock().await.remove(&task_id);
    }

    async fn reconcile(&self, task_id: &str) {
        let observation = match self.service.task_phase(task_id).await {
            Ok(observation) => observation,
            Err(e) => {
                self.handle_poll_error(task_id, &e);
                return;
            }
        };

        if !self.apply_phase(task_id, observation) {
            return;
        }

        let status = match self.service.task_status(task_id).await {
            Ok(status) => status,
            Err(e) => {
                self.handle_poll_error(task_id, &e);
                return;
            }
        };
        self.apply_final_status(task_id, status);
    }

    /// A malformed body is dropped and the job polled again next tick;
    /// anything else is a transport failure.
    fn handle_poll_error(&self, task_id: &str, error: &SodaliteApiError) {
        match error {
            SodaliteApiError::Decode(e) => {
                tracing::warn!(task_id, error = %e, "Dropping malformed status response");
            }
            _ => self.fail_transport(task_id, error),
        }
    }

    /// Returns whether the full status should be fetched next.
    fn apply_phase(&self, task_id: &str, observation: PhaseObservation) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let mut needs_final_status = false;
        self.store.update(|snapshot| {
            let Some(job) = snapshot.job_mut(task_id) else {
                return false;
            };
            let update = job.apply_phase(observation);
            if update.changed {
                tracing::debug!(task_id, phase = %job.phase, "Job phase advanced");
            }
            needs_final_status = update.needs_final_status;
            update.changed
        });
        needs_final_status
    }

    fn apply_final_status(&self, task_id: &str, status: FinalStatus) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.store.update(|snapshot| {
            let Some(job) = snapshot.job_mut(task_id) else {
                return false;
            };
            if !job.apply_final_status(status, Utc::now()) {
                return false;
            }
            match job.error.as_deref() {
                None => tracing::info!(
                    task_id,
                    artifact = job.artifact_ref.as_deref().unwrap_or(""),
                    "Job completed",
                ),
                Some(error) => tracing::warn!(task_id, error, "Job failed"),
            }
            true
        });
    }

    fn fail_transport(&self, task_id: &str, error: &SodaliteApiError) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.store.update(|snapshot| {
            let Some(job) = snapshot.job_mut(task_id) else {
                return false;
            };
            let failed = job.fail(TRANSPORT_FAILURE_MESSAGE, Utc::now());
            if failed {
                tracing::warn!(task_id, error = %error, "Status poll failed, marking job failed");
            }
            failed
        });
    }

    fn advance_estimates(&self) {
        let mut rng = rand::rng();
        self.store.update(|snapshot| {
            let mut changed = false;
            for job in snapshot.jobs.iter_mut() {
                if job.progress_estimate >= ESTIMATE_CAP {
                    continue;
                }
                let step = rng.random_range(ESTIMATE_STEP_MIN..ESTIMATE_STEP_MAX);
                changed |= job.advance_estimate(step);
            }
            changed
        });
    }
}
