//! Subscribable aggregate read by the rendering layer.
//!
//! [`StateStore`] wraps a [`tokio::sync::watch`] channel holding the
//! latest [`StoreSnapshot`]. Writers mutate it atomically through
//! [`StateStore::update`]; an update that reports a change bumps the
//! revision and wakes every subscriber exactly once. Subscribers that
//! are slower than the writers only ever observe the latest snapshot,
//! which batches same-tick updates for free.

use std::sync::Arc;

use serde::Serialize;
use sodalite_core::job::Job;
use sodalite_core::liveness::LivenessState;
use tokio::sync::watch;

/// Everything the rendering layer can see.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreSnapshot {
    /// Incremented once per effective mutation.
    pub revision: u64,
    pub liveness: LivenessState,
    /// Most recently enqueued first.
    pub jobs: Vec<Job>,
}

impl StoreSnapshot {
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    pub fn active_job_count(&self) -> usize {
        self.jobs.iter().filter(|job| job.is_active()).count()
    }
}

/// Shared handle to the store. Cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    sender: Arc<watch::Sender<StoreSnapshot>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(StoreSnapshot::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Clone of the current snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.sender.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.sender.subscribe()
    }

    /// Apply `mutate` atomically. It returns whether it changed anything;
    /// only then is the revision bumped and subscribers notified.
    pub fn update<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut StoreSnapshot) -> bool,
    {
        self.sender.send_if_modified(|snapshot| {
            let modified = mutate(snapshot);
            if modified {
                snapshot.revision += 1;
            }
            modified
        })
    }

    /// Replace the liveness read model if it differs.
    pub fn set_liveness(&self, liveness: LivenessState) -> bool {
        self.update(|snapshot| {
            if snapshot.liveness == liveness {
                return false;
            }
            snapshot.liveness = liveness;
            true
        })
    }
}
