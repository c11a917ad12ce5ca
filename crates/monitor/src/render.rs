//! Log-based rendering of store snapshots.
//!
//! Stands in for a UI: each new snapshot is diffed against the previous
//! one and only the changes are logged.

use std::collections::HashMap;

use sodalite_client::store::StoreSnapshot;
use sodalite_core::job::{Job, Outcome, Phase};
use sodalite_core::types::TaskId;

/// Something worth a log line.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Liveness { label: &'static str },
    JobAdded { id: TaskId, name: String },
    JobPhase { id: TaskId, phase: Phase },
    JobFinished { id: TaskId, outcome: Outcome, detail: String },
    JobRemoved { id: TaskId },
}

#[derive(Debug, Default)]
pub struct SnapshotRenderer {
    liveness: Option<&'static str>,
    jobs: HashMap<TaskId, (Phase, Outcome)>,
}

impl SnapshotRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes since the previously observed snapshot.
    pub fn diff(&mut self, snapshot: &StoreSnapshot) -> Vec<Change> {
        let mut changes = Vec::new();

        let label = snapshot.liveness.label();
        if self.liveness != Some(label) {
            self.liveness = Some(label);
            changes.push(Change::Liveness { label });
        }

        // Oldest first so log order follows enqueue order.
        for job in snapshot.jobs.iter().rev() {
            let current = (job.phase, job.outcome);
            match self.jobs.insert(job.id.clone(), current) {
                None => {
                    changes.push(Change::JobAdded {
                        id: job.id.clone(),
                        name: job.display_name.clone(),
                    });
                    if !job.is_active() {
                        changes.push(finished(job));
                    }
                }
                Some(previous) if previous != current => {
                    if job.is_active() {
                        changes.push(Change::JobPhase {
                            id: job.id.clone(),
                            phase: job.phase,
                        });
                    } else {
                        changes.push(finished(job));
                    }
                }
                Some(_) => {}
            }
        }

        let mut removed: Vec<TaskId> = self
            .jobs
            .keys()
            .filter(|id| snapshot.job(id).is_none())
            .cloned()
            .collect();
        removed.sort();
        for id in removed {
            self.jobs.remove(&id);
            changes.push(Change::JobRemoved { id });
        }

        changes
    }
}

fn finished(job: &Job) -> Change {
    let detail = match job.outcome {
        Outcome::Completed => job.artifact_ref.clone().unwrap_or_default(),
        _ => job.error.clone().unwrap_or_default(),
    };
    Change::JobFinished {
        id: job.id.clone(),
        outcome: job.outcome,
        detail,
    }
}

/// Emit one log line per change.
pub fn log_changes(snapshot: &StoreSnapshot, changes: &[Change]) {
    for change in changes {
        match change {
            Change::Liveness { label } => {
                let stats = snapshot.liveness.statistics.as_ref();
                tracing::info!(
                    status = label,
                    last_seen = ?snapshot.liveness.last_seen,
                    connected_clients = stats.map(|s| s.connected_clients),
                    total_conversions = stats.map(|s| s.total_conversions),
                    "Service status",
                );
            }
            Change::JobAdded { id, name } => {
                tracing::info!(task_id = %id, name = %name, "Tracking job");
            }
            Change::JobPhase { id, phase } => {
                let progress = snapshot.job(id).map(|job| job.progress_estimate);
                tracing::info!(task_id = %id, phase = %phase, progress, "Job progress");
            }
            Change::JobFinished {
                id,
                outcome: Outcome::Completed,
                detail,
            } => {
                tracing::info!(task_id = %id, artifact = %detail, "Job ready");
            }
            Change::JobFinished { id, detail, .. } => {
                tracing::warn!(task_id = %id, error = %detail, "Job failed");
            }
            Change::JobRemoved { id } => {
                tracing::debug!(task_id = %id, "Job removed");
            }
        }
    }
}
