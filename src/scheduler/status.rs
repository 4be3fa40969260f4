use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::scheduler::job::{Job, JobPhase};

/// Point-in-time view of the queue, rendered by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Tasks not yet reported complete, across all jobs.
    pub remaining_tasks: usize,
    /// Per-job detail, present only for verbose requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<JobStatusInfo>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusInfo {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub resource_id: String,
    pub phase: JobPhase,
    pub completed: usize,
    pub size: usize,
    pub undelivered: usize,
    pub iteration: u64,
    /// Milliseconds since the last batch, `None` if nothing was delivered yet.
    pub since_last_delivery_ms: Option<u64>,
    pub submitted_at_ms: i64,
}

impl JobStatusInfo {
    pub fn from_job(job: &Job, now: Instant) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            owner: job.owner.clone(),
            resource_id: job.resource_id.clone(),
            phase: job.phase(),
            completed: job.n_complete(),
            size: job.size,
            undelivered: job.n_undelivered(),
            iteration: job.iteration(),
            since_last_delivery_ms: job
                .last_delivery()
                .map(|last| now.saturating_duration_since(last).as_millis() as u64),
            submitted_at_ms: job.submitted_at.timestamp_millis(),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} tasks remaining", self.remaining_tasks)?;
        for job in self.jobs.iter().flatten() {
            writeln!(f, "{}", job)?;
        }
        Ok(())
    }
}

impl fmt::Display for JobStatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, owner {}, resource {}): {}/{} complete, {} undelivered, iteration {}, ",
            self.id,
            self.name,
            self.owner,
            self.resource_id,
            self.completed,
            self.size,
            self.undelivered,
            self.iteration,
        )?;
        match self.since_last_delivery_ms {
            Some(ms) => write!(f, "last delivery {:.1}s ago", ms as f64 / 1000.0)?,
            None => write!(f, "never delivered")?,
        }
        write!(f, " [{}]", self.phase)
    }
}
