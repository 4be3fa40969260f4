use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::bitmap::Bitmap;

/// How long to wait after the last delivery before redelivering tasks that
/// were handed out but never reported complete.
pub const DEFAULT_REDELIVERY_GRACE: Duration = Duration::from_secs(30);

/// A job as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub owner: String,
    pub resource_id: String,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Handing out tasks in the current pass.
    Delivering,
    /// Every task has been offered once; waiting out the grace window.
    AwaitingCompletion,
    Finished,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Delivering => write!(f, "delivering"),
            JobPhase::AwaitingCompletion => write!(f, "awaiting completion"),
            JobPhase::Finished => write!(f, "finished"),
        }
    }
}

/// Delivery and completion state for one submitted job.
///
/// A job walks its task range once per delivery pass, handing out every task
/// not yet delivered. Once the cursor reaches the end it waits for the grace
/// window, then starts a new pass over the tasks that still have not been
/// reported complete. There is no per-task deadline and no background timer:
/// every transition happens lazily inside [`Job::produce_batch_at`].
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub resource_id: String,
    pub size: usize,
    pub submitted_at: DateTime<Utc>,
    delivered: Bitmap,
    completed: Bitmap,
    cursor: usize,
    last_delivery: Option<Instant>,
    iteration: u64,
    finished: bool,
    pub(crate) redelivery_grace: Duration,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            delivered: Bitmap::new(spec.size),
            completed: Bitmap::new(spec.size),
            id: spec.id,
            name: spec.name,
            owner: spec.owner,
            resource_id: spec.resource_id,
            size: spec.size,
            submitted_at: Utc::now(),
            cursor: 0,
            last_delivery: None,
            iteration: 0,
            finished: false,
            redelivery_grace: DEFAULT_REDELIVERY_GRACE,
        }
    }

    pub fn with_redelivery_grace(mut self, grace: Duration) -> Self {
        self.redelivery_grace = grace;
        self
    }

    /// Get up to `max` undelivered tasks from this job.
    pub fn produce_batch(&mut self, max: usize) -> Vec<usize> {
        self.produce_batch_at(max, Instant::now())
    }

    /// Same as [`Job::produce_batch`], evaluated as if the current time were `now`.
    pub fn produce_batch_at(&mut self, max: usize, now: Instant) -> Vec<usize> {
        if self.finished {
            return Vec::new();
        }

        // every task has been offered once this pass, check for redelivery
        if self.cursor == self.size {
            if self.within_grace(now) {
                return Vec::new();
            }
            if !self.mark_tasks_for_redelivery() {
                self.finished = true;
                tracing::info!(job_id = %self.id, size = self.size, "Job finished");
                return Vec::new();
            }
        }

        let mut out = Vec::with_capacity(max.min(self.size - self.cursor));
        while out.len() < max && self.cursor < self.size {
            if !self.delivered.get(self.cursor) {
                self.delivered.set(self.cursor);
                out.push(self.cursor);
            }
            self.cursor += 1;
        }

        self.last_delivery = Some(now);
        out
    }

    /// Record a task as done. Out-of-range indices are logged and ignored.
    /// Returns whether the index was in range.
    pub fn complete(&mut self, task: i64) -> bool {
        match usize::try_from(task) {
            Ok(index) if index < self.size => {
                self.completed.set(index);
                true
            }
            _ => {
                tracing::warn!(
                    job_id = %self.id,
                    task,
                    size = self.size,
                    "Attempt to complete non-existent task"
                );
                false
            }
        }
    }

    /// Reset delivery state for every task not yet completed. Returns false
    /// when there is nothing left to redeliver.
    fn mark_tasks_for_redelivery(&mut self) -> bool {
        let n_complete = self.completed.count_ones();
        if n_complete == self.size {
            return false;
        }

        tracing::info!(
            job_id = %self.id,
            tasks = self.size - n_complete,
            iteration = self.iteration + 1,
            "Marking tasks for redelivery"
        );

        self.delivered.and_assign(&self.completed);
        self.cursor = 0;
        self.iteration += 1;
        true
    }

    fn within_grace(&self, now: Instant) -> bool {
        self.last_delivery
            .is_some_and(|last| now.saturating_duration_since(last) < self.redelivery_grace)
    }

    pub fn n_complete(&self) -> usize {
        self.completed.count_ones()
    }

    /// Tasks not yet handed out in the current pass.
    pub fn n_undelivered(&self) -> usize {
        self.size - self.delivered.count_ones()
    }

    pub fn n_remaining(&self) -> usize {
        self.size - self.n_complete()
    }

    pub fn is_delivered(&self, task: usize) -> bool {
        self.delivered.get(task)
    }

    pub fn is_completed(&self, task: usize) -> bool {
        self.completed.get(task)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn last_delivery(&self) -> Option<Instant> {
        self.last_delivery
    }

    pub fn phase(&self) -> JobPhase {
        if self.finished {
            JobPhase::Finished
        } else if self.cursor == self.size {
            JobPhase::AwaitingCompletion
        } else {
            JobPhase::Delivering
        }
    }
}
