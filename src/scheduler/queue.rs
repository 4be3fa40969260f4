use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::{BrokerError, Result};
use crate::scheduler::job::{Job, DEFAULT_REDELIVERY_GRACE};
use crate::scheduler::status::{JobStatusInfo, QueueStatus};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Enqueue sequence number. The primary store is keyed by it, so iterating
/// the store visits jobs in submission order.
type JobHandle = u64;

/// Tasks handed to a polling worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub job_id: String,
    pub tasks: Vec<usize>,
}

/// Owns every live job and picks which one the next batch comes from.
///
/// Each owner with unfinished work holds one unit of lottery weight, split
/// evenly across that owner's unfinished jobs, so submitting many jobs does
/// not buy a larger share. When a worker names resources it already has
/// loaded, jobs on those resources share a bonus equal to the unboosted
/// total, which roughly doubles their odds without making them certain.
#[derive(Debug)]
pub struct JobQueue {
    jobs: BTreeMap<JobHandle, Job>,
    by_id: HashMap<String, JobHandle>,
    by_owner: HashMap<String, Vec<JobHandle>>,
    by_resource: HashMap<String, Vec<JobHandle>>,
    next_handle: JobHandle,
    max_jobs: usize,
    redelivery_grace: Duration,
    rng: StdRng,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: BTreeMap::new(),
            by_id: HashMap::new(),
            by_owner: HashMap::new(),
            by_resource: HashMap::new(),
            next_handle: 0,
            max_jobs,
            redelivery_grace: DEFAULT_REDELIVERY_GRACE,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed the lottery so draws are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Grace window applied to every job enqueued from now on.
    pub fn with_redelivery_grace(mut self, grace: Duration) -> Self {
        self.redelivery_grace = grace;
        self
    }

    /// Register a new job. Fails without touching the queue if the id is
    /// already taken, the submission is malformed, or the queue is full.
    pub fn enqueue(&mut self, job: Job) -> Result<&Job> {
        if job.id.is_empty() {
            return Err(BrokerError::InvalidJob("job id must not be empty".to_string()));
        }
        if job.owner.is_empty() {
            return Err(BrokerError::InvalidJob("owner must not be empty".to_string()));
        }
        if self.by_id.contains_key(&job.id) {
            return Err(BrokerError::DuplicateJob(job.id));
        }
        if self.is_full() {
            return Err(BrokerError::QueueFull(self.max_jobs));
        }

        let handle = self.next_handle;
        self.next_handle += 1;

        let job = job.with_redelivery_grace(self.redelivery_grace);
        tracing::info!(
            job_id = %job.id,
            owner = %job.owner,
            resource_id = %job.resource_id,
            size = job.size,
            "Job enqueued"
        );

        self.by_id.insert(job.id.clone(), handle);
        self.by_owner
            .entry(job.owner.clone())
            .or_default()
            .push(handle);
        self.by_resource
            .entry(job.resource_id.clone())
            .or_default()
            .push(handle);
        Ok(&*self.jobs.entry(handle).or_insert(job))
    }

    /// Pick a job by lottery and take up to `max` tasks from it.
    ///
    /// Returns `Ok(None)` when no unfinished job exists. A returned batch may
    /// carry no tasks if the chosen job is waiting out its grace window.
    pub fn select_batch(
        &mut self,
        preferred_resource_ids: &[String],
        max: usize,
    ) -> Result<Option<Batch>> {
        self.select_batch_at(preferred_resource_ids, max, Instant::now())
    }

    pub fn select_batch_at(
        &mut self,
        preferred_resource_ids: &[String],
        max: usize,
        now: Instant,
    ) -> Result<Option<Batch>> {
        let Some(handle) = self.draw_handle(preferred_resource_ids)? else {
            return Ok(None);
        };
        let job = self
            .jobs
            .get_mut(&handle)
            .ok_or_else(|| {
                BrokerError::IndexInconsistent(format!("lottery drew unknown handle {}", handle))
            })?;

        let tasks = job.produce_batch_at(max, now);
        tracing::debug!(job_id = %job.id, tasks = tasks.len(), "Batch selected");
        Ok(Some(Batch {
            job_id: job.id.clone(),
            tasks,
        }))
    }

    /// Run the lottery without delivering anything. Returns the winning job id.
    pub fn draw(&mut self, preferred_resource_ids: &[String]) -> Result<Option<String>> {
        Ok(self
            .draw_handle(preferred_resource_ids)?
            .and_then(|handle| self.jobs.get(&handle))
            .map(|job| job.id.clone()))
    }

    fn draw_handle(&mut self, preferred_resource_ids: &[String]) -> Result<Option<JobHandle>> {
        let weights = self.lottery_weights(preferred_resource_ids);
        if weights.is_empty() {
            return Ok(None);
        }

        // summed in walk order so the final cumulative weight equals the total exactly
        let total_weight: f64 = weights.iter().map(|(_, w)| w).sum();
        let draw = self.rng.gen_range(0.0..total_weight);

        let mut cumulative = 0.0_f64;
        for (handle, weight) in &weights {
            cumulative += *weight;
            if cumulative > draw {
                return Ok(Some(*handle));
            }
        }

        tracing::error!(total_weight, draw, "Lottery failed to select a job");
        Err(BrokerError::SelectionInvariant { total_weight, draw })
    }

    /// Weight of every unfinished job, in enqueue order.
    fn lottery_weights(&self, preferred_resource_ids: &[String]) -> Vec<(JobHandle, f64)> {
        let unfinished =
            |handle: &&JobHandle| self.jobs.get(*handle).is_some_and(|job| !job.is_finished());

        let owner_jobs: HashMap<&str, usize> = self
            .by_owner
            .iter()
            .map(|(owner, handles)| (owner.as_str(), handles.iter().filter(unfinished).count()))
            .filter(|(_, k)| *k > 0)
            .collect();
        if owner_jobs.is_empty() {
            return Vec::new();
        }
        let base_total = owner_jobs.len() as f64;

        let preferred: HashSet<JobHandle> = preferred_resource_ids
            .iter()
            .filter_map(|resource| self.by_resource.get(resource))
            .flatten()
            .filter(unfinished)
            .copied()
            .collect();
        let bonus = if preferred.is_empty() {
            0.0
        } else {
            base_total / preferred.len() as f64
        };

        self.jobs
            .iter()
            .filter(|(_, job)| !job.is_finished())
            .map(|(handle, job)| {
                let mut weight = 1.0 / owner_jobs[job.owner.as_str()] as f64;
                if preferred.contains(handle) {
                    weight += bonus;
                }
                (*handle, weight)
            })
            .collect()
    }

    /// Record a completed task on the named job. Returns false if the task
    /// index was out of range for that job.
    pub fn complete(&mut self, job_id: &str, task: i64) -> Result<bool> {
        let job = self
            .get_job_mut(job_id)
            .ok_or_else(|| BrokerError::JobNotFound(job_id.to_string()))?;
        Ok(job.complete(task))
    }

    /// Get a job by ID
    pub fn get_job(&self, id: &str) -> Option<&Job> {
        self.by_id.get(id).and_then(|handle| self.jobs.get(handle))
    }

    pub fn get_job_mut(&mut self, id: &str) -> Option<&mut Job> {
        let handle = self.by_id.get(id)?;
        self.jobs.get_mut(handle)
    }

    pub fn jobs_for_owner(&self, owner: &str) -> Vec<&Job> {
        self.resolve(self.by_owner.get(owner))
    }

    pub fn jobs_for_resource(&self, resource_id: &str) -> Vec<&Job> {
        self.resolve(self.by_resource.get(resource_id))
    }

    fn resolve(&self, handles: Option<&Vec<JobHandle>>) -> Vec<&Job> {
        handles
            .into_iter()
            .flatten()
            .filter_map(|handle| self.jobs.get(handle))
            .collect()
    }

    /// Snapshot of outstanding work. Per-job detail only when `verbose`.
    pub fn status(&self, verbose: bool) -> QueueStatus {
        self.status_at(verbose, Instant::now())
    }

    pub fn status_at(&self, verbose: bool, now: Instant) -> QueueStatus {
        let remaining_tasks = self.jobs.values().map(Job::n_remaining).sum();
        let jobs = verbose.then(|| {
            self.jobs
                .values()
                .map(|job| JobStatusInfo::from_job(job, now))
                .collect()
        });
        QueueStatus {
            remaining_tasks,
            jobs,
        }
    }

    /// Returns the current number of jobs in the queue
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs that have not yet been marked finished.
    pub fn active_len(&self) -> usize {
        self.jobs.values().filter(|job| !job.is_finished()).count()
    }

    /// Finished jobs stay indexed but do not hold a slot.
    pub fn is_full(&self) -> bool {
        self.active_len() >= self.max_jobs
    }
}
