use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::{
    error::{Result, SchedulerError},
    types::Job,
};

/// In-memory job table. The single source of truth for job state.
///
/// Every mutation of `running_instances` and `next_run_time` happens under
/// the one mutex. Mutations that can move the nearest wakeup earlier
/// (add/modify/resume) poke the coordinator through `wakeup`.
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
    wakeup: Arc<Notify>,
}

impl JobStore {
    pub fn new(wakeup: Arc<Notify>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            wakeup,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().expect("job store poisoned")
    }

    pub fn add(&self, job: Job) -> Result<String> {
        let id = job.id.clone();
        {
            let mut jobs = self.lock();
            if jobs.contains_key(&id) {
                return Err(SchedulerError::DuplicateJob { id });
            }
            jobs.insert(id.clone(), job);
        }
        self.wakeup.notify_one();
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    /// Snapshot of all jobs ordered by creation time.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `false` when no such job exists. In-flight runs are unaffected.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            info!(job_id = %id, "job removed from store");
        }
        removed
    }

    /// Apply `update` atomically. On error the stored job is left untouched.
    pub fn modify<F>(&self, id: &str, update: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let updated = {
            let mut jobs = self.lock();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
            let mut draft = job.clone();
            update(&mut draft)?;
            *job = draft.clone();
            draft
        };
        self.wakeup.notify_one();
        Ok(updated)
    }

    /// Idempotent: pausing a paused job is a no-op.
    pub fn pause(&self, id: &str) -> Result<()> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        if !job.paused {
            job.paused = true;
            info!(job_id = %id, "job paused");
        }
        Ok(())
    }

    /// Idempotent: resuming a job that was never paused is a no-op.
    pub fn resume(&self, id: &str) -> Result<()> {
        {
            let mut jobs = self.lock();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
            if !job.paused {
                return Ok(());
            }
            job.paused = false;
            info!(job_id = %id, "job resumed");
        }
        self.wakeup.notify_one();
        Ok(())
    }

    /// Claim one instance slot for a manual run, bypassing trigger and misfire checks.
    pub fn acquire_instance(&self, id: &str) -> Result<Job> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        if job.running_instances >= job.max_instances {
            return Err(SchedulerError::MaxInstancesReached {
                id: id.to_string(),
                max: job.max_instances,
            });
        }
        job.running_instances += 1;
        Ok(job.clone())
    }

    /// Give back an instance slot claimed by the job created at `created_at`.
    ///
    /// Returns `false` if that job has since been removed, including when a
    /// new job now holds the same id.
    pub fn release_instance(&self, id: &str, created_at: DateTime<Utc>) -> bool {
        match self.lock().get_mut(id) {
            Some(job) if job.created_at == created_at => {
                job.running_instances = job.running_instances.saturating_sub(1);
                true
            }
            _ => {
                debug!(job_id = %id, "instance finished for a job no longer in the store");
                false
            }
        }
    }

    /// Earliest `next_run_time` across jobs that are not paused.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.lock()
            .values()
            .filter(|j| !j.paused)
            .filter_map(|j| j.next_run_time)
            .min()
    }

    /// Run `f` with exclusive access to the table for one dispatch cycle.
    pub(crate) fn with_jobs<R>(&self, f: impl FnOnce(&mut HashMap<String, Job>) -> R) -> R {
        f(&mut self.lock())
    }
}
