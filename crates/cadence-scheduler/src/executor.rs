use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::{
    error::{Result, SchedulerError},
    registry::{JobCall, JobFunction},
    types::{ExecutionEvent, Outcome},
};

/// Everything a worker needs to run one occurrence.
pub struct JobRun {
    pub job_id: String,
    pub job_name: String,
    /// `created_at` of the job that claimed the instance slot.
    pub job_created_at: DateTime<Utc>,
    pub scheduled_time: DateTime<Utc>,
    pub function: Arc<dyn JobFunction>,
    pub call: JobCall,
}

/// A finished run, tagged with the job instance it belongs to.
#[derive(Debug, Clone)]
pub struct Completion {
    pub event: ExecutionEvent,
    pub job_created_at: DateTime<Utc>,
}

/// Bounded pool of job-body executions.
///
/// Capacity is a semaphore with `worker_count` permits; each run holds one
/// permit for its whole lifetime. Finished runs report on the completion
/// channel, which the coordinator drains.
pub struct ExecutorPool {
    permits: Arc<Semaphore>,
    worker_count: usize,
    submit_timeout: Duration,
    tracker: TaskTracker,
    completions: mpsc::UnboundedSender<Completion>,
}

impl ExecutorPool {
    pub fn new(
        worker_count: usize,
        submit_timeout: Duration,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            submit_timeout,
            tracker: TaskTracker::new(),
            completions,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Runs currently holding a worker.
    pub fn in_flight(&self) -> usize {
        self.worker_count - self.permits.available_permits()
    }

    /// Start `run` on a free worker.
    ///
    /// Waits at most `submit_timeout` for a worker; past that the caller gets
    /// `PoolSaturated` and nothing was started. The returned handle resolves
    /// to the same event that is sent on the completion channel.
    pub async fn submit(&self, run: JobRun) -> Result<JoinHandle<ExecutionEvent>> {
        let permit = match tokio::time::timeout(
            self.submit_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            _ => return Err(SchedulerError::PoolSaturated { id: run.job_id }),
        };

        let completions = self.completions.clone();
        Ok(self.tracker.spawn(async move {
            let _permit = permit;
            let JobRun {
                job_id,
                job_name,
                job_created_at,
                scheduled_time,
                function,
                call,
            } = run;

            debug!(job_id = %job_id, job = %job_name, "job started");
            let execution_time = Utc::now();
            let started = Instant::now();

            // The body runs on its own task so a panic surfaces as a JoinError
            // here instead of unwinding through the pool.
            let outcome = match tokio::spawn(async move { function.call(call).await }).await {
                Ok(Ok(value)) => Outcome::Success { value },
                Ok(Err(e)) => Outcome::Failure {
                    error: e.message,
                    trace: e.trace,
                },
                Err(join) => Outcome::Failure {
                    error: join_error_message(join),
                    trace: None,
                },
            };

            let event = ExecutionEvent {
                job_id,
                job_name,
                scheduled_time,
                execution_time,
                duration_secs: started.elapsed().as_secs_f64(),
                outcome,
            };
            let completion = Completion {
                event: event.clone(),
                job_created_at,
            };
            if completions.send(completion).is_err() {
                warn!(job_id = %event.job_id, "completion channel closed, event not recorded");
            }
            event
        }))
    }

    /// Resolve once every spawned run has finished. Runs started after this
    /// call are still waited for until the pool is reopened.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn reopen(&self) {
        self.tracker.reopen();
    }
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "job task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("job panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("job panicked: {s}")
    } else {
        "job panicked".to_string()
    }
}
