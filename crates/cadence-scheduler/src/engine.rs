use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::SchedulerSettings;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, SchedulerError},
    events::{EventBus, EventListener, ResultLog},
    executor::{Completion, ExecutorPool, JobRun},
    registry::{FunctionInfo, JobCall, JobRegistry},
    store::JobStore,
    types::{
        CoalesceReason, ExecutionEvent, Job, JobSpec, JobTarget, JobUpdate, Outcome,
        SchedulerState, SchedulerStatus, ShutdownMode, TriggerErrorEvent,
    },
};

/// Longest the coordinator sleeps without re-reading the clock, so wall-clock
/// jumps are noticed even with no jobs due.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(60);

/// Decision taken for one due occurrence inside a dispatch cycle.
enum Decision {
    Dispatch,
    Missed { late_by_secs: f64 },
    Coalesced,
}

struct Occurrence {
    job: Job,
    scheduled_time: DateTime<Utc>,
    decision: Decision,
}

/// The scheduling context: job store, worker pool, event bus and the
/// coordinator loop that ties them together.
///
/// Owned by the process entry point and shared as `Arc<Scheduler>`; there is
/// no global instance.
pub struct Scheduler {
    settings: SchedulerSettings,
    timezone: Tz,
    registry: Arc<JobRegistry>,
    store: JobStore,
    pool: ExecutorPool,
    bus: EventBus,
    results: Arc<ResultLog>,
    wakeup: Arc<Notify>,
    state: watch::Sender<SchedulerState>,
    /// Held by the coordinator while it runs, handed back when it exits.
    completions: Mutex<Option<mpsc::UnboundedReceiver<Completion>>>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings, registry: JobRegistry) -> Result<Arc<Self>> {
        settings.validate()?;
        let timezone = settings.tz()?;

        let wakeup = Arc::new(Notify::new());
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let pool = ExecutorPool::new(
            settings.worker_count,
            Duration::from_millis(settings.submit_timeout_ms),
            completions_tx,
        );

        let results = Arc::new(ResultLog::new());
        let bus = EventBus::new();
        bus.subscribe(results.clone());

        let (state, _) = watch::channel(SchedulerState::Stopped);

        Ok(Arc::new(Self {
            timezone,
            registry: Arc::new(registry),
            store: JobStore::new(Arc::clone(&wakeup)),
            pool,
            bus,
            results,
            wakeup,
            state,
            completions: Mutex::new(Some(completions_rx)),
            coordinator: Mutex::new(None),
            settings,
        }))
    }

    // --- lifecycle ---------------------------------------------------------

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Spawn the coordinator loop. `Stopped → Running`.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.state() != SchedulerState::Stopped {
            return Err(SchedulerError::AlreadyRunning);
        }
        let completions = self
            .completions
            .lock()
            .expect("completion slot poisoned")
            .take()
            .ok_or(SchedulerError::ShuttingDown)?;

        self.pool.reopen();
        self.state.send_replace(SchedulerState::Running);

        let this = Arc::clone(self);
        let state_rx = self.state.subscribe();
        let handle = tokio::spawn(async move { this.run(completions, state_rx).await });
        *self.coordinator.lock().expect("coordinator slot poisoned") = Some(handle);

        info!(
            workers = self.settings.worker_count,
            timezone = %self.timezone,
            "scheduler started"
        );
        Ok(())
    }

    /// Suspend dispatch. Mutations and in-flight runs continue. Idempotent.
    pub fn pause(&self) -> Result<()> {
        match self.state() {
            SchedulerState::Stopped => Err(SchedulerError::NotRunning),
            SchedulerState::Paused => Ok(()),
            SchedulerState::Running => {
                self.state.send_replace(SchedulerState::Paused);
                info!("scheduler paused");
                Ok(())
            }
        }
    }

    /// Resume dispatch. Occurrences that fell due while paused go through
    /// the normal misfire check. Idempotent.
    pub fn resume(&self) -> Result<()> {
        match self.state() {
            SchedulerState::Stopped => Err(SchedulerError::NotRunning),
            SchedulerState::Running => Ok(()),
            SchedulerState::Paused => {
                self.state.send_replace(SchedulerState::Running);
                info!("scheduler resumed");
                Ok(())
            }
        }
    }

    /// Stop dispatching. With [`ShutdownMode::Drain`] this waits until every
    /// in-flight run has completed and been recorded.
    pub async fn shutdown(&self, mode: ShutdownMode) -> Result<()> {
        if self.state() == SchedulerState::Stopped {
            return Err(SchedulerError::NotRunning);
        }
        self.state.send_replace(SchedulerState::Stopped);
        let handle = self
            .coordinator
            .lock()
            .expect("coordinator slot poisoned")
            .take();
        info!(?mode, in_flight = self.pool.in_flight(), "scheduler shutting down");

        if let (ShutdownMode::Drain, Some(handle)) = (mode, handle) {
            if let Err(e) = handle.await {
                error!("coordinator task failed: {e}");
            }
        }
        Ok(())
    }

    // --- job management ----------------------------------------------------

    /// Validate `spec`, compute its first fire time, and store it.
    pub fn add_job(&self, spec: JobSpec) -> Result<Job> {
        if !self.registry.contains(&spec.func) {
            return Err(SchedulerError::UnknownFunction { name: spec.func });
        }
        let max_instances = spec
            .max_instances
            .unwrap_or(self.settings.default_max_instances);
        if max_instances == 0 {
            return Err(SchedulerError::InvalidJob(
                "max_instances must be at least 1".to_string(),
            ));
        }
        let id = match spec.id {
            Some(id) if id.trim().is_empty() => {
                return Err(SchedulerError::InvalidJob("job id must not be blank".to_string()))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        let now = Utc::now();
        let trigger = spec.trigger.build(now, self.timezone)?;
        let next_run_time = trigger.next_fire(now)?;

        let job = Job {
            id,
            name: spec.name,
            target: JobTarget {
                func: spec.func,
                args: spec.args,
                kwargs: spec.kwargs,
            },
            trigger,
            max_instances,
            misfire_grace_time: spec
                .misfire_grace_time
                .unwrap_or(self.settings.default_misfire_grace_time),
            next_run_time,
            running_instances: 0,
            paused: false,
            created_at: now,
        };
        self.store.add(job.clone())?;

        info!(
            job_id = %job.id,
            job = %job.name,
            trigger = %job.trigger,
            next_run = ?job.next_run_time,
            "job added"
        );
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.store.get(id)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.store.list()
    }

    /// Apply a partial update. A new trigger reschedules from now.
    pub fn modify_job(&self, id: &str, update: JobUpdate) -> Result<Job> {
        if update.max_instances == Some(0) {
            return Err(SchedulerError::InvalidJob(
                "max_instances must be at least 1".to_string(),
            ));
        }
        let now = Utc::now();
        let rescheduled = match &update.trigger {
            Some(config) => {
                let trigger = config.build(now, self.timezone)?;
                let next = trigger.next_fire(now)?;
                Some((trigger, next))
            }
            None => None,
        };

        let job = self.store.modify(id, move |job| {
            if let Some(max) = update.max_instances {
                if max < job.running_instances {
                    return Err(SchedulerError::InvalidJob(format!(
                        "max_instances {max} is below the {} instance(s) currently running",
                        job.running_instances
                    )));
                }
                job.max_instances = max;
            }
            if let Some(name) = update.name {
                job.name = name;
            }
            if let Some(args) = update.args {
                job.target.args = args;
            }
            if let Some(kwargs) = update.kwargs {
                job.target.kwargs = kwargs;
            }
            if let Some(grace) = update.misfire_grace_time {
                job.misfire_grace_time = grace;
            }
            if let Some((trigger, next)) = rescheduled {
                job.trigger = trigger;
                job.next_run_time = next;
            }
            Ok(())
        })?;

        info!(job_id = %id, next_run = ?job.next_run_time, "job modified");
        Ok(job)
    }

    /// Unschedule a job and drop its retained history. Runs already in flight
    /// still finish and record their event.
    pub fn remove_job(&self, id: &str) -> Result<()> {
        if !self.store.remove(id) {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        self.results.clear(id);
        Ok(())
    }

    pub fn pause_job(&self, id: &str) -> Result<()> {
        self.store.pause(id)
    }

    pub fn resume_job(&self, id: &str) -> Result<()> {
        self.store.resume(id)
    }

    /// Run a job immediately, ignoring its trigger and misfire window but
    /// still honouring `max_instances`.
    ///
    /// The handle resolves to the execution event once the body finishes; the
    /// event is recorded in the result log either way.
    pub async fn fire_now(&self, id: &str) -> Result<JoinHandle<ExecutionEvent>> {
        if self.state() == SchedulerState::Stopped {
            return Err(SchedulerError::NotRunning);
        }
        let job = self.store.acquire_instance(id)?;
        let run = match self.job_run(&job, Utc::now()) {
            Ok(run) => run,
            Err(e) => {
                self.store.release_instance(id, job.created_at);
                return Err(e);
            }
        };
        info!(job_id = %id, job = %job.name, "job fired manually");
        self.pool.submit(run).await.inspect_err(|_| {
            self.store.release_instance(id, job.created_at);
        })
    }

    // --- queries -----------------------------------------------------------

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state();
        SchedulerStatus {
            running: state != SchedulerState::Stopped,
            state,
            job_count: self.store.len(),
            next_wakeup: match state {
                SchedulerState::Running => self.store.next_wakeup(),
                _ => None,
            },
            worker_count: self.pool.worker_count(),
            in_flight: self.pool.in_flight(),
        }
    }

    /// Retained history for `job_id`, oldest first. Unknown ids yield an empty list.
    pub fn get_results(&self, job_id: &str) -> Vec<ExecutionEvent> {
        self.results.get(job_id)
    }

    pub fn functions(&self) -> Vec<FunctionInfo> {
        self.registry.list()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.bus.subscribe(listener);
    }

    // --- coordinator -------------------------------------------------------

    async fn run(
        self: Arc<Self>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut state: watch::Receiver<SchedulerState>,
    ) {
        debug!("coordinator loop started");
        loop {
            let current = *state.borrow_and_update();
            let wait = match current {
                SchedulerState::Stopped => break,
                SchedulerState::Paused => MAX_IDLE_WAIT,
                SchedulerState::Running => match self.process_due_jobs().await {
                    Some(deadline) => (deadline - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .min(MAX_IDLE_WAIT),
                    None => MAX_IDLE_WAIT,
                },
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.wakeup.notified() => debug!("woken by job store change"),
                Some(event) = completions.recv() => self.complete(event),
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        // Stopped: no new dispatch, but every in-flight run still gets recorded.
        let idle = self.pool.wait_idle();
        tokio::pin!(idle);
        loop {
            tokio::select! {
                Some(event) = completions.recv() => self.complete(event),
                _ = &mut idle => break,
            }
        }
        while let Ok(event) = completions.try_recv() {
            self.complete(event);
        }

        *self.completions.lock().expect("completion slot poisoned") = Some(completions);
        info!("scheduler stopped");
    }

    /// Evaluate every due job once and return the next wakeup.
    async fn process_due_jobs(&self) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let mut due = Vec::new();
        let mut broken = Vec::new();

        self.store.with_jobs(|jobs| {
            for job in jobs.values_mut() {
                if job.paused {
                    continue;
                }
                let Some(scheduled_time) = job.next_run_time else {
                    continue;
                };
                if scheduled_time > now {
                    continue;
                }

                let late = now - scheduled_time;
                let (decision, advance_from) =
                    if misfired(late, job.misfire_grace_time) {
                        // Re-anchor on `now` so a long outage doesn't replay every missed slot.
                        let late_by_secs = late.num_milliseconds() as f64 / 1000.0;
                        (Decision::Missed { late_by_secs }, now)
                    } else if job.running_instances >= job.max_instances {
                        (Decision::Coalesced, scheduled_time)
                    } else {
                        job.running_instances += 1;
                        (Decision::Dispatch, scheduled_time)
                    };

                match job.trigger.next_fire(advance_from) {
                    Ok(next) => job.next_run_time = next,
                    Err(e) => {
                        job.next_run_time = None;
                        broken.push(TriggerErrorEvent {
                            job_id: job.id.clone(),
                            job_name: job.name.clone(),
                            error: e.to_string(),
                            at: now,
                        });
                    }
                }

                due.push(Occurrence {
                    job: job.clone(),
                    scheduled_time,
                    decision,
                });
            }
            for event in &broken {
                jobs.remove(&event.job_id);
            }
        });

        for event in &broken {
            error!(job_id = %event.job_id, job = %event.job_name, error = %event.error, "trigger failed, job unscheduled");
            self.bus.publish_trigger_error(event);
        }

        for occurrence in due {
            let Occurrence {
                job,
                scheduled_time,
                decision,
            } = occurrence;
            match decision {
                Decision::Dispatch => self.dispatch(&job, scheduled_time).await,
                Decision::Missed { late_by_secs } => {
                    warn!(
                        job_id = %job.id,
                        job = %job.name,
                        scheduled = %scheduled_time,
                        late_by_secs,
                        "run misfired, skipped"
                    );
                    self.bus.publish(&ExecutionEvent::skipped(
                        &job.id,
                        &job.name,
                        scheduled_time,
                        Outcome::Missed { late_by_secs },
                    ));
                }
                Decision::Coalesced => {
                    warn!(
                        job_id = %job.id,
                        job = %job.name,
                        max_instances = job.max_instances,
                        "maximum running instances reached, run coalesced"
                    );
                    self.bus.publish(&ExecutionEvent::skipped(
                        &job.id,
                        &job.name,
                        scheduled_time,
                        Outcome::Coalesced {
                            reason: CoalesceReason::MaxInstances,
                        },
                    ));
                }
            }
        }

        self.store.next_wakeup()
    }

    /// Hand one occurrence to the pool. The instance slot was already claimed.
    async fn dispatch(&self, job: &Job, scheduled_time: DateTime<Utc>) {
        let run = match self.job_run(job, scheduled_time) {
            Ok(run) => run,
            Err(e) => {
                self.store.release_instance(&job.id, job.created_at);
                self.bus.publish(&ExecutionEvent::skipped(
                    &job.id,
                    &job.name,
                    scheduled_time,
                    Outcome::Failure {
                        error: e.to_string(),
                        trace: None,
                    },
                ));
                return;
            }
        };

        debug!(job_id = %job.id, job = %job.name, scheduled = %scheduled_time, "dispatching job");
        if let Err(e) = self.pool.submit(run).await {
            self.store.release_instance(&job.id, job.created_at);
            warn!(job_id = %job.id, job = %job.name, "{e}; run coalesced");
            self.bus.publish(&ExecutionEvent::skipped(
                &job.id,
                &job.name,
                scheduled_time,
                Outcome::Coalesced {
                    reason: CoalesceReason::PoolSaturated,
                },
            ));
        }
    }

    fn job_run(&self, job: &Job, scheduled_time: DateTime<Utc>) -> Result<JobRun> {
        let function = self
            .registry
            .get(&job.target.func)
            .ok_or_else(|| SchedulerError::UnknownFunction {
                name: job.target.func.clone(),
            })?;
        Ok(JobRun {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            job_created_at: job.created_at,
            scheduled_time,
            function,
            call: JobCall {
                job_id: job.id.clone(),
                job_name: job.name.clone(),
                args: job.target.args.clone(),
                kwargs: job.target.kwargs.clone(),
            },
        })
    }

    /// Record a finished run: free its instance slot, then publish.
    fn complete(&self, completion: Completion) {
        let Completion {
            event,
            job_created_at,
        } = completion;
        self.store.release_instance(&event.job_id, job_created_at);
        match &event.outcome {
            Outcome::Failure { error, .. } => {
                warn!(job_id = %event.job_id, job = %event.job_name, error = %error, "job failed")
            }
            _ => debug!(
                job_id = %event.job_id,
                job = %event.job_name,
                duration_secs = event.duration_secs,
                "job completed"
            ),
        }
        self.bus.publish(&event);
    }
}

/// Whether an occurrence `late` behind schedule is past its grace window.
/// A grace too large to represent never expires.
fn misfired(late: chrono::Duration, grace_secs: u64) -> bool {
    match i64::try_from(grace_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
    {
        Some(grace) => late > grace,
        None => false,
    }
}
