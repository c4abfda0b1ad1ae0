use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::trigger::{Trigger, TriggerConfig};

/// What a job runs: a registered function name plus its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTarget {
    /// Key into the [`JobRegistry`](crate::registry::JobRegistry).
    pub func: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

/// A scheduled job and its live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string unless the caller supplied its own id.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    pub target: JobTarget,
    pub trigger: Trigger,
    /// Upper bound on concurrently running instances (>= 1).
    pub max_instances: u32,
    /// Seconds an occurrence may start late before it is skipped as misfired.
    pub misfire_grace_time: u64,
    /// `None` once the trigger is exhausted.
    pub next_run_time: Option<DateTime<Utc>>,
    pub running_instances: u32,
    /// Paused jobs keep `next_run_time` but are skipped by dispatch.
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Rendered trigger, e.g. `interval[0:01:00]`.
    pub fn trigger_description(&self) -> String {
        self.trigger.to_string()
    }
}

/// Request to create a job. Omitted limits take the scheduler defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub func: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub max_instances: Option<u32>,
    #[serde(default)]
    pub misfire_grace_time: Option<u64>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, func: impl Into<String>, trigger: TriggerConfig) -> Self {
        Self {
            id: None,
            name: name.into(),
            func: func.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            trigger,
            max_instances: None,
            misfire_grace_time: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn with_max_instances(mut self, max: u32) -> Self {
        self.max_instances = Some(max);
        self
    }

    pub fn with_misfire_grace_time(mut self, secs: u64) -> Self {
        self.misfire_grace_time = Some(secs);
        self
    }
}

/// Partial update applied by `modify_job`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub trigger: Option<TriggerConfig>,
    pub args: Option<Vec<Value>>,
    pub kwargs: Option<Map<String, Value>>,
    pub max_instances: Option<u32>,
    pub misfire_grace_time: Option<u64>,
}

/// Why an occurrence was coalesced instead of run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalesceReason {
    /// The job already had `max_instances` running.
    MaxInstances,
    /// No worker freed up within the submit bound.
    PoolSaturated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { value: Value },
    Failure { error: String, trace: Option<String> },
    /// Skipped because it became due too late relative to the grace period.
    Missed { late_by_secs: f64 },
    Coalesced { reason: CoalesceReason },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }

    /// True for occurrences that never reached the executor.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Missed { .. } | Outcome::Coalesced { .. })
    }
}

/// One occurrence of a job: executed, failed, or skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub job_id: String,
    pub job_name: String,
    /// The fire time the trigger produced (or the request time for `fire_now`).
    pub scheduled_time: DateTime<Utc>,
    /// When the body started; for skipped occurrences, when the skip was decided.
    pub execution_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub outcome: Outcome,
}

impl ExecutionEvent {
    pub(crate) fn skipped(
        job_id: &str,
        job_name: &str,
        scheduled_time: DateTime<Utc>,
        outcome: Outcome,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            scheduled_time,
            execution_time: Utc::now(),
            duration_secs: 0.0,
            outcome,
        }
    }
}

/// Emitted when a job's trigger can no longer be evaluated; the job has
/// already been removed from the schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerErrorEvent {
    pub job_id: String,
    pub job_name: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Lifecycle of the coordinator loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
    /// Accepting mutations, not dispatching.
    Paused,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Running => "running",
            SchedulerState::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Stop dispatching and return at once; in-flight runs finish in the background.
    Immediate,
    /// Stop dispatching and wait until every in-flight run has reported.
    Drain,
}

/// Snapshot returned by `Scheduler::status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub state: SchedulerState,
    pub job_count: usize,
    /// Earliest `next_run_time` over non-paused jobs while dispatching.
    pub next_wakeup: Option<DateTime<Utc>>,
    pub worker_count: usize,
    pub in_flight: usize,
}
