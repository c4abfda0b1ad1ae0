use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// Only configuration and lookup problems surface here. Job-body failures,
/// misfires and coalesced occurrences are recorded as execution events instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The provided trigger definition is invalid or cannot be evaluated.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// The job references a function that is not in the registry.
    #[error("Unknown job function: {name}")]
    UnknownFunction { name: String },

    #[error("Job already exists: {id}")]
    DuplicateJob { id: String },

    /// Job limits or fields failed validation.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// `fire_now` refused because every instance slot is taken.
    #[error("Job {id} already has {max} running instance(s)")]
    MaxInstancesReached { id: String, max: u32 },

    /// No worker became free within the submit bound.
    #[error("Executor pool saturated, job {id} not dispatched")]
    PoolSaturated { id: String },

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// A previous shutdown is still draining in-flight work.
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SchedulerError {
    /// Short error code string for the management layer.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::JobNotFound { .. } => "NOT_FOUND",
            SchedulerError::InvalidTrigger(_) => "INVALID_TRIGGER",
            SchedulerError::UnknownFunction { .. } => "UNKNOWN_FUNCTION",
            SchedulerError::DuplicateJob { .. } => "DUPLICATE_JOB",
            SchedulerError::InvalidJob(_) => "INVALID_JOB",
            SchedulerError::MaxInstancesReached { .. } => "MAX_INSTANCES",
            SchedulerError::PoolSaturated { .. } => "POOL_SATURATED",
            SchedulerError::NotRunning => "NOT_RUNNING",
            SchedulerError::AlreadyRunning => "ALREADY_RUNNING",
            SchedulerError::ShuttingDown => "SHUTTING_DOWN",
            SchedulerError::Config(_) => "CONFIG_INVALID",
        }
    }
}

impl From<cadence_core::CoreError> for SchedulerError {
    fn from(e: cadence_core::CoreError) -> Self {
        SchedulerError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
