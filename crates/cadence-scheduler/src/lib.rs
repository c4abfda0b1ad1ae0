//! `cadence-scheduler` — in-process job scheduling engine on Tokio.
//!
//! # Overview
//!
//! Jobs live in an in-memory [`store::JobStore`]. A single coordinator task
//! owned by [`engine::Scheduler`] sleeps until the earliest `next_run_time`,
//! decides each due occurrence (dispatch, misfire, or coalesce), hands
//! dispatched runs to a bounded [`executor::ExecutorPool`], and publishes every
//! outcome on the [`events::EventBus`]. A [`events::ResultLog`] subscriber keeps
//! the last 50 events per job.
//!
//! # Trigger variants
//!
//! | Variant    | Behaviour                                                  |
//! |------------|------------------------------------------------------------|
//! | `Date`     | Single fire at an absolute UTC instant                     |
//! | `Interval` | `start + k·period`, bounded by an optional end             |
//! | `Cron`     | Second/minute/hour/day/month/day_of_week fields in a zone  |
//!
//! # Per-occurrence decisions
//!
//! | Decision   | When                                              | Recorded as  |
//! |------------|---------------------------------------------------|--------------|
//! | Missed     | later than `misfire_grace_time` seconds           | `Missed`     |
//! | Coalesced  | `max_instances` already running, or pool saturated| `Coalesced`  |
//! | Dispatched | otherwise                                         | `Success` / `Failure` |

pub mod cron;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod registry;
pub mod store;
pub mod trigger;
pub mod types;

pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use events::{EventBus, EventListener, ResultLog, RESULT_HISTORY_LIMIT};
pub use registry::{job_fn, FunctionInfo, JobCall, JobError, JobFunction, JobRegistry};
pub use trigger::{CronConfig, CronValue, DateConfig, IntervalConfig, Trigger, TriggerConfig};
pub use types::{
    CoalesceReason, ExecutionEvent, Job, JobSpec, JobTarget, JobUpdate, Outcome, SchedulerState,
    SchedulerStatus, ShutdownMode, TriggerErrorEvent,
};
