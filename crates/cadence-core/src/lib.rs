//! `cadence-core` — configuration and process-level errors shared by every
//! cadence crate.

pub mod config;
pub mod error;

pub use config::{CadenceConfig, SchedulerSettings};
pub use error::{CoreError, Result};
