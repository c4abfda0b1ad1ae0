//! `cadence-jobs` — the stock job functions shipped with the daemon.
//!
//! | Name              | Arguments                                   |
//! |-------------------|---------------------------------------------|
//! | `sample_job`      | `message`                                   |
//! | `send_email`      | `recipient`, `subject`, `body`              |
//! | `backup_database` | `database_name`                             |
//! | `process_data`    | `records_count`                             |
//! | `run_command`     | `command`, `timeout_secs`, `max_output_chars` |

pub mod builtins;
pub mod command;
pub mod error;
pub mod safety;

use cadence_scheduler::JobRegistry;

pub use command::{CommandOptions, CommandOutput, RunCommand};
pub use error::CommandError;

/// Register every stock function into `registry`.
pub fn register_builtins(registry: &mut JobRegistry) {
    builtins::register(registry);
    registry.register("run_command", RunCommand);
}

/// A registry holding only the stock functions.
pub fn default_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    register_builtins(&mut registry);
    registry
}
