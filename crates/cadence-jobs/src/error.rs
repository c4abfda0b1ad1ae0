//! Error types for the cadence-jobs crate.

use cadence_scheduler::JobError;
use thiserror::Error;

/// Ways a shell command job can fail before or while running.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Rejected by the denylist before anything was spawned.
    #[error("command blocked: {reason}")]
    Blocked { reason: String },

    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error while collecting output: {0}")]
    Io(#[from] std::io::Error),

    /// The child outlived its budget and was killed.
    #[error("command timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The command ran but exited non-zero; stderr is kept for the trace.
    #[error("command exited with status {code}")]
    NonZeroExit { code: i32, stderr: String },
}

impl From<CommandError> for JobError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::NonZeroExit { ref stderr, .. } if !stderr.is_empty() => {
                let trace = stderr.clone();
                JobError::new(e.to_string()).with_trace(trace)
            }
            other => JobError::new(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
