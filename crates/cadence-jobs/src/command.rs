//! `run_command`: a shell command as a scheduled job.
//!
//! The command goes through [`safety::check`](crate::safety::check), then runs
//! under `sh -c` with piped output. A timeout (clamped to
//! [`MAX_TIMEOUT_SECS`]) bounds the run; on expiry the child is killed when its
//! handle drops. Output is ANSI-stripped and middle-truncated before it is put
//! in the job result.
//!
//! This does not isolate anything: the command runs with the daemon's
//! privileges and filesystem view.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use cadence_scheduler::{JobCall, JobError, JobFunction};
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{CommandError, Result};
use crate::safety;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 30_000;

#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub timeout_secs: u64,
    pub max_output_chars: usize,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

impl CommandOptions {
    fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.clamp(1, MAX_TIMEOUT_SECS)
    }
}

/// What a successful run reports back as the job's return value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Screen, spawn and wait for `command`.
///
/// A non-zero exit is an error so the job is recorded as a failure.
pub async fn run(command: &str, options: &CommandOptions) -> Result<CommandOutput> {
    safety::check(command)?;
    let secs = options.effective_timeout_secs();
    debug!(command, timeout_secs = secs, "spawning command");

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(CommandError::Spawn)?;

    let output = match tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            warn!(command, timeout_secs = secs, "command timed out, killed");
            return Err(CommandError::Timeout { secs });
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = clip(&plain_text(&output.stdout), options.max_output_chars);
    let stderr = clip(&plain_text(&output.stderr), options.max_output_chars);
    if !output.status.success() {
        return Err(CommandError::NonZeroExit {
            code: exit_code,
            stderr,
        });
    }
    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
    })
}

/// Registry entry for `run_command(command, timeout_secs=30, max_output_chars=30000)`.
pub struct RunCommand;

#[async_trait]
impl JobFunction for RunCommand {
    fn description(&self) -> &str {
        "Run a shell command with a denylist check, timeout and output truncation (not sandboxed)"
    }

    async fn call(&self, call: JobCall) -> std::result::Result<Value, JobError> {
        let command = call.string(0, "command")?;
        let options = CommandOptions {
            timeout_secs: call.u64_or(1, "timeout_secs", DEFAULT_TIMEOUT_SECS)?,
            max_output_chars: call.u64_or(2, "max_output_chars", DEFAULT_MAX_OUTPUT_CHARS as u64)?
                as usize,
        };
        info!(job_id = %call.job_id, "running command job");
        let output = run(&command, &options).await?;
        serde_json::to_value(output).map_err(|e| JobError::new(e.to_string()))
    }
}

fn plain_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(raw)).into_owned()
}

/// Keep the first and last `max_chars / 2` characters of `text`, replacing the
/// middle with a marker that says how much was dropped.
pub fn clip(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }
    let keep = max_chars / 2;
    let head_end = text.char_indices().nth(keep).map_or(text.len(), |(i, _)| i);
    let tail_start = text
        .char_indices()
        .nth(total - keep)
        .map_or(text.len(), |(i, _)| i);
    format!(
        "{}\n... [{} chars omitted] ...\n{}",
        &text[..head_end],
        total - 2 * keep,
        &text[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn call(kwargs: Value) -> JobCall {
        JobCall {
            job_id: "cmd".to_string(),
            job_name: "cmd".to_string(),
            args: Vec::new(),
            kwargs: kwargs.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    #[test]
    fn clip_keeps_short_text() {
        assert_eq!(clip("hello", 10), "hello");
        assert_eq!(clip("", 10), "");
    }

    #[test]
    fn clip_keeps_both_ends() {
        let text = format!("{}{}{}", "a".repeat(50), "b".repeat(100), "c".repeat(50));
        let out = clip(&text, 100);
        assert!(out.starts_with(&"a".repeat(50)));
        assert!(out.ends_with(&"c".repeat(50)));
        assert!(out.contains("[100 chars omitted]"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let text = "€".repeat(300);
        let out = clip(&text, 101);
        assert!(out.contains("[200 chars omitted]"));
        assert_eq!(out.chars().filter(|c| *c == '€').count(), 100);
    }

    #[test]
    fn timeout_is_clamped() {
        let long = CommandOptions {
            timeout_secs: 10_000,
            ..Default::default()
        };
        assert_eq!(long.effective_timeout_secs(), MAX_TIMEOUT_SECS);
        let zero = CommandOptions {
            timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(zero.effective_timeout_secs(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_strips_ansi() {
        let out = run("printf '\\033[31mred\\033[0m done'", &CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, "red done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_failure_with_stderr_trace() {
        let err = run("echo broken >&2; exit 3", &CommandOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NonZeroExit { code: 3, .. }));
        let job_err = JobError::from(err);
        assert_eq!(job_err.message, "command exited with status 3");
        assert_eq!(job_err.trace.as_deref(), Some("broken\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let options = CommandOptions {
            timeout_secs: 1,
            ..Default::default()
        };
        let started = std::time::Instant::now();
        let err = run("sleep 5", &options).await.unwrap_err();
        assert!(matches!(err, CommandError::Timeout { secs: 1 }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn blocked_command_never_spawns() {
        let err = RunCommand
            .call(call(json!({ "command": "sudo rm -rf /" })))
            .await
            .unwrap_err();
        assert!(err.message.starts_with("command blocked"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn job_returns_output_json() {
        let value = RunCommand
            .call(call(json!({ "command": "echo scheduled", "timeout_secs": 5 })))
            .await
            .unwrap();
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["stdout"], "scheduled\n");
    }

    #[tokio::test]
    async fn missing_command_argument_is_reported() {
        let err = RunCommand.call(call(json!({}))).await.unwrap_err();
        assert!(err.message.contains("missing required argument 'command'"));
    }
}
