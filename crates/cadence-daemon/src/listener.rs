use cadence_scheduler::{EventListener, ExecutionEvent, Outcome, TriggerErrorEvent};
use tracing::{error, info, warn};

/// Writes every scheduler event to the log.
pub struct LogListener;

impl EventListener for LogListener {
    fn on_success(&self, event: &ExecutionEvent) {
        let value = match &event.outcome {
            Outcome::Success { value } => value.to_string(),
            _ => String::new(),
        };
        info!(
            job_id = %event.job_id,
            job = %event.job_name,
            duration_secs = event.duration_secs,
            "job succeeded: {value}"
        );
    }

    fn on_failure(&self, event: &ExecutionEvent) {
        if let Outcome::Failure { error, trace } = &event.outcome {
            error!(
                job_id = %event.job_id,
                job = %event.job_name,
                trace = trace.as_deref().unwrap_or(""),
                "job failed: {error}"
            );
        }
    }

    fn on_skipped(&self, event: &ExecutionEvent) {
        warn!(
            job_id = %event.job_id,
            job = %event.job_name,
            scheduled = %event.scheduled_time,
            outcome = ?event.outcome,
            "occurrence skipped"
        );
    }

    fn on_trigger_error(&self, event: &TriggerErrorEvent) {
        error!(job_id = %event.job_id, job = %event.job_name, "job unscheduled: {}", event.error);
    }
}
