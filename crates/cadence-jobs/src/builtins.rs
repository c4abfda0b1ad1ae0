//! Demonstration jobs with simulated work.
//!
//! Each sleeps for a fixed time and returns a small JSON report, which makes
//! them handy for exercising coalescing and drained shutdown by hand.

use std::time::Duration;

use cadence_scheduler::{job_fn, JobCall, JobError, JobRegistry};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

pub const SAMPLE_JOB_WORK: Duration = Duration::from_secs(1);
pub const SEND_EMAIL_WORK: Duration = Duration::from_secs(2);
pub const BACKUP_WORK: Duration = Duration::from_secs(5);
pub const PROCESS_DATA_WORK: Duration = Duration::from_secs(3);

pub(crate) fn register(registry: &mut JobRegistry) {
    registry.register("sample_job", job_fn("Log a message after a second of work", sample_job));
    registry.register("send_email", job_fn("Simulate sending an email", send_email));
    registry.register("backup_database", job_fn("Simulate a database backup", backup_database));
    registry.register("process_data", job_fn("Simulate a batch of record processing", process_data));
}

/// `sample_job(message="Hello from cadence!")`
pub async fn sample_job(call: JobCall) -> Result<Value, JobError> {
    let message = call.string_or(0, "message", "Hello from cadence!")?;
    info!(job_id = %call.job_id, "executing sample job: {message}");
    tokio::time::sleep(SAMPLE_JOB_WORK).await;
    Ok(json!({
        "status": "completed",
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `send_email(recipient, subject, body="")`
pub async fn send_email(call: JobCall) -> Result<Value, JobError> {
    let recipient = call.string(0, "recipient")?;
    let subject = call.string(1, "subject")?;
    let body = call.string_or(2, "body", "")?;
    info!(job_id = %call.job_id, recipient = %recipient, body_len = body.len(), "sending email");
    tokio::time::sleep(SEND_EMAIL_WORK).await;
    Ok(json!({
        "status": "sent",
        "recipient": recipient,
        "subject": subject,
        "sent_at": Utc::now().to_rfc3339(),
    }))
}

/// `backup_database(database_name="main_db")`
pub async fn backup_database(call: JobCall) -> Result<Value, JobError> {
    let database = call.string_or(0, "database_name", "main_db")?;
    info!(job_id = %call.job_id, database = %database, "starting backup");
    tokio::time::sleep(BACKUP_WORK).await;
    let now = Utc::now();
    Ok(json!({
        "status": "completed",
        "database": database,
        "backup_size": "250MB",
        "backup_location": format!("/backups/{database}_{}.sql", now.format("%Y%m%d_%H%M%S")),
        "completed_at": now.to_rfc3339(),
    }))
}

/// `process_data(records_count=1000)`
pub async fn process_data(call: JobCall) -> Result<Value, JobError> {
    let records = call.u64_or(0, "records_count", 1000)?;
    info!(job_id = %call.job_id, records, "processing records");
    tokio::time::sleep(PROCESS_DATA_WORK).await;
    Ok(json!({
        "status": "processed",
        "records_processed": records,
        "processing_time": format!("{:.1}s", PROCESS_DATA_WORK.as_secs_f64()),
        "completed_at": Utc::now().to_rfc3339(),
    }))
}
