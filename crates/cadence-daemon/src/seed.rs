use cadence_scheduler::{JobSpec, Scheduler};
use figment::Figment;
use tracing::info;

/// Seed jobs declared as `[[jobs]]` tables alongside `[scheduler]`.
pub fn seed_jobs(figment: &Figment) -> anyhow::Result<Vec<JobSpec>> {
    if !figment.contains("jobs") {
        return Ok(Vec::new());
    }
    figment
        .extract_inner::<Vec<JobSpec>>("jobs")
        .map_err(|e| anyhow::anyhow!("invalid [[jobs]] section: {e}"))
}

/// Add every seed job, stopping at the first one the scheduler rejects.
pub fn install(scheduler: &Scheduler, specs: Vec<JobSpec>) -> anyhow::Result<usize> {
    let count = specs.len();
    for spec in specs {
        let name = spec.name.clone();
        let job = scheduler
            .add_job(spec)
            .map_err(|e| anyhow::anyhow!("seed job '{name}': {e}"))?;
        info!(job_id = %job.id, job = %job.name, trigger = %job.trigger, "seed job installed");
    }
    Ok(count)
}
