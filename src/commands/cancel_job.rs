use crate::context::AppContext;
use crate::models::JobStatus;
use crate::store::{JobPatch, JobStore};
use anyhow::{anyhow, Result};
use chrono::Utc;
use log::info;
use uuid::Uuid;

/// Out-of-band cancellation: writes the status field and returns. The
/// running job notices at its next checkpoint.
pub async fn run(app: &AppContext, job_id: Uuid) -> Result<()> {
    let db = app.database().await?;
    let job = db
        .get(job_id)
        .await?
        .ok_or_else(|| anyhow!("Job {} not found", job_id))?;

    if job.status.is_terminal() {
        info!(
            "Job {} is already {} and cannot be cancelled",
            job_id,
            job.status.as_str()
        );
        return Ok(());
    }

    db.update(
        job_id,
        JobPatch {
            status: Some(JobStatus::Cancelled),
            completed_at: Some(Utc::now()),
            ..JobPatch::default()
        },
    )
    .await?;
    info!("Requested cancellation of job {}", job_id);
    Ok(())
}
