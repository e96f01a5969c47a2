use crate::context::AppContext;
use crate::store::JobStore;
use anyhow::{anyhow, Result};
use log::info;
use uuid::Uuid;

pub async fn run(app: &AppContext, job_id: Uuid) -> Result<()> {
    let db = app.database().await?;
    if db.get(job_id).await?.is_none() {
        return Err(anyhow!("Job {} not found", job_id));
    }
    db.delete(job_id).await?;
    info!("Deleted job {} and its stored results", job_id);
    Ok(())
}
