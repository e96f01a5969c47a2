use crate::context::AppContext;
use crate::store::JobStore;
use anyhow::Result;

pub async fn run(app: &AppContext, user_id: &str) -> Result<()> {
    let db = app.database().await?;
    let jobs = db.list_by_owner(user_id).await?;
    if jobs.is_empty() {
        println!("No jobs found for user {}", user_id);
        return Ok(());
    }

    for job in jobs {
        let error_suffix = job
            .error
            .as_deref()
            .map(|message| format!(" error=\"{}\"", message))
            .unwrap_or_default();
        println!(
            "{} {:<24} {:<20} {:>3}% candidates={}{}",
            job.id,
            job.name,
            job.status.as_str(),
            job.progress,
            job.candidates.len(),
            error_suffix
        );
    }
    Ok(())
}
