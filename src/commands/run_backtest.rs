use crate::context::AppContext;
use crate::job::{JobOutcome, JobRunner};
use crate::models::{BacktestJob, SignalSourceKind};
use crate::store::JobStore;
use anyhow::Result;
use log::info;

use super::show_results;

const RESULT_PREVIEW_LIMIT: i64 = 10;

pub async fn run(
    app: &AppContext,
    user_id: &str,
    name: &str,
    source: SignalSourceKind,
    count: u32,
) -> Result<()> {
    let settings = app.settings()?;
    let db = app.database().await?;
    let market = app.market_data_client(&settings)?;
    let completion = app.completion_client(&settings)?;
    let source_client = app.signal_source(&settings, source)?;

    let job = BacktestJob::new(user_id, name, source, count);
    db.create(&job).await?;
    info!(
        "Created job {} ({} signals from {})",
        job.id, job.signal_count, job.source
    );

    let runner = JobRunner::new(
        &db,
        &db,
        &db,
        &market,
        &completion,
        app.completion_options(&settings),
    );
    match runner.run(job.id, &source_client).await? {
        JobOutcome::Completed => {
            info!("Job {} finished; top scenarios by P&L:", job.id);
            show_results::print_top(&db, job.id, RESULT_PREVIEW_LIMIT).await?;
        }
        JobOutcome::Cancelled => {
            info!("Job {} was cancelled; partial results remain stored", job.id);
        }
    }
    Ok(())
}
