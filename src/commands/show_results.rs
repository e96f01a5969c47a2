use crate::context::AppContext;
use crate::database::Database;
use crate::store::ScenarioStore;
use anyhow::Result;
use uuid::Uuid;

pub async fn run(app: &AppContext, job_id: Uuid, limit: i64) -> Result<()> {
    let db = app.database().await?;
    print_top(&db, job_id, limit).await
}

pub async fn print_top(db: &Database, job_id: Uuid, limit: i64) -> Result<()> {
    let scenarios = db.list_top_by_pnl(job_id, limit).await?;
    if scenarios.is_empty() {
        println!("No scenarios stored for job {}", job_id);
        return Ok(());
    }

    for scenario in scenarios {
        println!(
            "#{:<3} {:<32} pnl={:+.2} ({:+.2}%) win_rate={:.1}% trades={}",
            scenario.number,
            scenario.name,
            scenario.total_pnl,
            scenario.total_pnl_percent,
            scenario.win_rate,
            scenario.trade_count
        );
        for condition in &scenario.conditions {
            println!("      exit when {}", condition.describe());
        }
    }
    Ok(())
}
