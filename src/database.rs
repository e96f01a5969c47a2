use crate::error::{ReplayError, Result};
use crate::models::{
    BacktestJob, CandidateSummary, DailyClose, ExitAction, JobStatus, Scenario, SignalSourceKind,
};
use crate::store::{JobPatch, JobStore, PriceSeriesStore, ScenarioStore};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::error;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url.as_ref(), NoTls)
            .await
            .map_err(|err| {
                ReplayError::Persistence(format!("failed to connect to PostgreSQL: {}", err))
            })?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self { client })
    }

    /// Applies `schema.sql`; safe to run repeatedly.
    pub async fn apply_schema(&self) -> Result<()> {
        self.client
            .batch_execute(include_str!("../schema.sql"))
            .await?;
        Ok(())
    }

    fn job_from_row(row: &Row) -> Result<BacktestJob> {
        let source_raw: String = row.get("source");
        let status_raw: String = row.get("status");
        let candidates_raw: Value = row.get("candidates");
        let candidates: Vec<CandidateSummary> =
            serde_json::from_value(candidates_raw).map_err(|err| {
                ReplayError::Persistence(format!("corrupt candidates payload: {}", err))
            })?;

        Ok(BacktestJob {
            id: row.get("id"),
            user_id: row.get("user_id"),
            name: row.get("name"),
            source: source_raw.parse::<SignalSourceKind>()?,
            signal_count: row.get::<_, i32>("signal_count") as u32,
            status: status_raw.parse::<JobStatus>()?,
            progress: row.get("progress"),
            candidates,
            error: row.get("error"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        })
    }

    fn scenario_from_row(row: &Row) -> Result<Scenario> {
        let conditions_raw: Value = row.get("conditions");
        let trades_raw: Value = row.get("trades");
        let action_raw: String = row.get("action");

        Ok(Scenario {
            number: row.get("number"),
            name: row.get("name"),
            description: row.get("description"),
            conditions: serde_json::from_value(conditions_raw).map_err(|err| {
                ReplayError::Persistence(format!("corrupt conditions payload: {}", err))
            })?,
            action: ExitAction::parse(&action_raw).ok_or_else(|| {
                ReplayError::Persistence(format!("corrupt action '{}'", action_raw))
            })?,
            total_pnl: row.get("total_pnl"),
            total_pnl_percent: row.get("total_pnl_percent"),
            win_rate: row.get("win_rate"),
            trade_count: row.get("trade_count"),
            trades: serde_json::from_value(trades_raw).map_err(|err| {
                ReplayError::Persistence(format!("corrupt trades payload: {}", err))
            })?,
        })
    }
}

#[async_trait]
impl JobStore for Database {
    async fn create(&self, job: &BacktestJob) -> Result<()> {
        let candidates = serde_json::to_value(&job.candidates)
            .map_err(|err| ReplayError::Persistence(err.to_string()))?;
        self.client
            .execute(
                "INSERT INTO backtest_jobs
                 (id, user_id, name, source, signal_count, status, progress, candidates, error, created_at, completed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &job.id,
                    &job.user_id,
                    &job.name,
                    &job.source.as_str(),
                    &(job.signal_count as i32),
                    &job.status.as_str(),
                    &job.progress,
                    &candidates,
                    &job.error,
                    &job.created_at,
                    &job.completed_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BacktestJob>> {
        let row = self
            .client
            .query_opt("SELECT * FROM backtest_jobs WHERE id = $1", &[&id])
            .await?;
        row.map(|row| Self::job_from_row(&row)).transpose()
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut assignments: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql + Send + Sync>> = Vec::new();

        if let Some(status) = patch.status {
            params.push(Box::new(status.as_str().to_string()));
            assignments.push(format!("status = ${}", params.len()));
        }
        if let Some(progress) = patch.progress {
            params.push(Box::new(progress));
            assignments.push(format!("progress = ${}", params.len()));
        }
        if let Some(candidates) = patch.candidates {
            let payload = serde_json::to_value(&candidates)
                .map_err(|err| ReplayError::Persistence(err.to_string()))?;
            params.push(Box::new(payload));
            assignments.push(format!("candidates = ${}", params.len()));
        }
        if let Some(error) = patch.error {
            params.push(Box::new(error));
            assignments.push(format!("error = ${}", params.len()));
        }
        if let Some(completed_at) = patch.completed_at {
            params.push(Box::new(completed_at));
            assignments.push(format!("completed_at = ${}", params.len()));
        }

        params.push(Box::new(id));
        let statement = format!(
            "UPDATE backtest_jobs SET {} WHERE id = ${}",
            assignments.join(", "),
            params.len()
        );
        let param_refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|param| param.as_ref() as &(dyn ToSql + Sync))
            .collect();
        self.client.execute(&statement, &param_refs).await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        // Children go with it via ON DELETE CASCADE.
        self.client
            .execute("DELETE FROM backtest_jobs WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<BacktestJob>> {
        let rows = self
            .client
            .query(
                "SELECT * FROM backtest_jobs WHERE user_id = $1 ORDER BY created_at DESC",
                &[&user_id],
            )
            .await?;
        rows.iter().map(Self::job_from_row).collect()
    }
}

#[async_trait]
impl PriceSeriesStore for Database {
    async fn get(&self, ticker: &str, start: NaiveDate) -> Result<Option<Vec<DailyClose>>> {
        let row = self
            .client
            .query_opt(
                "SELECT points FROM price_series WHERE ticker = $1 AND series_start = $2",
                &[&ticker, &start],
            )
            .await?;
        row.map(|row| {
            let points: Value = row.get(0);
            serde_json::from_value(points)
                .map_err(|err| ReplayError::Persistence(format!("corrupt price series: {}", err)))
        })
        .transpose()
    }

    async fn put(
        &self,
        job_id: Uuid,
        ticker: &str,
        start: NaiveDate,
        series: &[DailyClose],
    ) -> Result<()> {
        let points = serde_json::to_value(series)
            .map_err(|err| ReplayError::Persistence(err.to_string()))?;
        // Write-once: a concurrent job storing the same key wins silently.
        self.client
            .execute(
                "INSERT INTO price_series (ticker, series_start, points, fetched_by_job)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (ticker, series_start) DO NOTHING",
                &[&ticker, &start, &points, &job_id],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ScenarioStore for Database {
    async fn put(&self, job_id: Uuid, scenario: &Scenario) -> Result<()> {
        let conditions = serde_json::to_value(&scenario.conditions)
            .map_err(|err| ReplayError::Persistence(err.to_string()))?;
        let trades = serde_json::to_value(&scenario.trades)
            .map_err(|err| ReplayError::Persistence(err.to_string()))?;
        self.client
            .execute(
                "INSERT INTO scenarios
                 (job_id, number, name, description, conditions, action, total_pnl, total_pnl_percent, win_rate, trade_count, trades)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (job_id, number) DO UPDATE SET
                     name = EXCLUDED.name,
                     description = EXCLUDED.description,
                     conditions = EXCLUDED.conditions,
                     action = EXCLUDED.action,
                     total_pnl = EXCLUDED.total_pnl,
                     total_pnl_percent = EXCLUDED.total_pnl_percent,
                     win_rate = EXCLUDED.win_rate,
                     trade_count = EXCLUDED.trade_count,
                     trades = EXCLUDED.trades",
                &[
                    &job_id,
                    &scenario.number,
                    &scenario.name,
                    &scenario.description,
                    &conditions,
                    &scenario.action.as_str(),
                    &scenario.total_pnl,
                    &scenario.total_pnl_percent,
                    &scenario.win_rate,
                    &scenario.trade_count,
                    &trades,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_top_by_pnl(&self, job_id: Uuid, limit: i64) -> Result<Vec<Scenario>> {
        let rows = self
            .client
            .query(
                "SELECT * FROM scenarios
                 WHERE job_id = $1
                 ORDER BY total_pnl DESC, number ASC
                 LIMIT $2",
                &[&job_id, &limit],
            )
            .await?;
        rows.iter().map(Self::scenario_from_row).collect()
    }
}
