use crate::error::Result;
use crate::models::{
    BacktestJob, CandidateSummary, DailyClose, JobStatus, Scenario,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use uuid::Uuid;

/// Typed partial update for a job record. Unset fields are left untouched;
/// `error` distinguishes "leave as is" (None) from "clear/replace"
/// (Some(None)/Some(Some(..))).
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<i32>,
    pub candidates: Option<Vec<CandidateSummary>>,
    pub error: Option<Option<String>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_none()
            && self.candidates.is_none()
            && self.error.is_none()
            && self.completed_at.is_none()
    }

    pub fn stage(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            progress: Some(status.checkpoint_progress()),
            ..Self::default()
        }
    }

    pub fn progress(progress: i32) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &BacktestJob) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<BacktestJob>>;
    async fn update(&self, id: Uuid, patch: JobPatch) -> Result<()>;
    /// Deletes the job and cascades to its price-series provenance rows
    /// and scenarios.
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<BacktestJob>>;
}

#[async_trait]
pub trait PriceSeriesStore: Send + Sync {
    async fn get(&self, ticker: &str, start: NaiveDate) -> Result<Option<Vec<DailyClose>>>;
    /// Write-once per (ticker, start) key; re-storing the same series is
    /// safe. `job_id` records which job triggered the fetch, not ownership.
    async fn put(
        &self,
        job_id: Uuid,
        ticker: &str,
        start: NaiveDate,
        series: &[DailyClose],
    ) -> Result<()>;
}

#[async_trait]
pub trait ScenarioStore: Send + Sync {
    async fn put(&self, job_id: Uuid, scenario: &Scenario) -> Result<()>;
    async fn list_top_by_pnl(&self, job_id: Uuid, limit: i64) -> Result<Vec<Scenario>>;
}

/// Cooperative cancellation check. Cancellation is an out-of-band write to
/// the job's status field; the orchestrator consults this probe before
/// every stage transition and inside the per-candidate and per-scenario
/// loops. It never interrupts an in-flight call.
pub struct CancelProbe<'a> {
    jobs: &'a dyn JobStore,
    job_id: Uuid,
}

impl<'a> CancelProbe<'a> {
    pub fn new(jobs: &'a dyn JobStore, job_id: Uuid) -> Self {
        Self { jobs, job_id }
    }

    /// A probe that fails to read the store reports not-cancelled; the
    /// next checkpoint retries.
    pub async fn is_cancelled(&self) -> bool {
        match self.jobs.get(self.job_id).await {
            Ok(Some(job)) => job.status == JobStatus::Cancelled,
            Ok(None) => {
                warn!("Job {} disappeared while checking cancellation", self.job_id);
                false
            }
            Err(err) => {
                warn!(
                    "Cancellation check for job {} failed: {}",
                    self.job_id, err
                );
                false
            }
        }
    }
}
