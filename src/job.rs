use crate::candidates::{first_viable_date, CandidateFilter, MARKET_CAP_FLOOR};
use crate::completion::{CompletionOptions, CompletionProvider};
use crate::error::{ReplayError, Result};
use crate::market_data::MarketDataProvider;
use crate::models::{BacktestJob, JobStatus};
use crate::price_cache::PriceHistoryCache;
use crate::retry::retry_store_operation;
use crate::scenarios::author_scenarios;
use crate::signal_feed::SignalSource;
use crate::simulator::{score_scenario, PriceMatrixEntry};
use crate::store::{CancelProbe, JobPatch, JobStore, PriceSeriesStore, ScenarioStore};
use chrono::Utc;
use log::{info, warn};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Conservative pause between successive candidates during matrix
/// construction, on top of the fetcher's own pacing.
const CANDIDATE_PACING: Duration = Duration::from_secs(1);
const MATRIX_PROGRESS_START: i32 = 40;
const MATRIX_PROGRESS_SPAN: i32 = 20;
const MAX_SIGNAL_COUNT: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Cancelled,
}

/// Drives one job through the five pipeline stages, persisting every
/// checkpoint. A runner borrows its collaborators and is cheap to build
/// per job; concurrent jobs get independent runners.
pub struct JobRunner<'a> {
    jobs: &'a dyn JobStore,
    prices: &'a dyn PriceSeriesStore,
    scenarios: &'a dyn ScenarioStore,
    market: &'a dyn MarketDataProvider,
    completion: &'a dyn CompletionProvider,
    completion_options: CompletionOptions,
}

impl<'a> JobRunner<'a> {
    pub fn new(
        jobs: &'a dyn JobStore,
        prices: &'a dyn PriceSeriesStore,
        scenarios: &'a dyn ScenarioStore,
        market: &'a dyn MarketDataProvider,
        completion: &'a dyn CompletionProvider,
        completion_options: CompletionOptions,
    ) -> Self {
        Self {
            jobs,
            prices,
            scenarios,
            market,
            completion,
            completion_options,
        }
    }

    /// Runs the job to a terminal state. Stage failures are persisted onto
    /// the job (`failed` + error message) before the error is returned;
    /// cooperative cancellation is a clean `Ok(Cancelled)`.
    pub async fn run(&self, job_id: Uuid, source: &dyn SignalSource) -> Result<JobOutcome> {
        match self.execute(job_id, source).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!("Job {} failed: {}", job_id, err);
                let patch = JobPatch {
                    status: Some(JobStatus::Failed),
                    error: Some(Some(err.to_string())),
                    completed_at: Some(Utc::now()),
                    ..JobPatch::default()
                };
                if let Err(persist_err) = self.jobs.update(job_id, patch).await {
                    warn!(
                        "Failed to persist failure state for job {}: {}",
                        job_id, persist_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute(&self, job_id: Uuid, source: &dyn SignalSource) -> Result<JobOutcome> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ReplayError::Persistence(format!("job {} not found", job_id)))?;
        if job.status.is_terminal() {
            return Err(ReplayError::Persistence(format!(
                "job {} already reached terminal state {}",
                job_id,
                job.status.as_str()
            )));
        }
        let probe = CancelProbe::new(self.jobs, job_id);
        let mut stage = job.status;

        // Stage 1: pull the raw signal batch.
        if probe.is_cancelled().await {
            return Ok(JobOutcome::Cancelled);
        }
        self.advance(job_id, &mut stage, JobStatus::FetchingMessages)
            .await?;
        let count = clamp_signal_count(&job);
        let messages = source.fetch_batch(count).await?;

        // Stage 2: reduce messages to purchase candidates.
        if probe.is_cancelled().await {
            return Ok(JobOutcome::Cancelled);
        }
        self.advance(job_id, &mut stage, JobStatus::Filtering).await?;
        let filter = CandidateFilter::new(self.market);
        let candidates = filter.filter_messages(&messages).await;
        retry_store_operation!(
            format!("persist candidates for job {}", job_id),
            self.jobs.update(
                job_id,
                JobPatch {
                    candidates: Some(candidates.iter().map(|c| c.summary()).collect()),
                    ..JobPatch::default()
                },
            )
        )?;

        if candidates.is_empty() {
            info!("Job {} matched no candidates; completing empty", job_id);
            return self.complete(job_id, &mut stage).await;
        }

        // Stage 3: build the per-candidate price matrix, one ticker at a
        // time to respect the market-data rate ceiling.
        if probe.is_cancelled().await {
            return Ok(JobOutcome::Cancelled);
        }
        self.advance(job_id, &mut stage, JobStatus::BuildingMatrix)
            .await?;
        let cache = PriceHistoryCache::new(self.prices, self.market);
        let total = candidates.len();
        let mut matrix: Vec<PriceMatrixEntry> = Vec::with_capacity(total);

        for (index, mut candidate) in candidates.into_iter().enumerate() {
            if probe.is_cancelled().await {
                info!("Job {} cancelled during matrix construction", job_id);
                return Ok(JobOutcome::Cancelled);
            }

            if candidate.market_cap < MARKET_CAP_FLOOR {
                info!(
                    "Job {}: {} never viable (market cap below floor)",
                    job_id, candidate.ticker
                );
            } else {
                match cache
                    .get_or_fetch(job_id, &candidate.ticker, candidate.signal_date)
                    .await
                {
                    Ok(series) => {
                        match first_viable_date(
                            &series,
                            candidate.insider_price,
                            candidate.market_cap,
                        ) {
                            Some(viable) => {
                                candidate.first_viable_date = Some(viable);
                                matrix.push(PriceMatrixEntry { candidate, series });
                            }
                            None => info!(
                                "Job {}: {} never viable across its series",
                                job_id, candidate.ticker
                            ),
                        }
                    }
                    Err(err) if err.is_candidate_recoverable() => {
                        warn!(
                            "Job {}: skipping candidate after data failure: {}",
                            job_id, err
                        );
                    }
                    Err(err) => return Err(err),
                }
            }

            let progress = MATRIX_PROGRESS_START
                + ((index + 1) as i32 * MATRIX_PROGRESS_SPAN) / total as i32;
            retry_store_operation!(
                format!("persist matrix progress for job {}", job_id),
                self.jobs.update(job_id, JobPatch::progress(progress))
            )?;

            if index + 1 < total {
                sleep(CANDIDATE_PACING).await;
            }
        }

        if matrix.is_empty() {
            info!("Job {} has no viable candidates; completing empty", job_id);
            return self.complete(job_id, &mut stage).await;
        }

        // Stage 4: author the exit-rule scenarios.
        if probe.is_cancelled().await {
            return Ok(JobOutcome::Cancelled);
        }
        self.advance(job_id, &mut stage, JobStatus::GeneratingScenarios)
            .await?;
        let sample: Vec<_> = matrix.iter().map(|entry| entry.candidate.clone()).collect();
        let drafts = author_scenarios(self.completion, self.completion_options, &sample).await?;

        // Stage 5: score and persist every surviving scenario.
        if probe.is_cancelled().await {
            return Ok(JobOutcome::Cancelled);
        }
        self.advance(job_id, &mut stage, JobStatus::CalculatingResults)
            .await?;
        for (index, draft) in drafts.iter().enumerate() {
            if probe.is_cancelled().await {
                info!("Job {} cancelled during scenario scoring", job_id);
                return Ok(JobOutcome::Cancelled);
            }
            let scenario = score_scenario(index as i32 + 1, draft, &matrix);
            retry_store_operation!(
                format!("persist scenario {} for job {}", scenario.number, job_id),
                self.scenarios.put(job_id, &scenario)
            )?;
        }

        if probe.is_cancelled().await {
            return Ok(JobOutcome::Cancelled);
        }
        self.complete(job_id, &mut stage).await
    }

    /// Single mutation entry point for stage transitions: forward-only,
    /// each persisted with its checkpoint progress.
    async fn advance(&self, job_id: Uuid, stage: &mut JobStatus, next: JobStatus) -> Result<()> {
        if next.rank() <= stage.rank() {
            return Err(ReplayError::Persistence(format!(
                "illegal job transition {} -> {}",
                stage.as_str(),
                next.as_str()
            )));
        }
        retry_store_operation!(
            format!("advance job {} to {}", job_id, next.as_str()),
            self.jobs.update(job_id, JobPatch::stage(next))
        )?;
        *stage = next;
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, stage: &mut JobStatus) -> Result<JobOutcome> {
        let patch = JobPatch {
            status: Some(JobStatus::Completed),
            progress: Some(JobStatus::Completed.checkpoint_progress()),
            completed_at: Some(Utc::now()),
            ..JobPatch::default()
        };
        if JobStatus::Completed.rank() <= stage.rank() {
            return Err(ReplayError::Persistence(format!(
                "illegal job transition {} -> completed",
                stage.as_str()
            )));
        }
        retry_store_operation!(
            format!("complete job {}", job_id),
            self.jobs.update(job_id, patch.clone())
        )?;
        *stage = JobStatus::Completed;
        info!("Job {} completed", job_id);
        Ok(JobOutcome::Completed)
    }
}

fn clamp_signal_count(job: &BacktestJob) -> u32 {
    let clamped = job.signal_count.clamp(1, MAX_SIGNAL_COUNT);
    if clamped != job.signal_count {
        warn!(
            "Job {} requested {} signals; clamped to {}",
            job.id, job.signal_count, clamped
        );
    }
    clamped
}
