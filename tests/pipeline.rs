use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use insider_replay::completion::{CompletionOptions, CompletionProvider};
use insider_replay::error::{ReplayError, Result as ReplayResult};
use insider_replay::job::{JobOutcome, JobRunner};
use insider_replay::market_data::MarketDataProvider;
use insider_replay::models::{
    BacktestJob, CompanyProfile, DailyClose, JobStatus, Quote, Scenario, SignalMessage,
    SignalSourceKind,
};
use insider_replay::scenarios::has_required_exit_pair;
use insider_replay::signal_feed::SignalSource;
use insider_replay::store::{JobPatch, JobStore, PriceSeriesStore, ScenarioStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

const VALID_SCENARIOS_JSON: &str = r#"```json
[
  {
    "name": "momentum rider",
    "description": "ride gains, cut losses",
    "action": "liquidate",
    "conditions": [
      {"metric": "price_change_percent", "comparator": ">=", "threshold": 10},
      {"metric": "price_change_percent", "comparator": "<=", "threshold": -5},
      {"metric": "days_held", "comparator": ">=", "threshold": 14}
    ]
  },
  {
    "name": "quick flip",
    "description": "small profit, short hold",
    "action": "liquidate",
    "conditions": [
      {"metric": "price_change_percent", "comparator": ">=", "threshold": 5},
      {"metric": "days_held", "comparator": ">=", "threshold": 7}
    ]
  },
  {
    "name": "no downside exit",
    "description": "take profit only, must be dropped",
    "action": "liquidate",
    "conditions": [
      {"metric": "price_change_percent", "comparator": ">=", "threshold": 3}
    ]
  }
]
```"#;

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 3, 1).expect("valid date")
}

fn rising_series(days: usize) -> Vec<DailyClose> {
    (0..days)
        .map(|offset| DailyClose {
            date: start_date() + Duration::days(offset as i64),
            close: 100.0 * 1.01_f64.powi(offset as i32),
        })
        .collect()
}

fn falling_series(days: usize) -> Vec<DailyClose> {
    (0..days)
        .map(|offset| DailyClose {
            date: start_date() + Duration::days(offset as i64),
            close: 100.0 * 0.99_f64.powi(offset as i32),
        })
        .collect()
}

fn buy_message(ticker: &str, insider_price: f64) -> SignalMessage {
    SignalMessage {
        ticker: ticker.to_string(),
        recommendation: "P - Purchase".to_string(),
        insider_price,
        insider_trade_date: Some(start_date() - Duration::days(2)),
        signal_surface_date: start_date(),
    }
}

#[derive(Default)]
struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, BacktestJob>>,
    series: Mutex<HashMap<(String, NaiveDate), Vec<DailyClose>>>,
    scenarios: Mutex<Vec<(Uuid, Scenario)>>,
    progress_log: Mutex<Vec<i32>>,
    series_puts: AtomicUsize,
    /// After this many series puts, the next `put` flips the job to
    /// cancelled, emulating an out-of-band cancel request.
    cancel_after_puts: Option<usize>,
}

impl MemoryStore {
    fn with_cancel_after_puts(puts: usize) -> Self {
        Self {
            cancel_after_puts: Some(puts),
            ..Self::default()
        }
    }

    fn job(&self, id: Uuid) -> BacktestJob {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .expect("job exists")
    }

    fn stored_series_count(&self) -> usize {
        self.series.lock().unwrap().len()
    }

    fn stored_scenarios(&self, job_id: Uuid) -> Vec<Scenario> {
        self.scenarios
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, scenario)| scenario.clone())
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: &BacktestJob) -> ReplayResult<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> ReplayResult<Option<BacktestJob>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> ReplayResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| ReplayError::Persistence(format!("job {} not found", id)))?;
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(progress) = patch.progress {
            job.progress = progress;
            self.progress_log.lock().unwrap().push(progress);
        }
        if let Some(candidates) = patch.candidates {
            job.candidates = candidates;
        }
        if let Some(error) = patch.error {
            job.error = error;
        }
        if let Some(completed_at) = patch.completed_at {
            job.completed_at = Some(completed_at);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> ReplayResult<()> {
        self.jobs.lock().unwrap().remove(&id);
        self.scenarios
            .lock()
            .unwrap()
            .retain(|(job_id, _)| *job_id != id);
        Ok(())
    }

    async fn list_by_owner(&self, user_id: &str) -> ReplayResult<Vec<BacktestJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PriceSeriesStore for MemoryStore {
    async fn get(&self, ticker: &str, start: NaiveDate) -> ReplayResult<Option<Vec<DailyClose>>> {
        Ok(self
            .series
            .lock()
            .unwrap()
            .get(&(ticker.to_string(), start))
            .cloned())
    }

    async fn put(
        &self,
        job_id: Uuid,
        ticker: &str,
        start: NaiveDate,
        series: &[DailyClose],
    ) -> ReplayResult<()> {
        self.series
            .lock()
            .unwrap()
            .entry((ticker.to_string(), start))
            .or_insert_with(|| series.to_vec());
        let puts = self.series_puts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.cancel_after_puts == Some(puts) {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.get_mut(&job_id) {
                job.status = JobStatus::Cancelled;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ScenarioStore for MemoryStore {
    async fn put(&self, job_id: Uuid, scenario: &Scenario) -> ReplayResult<()> {
        self.scenarios
            .lock()
            .unwrap()
            .push((job_id, scenario.clone()));
        Ok(())
    }

    async fn list_top_by_pnl(&self, job_id: Uuid, limit: i64) -> ReplayResult<Vec<Scenario>> {
        let mut matching: Vec<Scenario> = self.stored_scenarios(job_id);
        matching.sort_by(|a, b| {
            b.total_pnl
                .partial_cmp(&a.total_pnl)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

struct StubMarket {
    quotes: HashMap<String, (f64, f64)>,
    history: HashMap<String, Vec<DailyClose>>,
}

impl StubMarket {
    fn new(entries: &[(&str, f64, f64, Vec<DailyClose>)]) -> Self {
        Self {
            quotes: entries
                .iter()
                .map(|(ticker, price, cap, _)| (ticker.to_string(), (*price, *cap)))
                .collect(),
            history: entries
                .iter()
                .map(|(ticker, _, _, series)| (ticker.to_string(), series.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for StubMarket {
    async fn get_quote(&self, ticker: &str) -> ReplayResult<Quote> {
        let (price, _) = self
            .quotes
            .get(ticker)
            .ok_or_else(|| ReplayError::Upstream(format!("no quote for {}", ticker)))?;
        Ok(Quote {
            current_price: *price,
            previous_close: *price,
        })
    }

    async fn get_historical_daily_closes(
        &self,
        ticker: &str,
        start: NaiveDate,
        _end: NaiveDate,
    ) -> ReplayResult<Vec<DailyClose>> {
        match self.history.get(ticker) {
            Some(series) if !series.is_empty() => Ok(series.clone()),
            _ => Err(ReplayError::NoData {
                ticker: ticker.to_string(),
                start,
            }),
        }
    }

    async fn get_company_profile(&self, ticker: &str) -> ReplayResult<CompanyProfile> {
        Ok(CompanyProfile {
            market_cap: self.quotes.get(ticker).map(|(_, cap)| *cap),
        })
    }
}

struct StubSignals {
    messages: Vec<SignalMessage>,
}

#[async_trait]
impl SignalSource for StubSignals {
    async fn fetch_batch(&self, count: u32) -> ReplayResult<Vec<SignalMessage>> {
        let mut messages = self.messages.clone();
        messages.truncate(count as usize);
        Ok(messages)
    }
}

struct StubCompletion {
    response: String,
}

#[async_trait]
impl CompletionProvider for StubCompletion {
    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _options: CompletionOptions,
    ) -> ReplayResult<String> {
        Ok(self.response.clone())
    }
}

fn completion_options() -> CompletionOptions {
    CompletionOptions {
        temperature: 0.8,
        max_tokens: 4096,
    }
}

async fn create_job(store: &MemoryStore, count: u32) -> BacktestJob {
    let job = BacktestJob::new("user-1", "what-if run", SignalSourceKind::ChatFeed, count);
    store.create(&job).await.unwrap();
    job
}

#[tokio::test]
async fn full_pipeline_completes_and_ranks_scenarios() {
    tokio::time::pause();
    let store = MemoryStore::default();
    let market = StubMarket::new(&[
        ("AAA", 100.0, 800_000_000.0, rising_series(30)),
        ("BBB", 100.0, 700_000_000.0, falling_series(30)),
    ]);
    let signals = StubSignals {
        messages: vec![buy_message("AAA", 40.0), buy_message("BBB", 40.0)],
    };
    let completion = StubCompletion {
        response: VALID_SCENARIOS_JSON.to_string(),
    };

    let job = create_job(&store, 50).await;
    let runner = JobRunner::new(
        &store,
        &store,
        &store,
        &market,
        &completion,
        completion_options(),
    );
    let outcome = runner.run(job.id, &signals).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);

    let stored = store.job(job.id);
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert!(stored.error.is_none());
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.candidates.len(), 2);
    assert_eq!(store.stored_series_count(), 2);

    // The take-profit-only scenario must have been dropped; survivors are
    // renumbered 1..N.
    let scenarios = store.stored_scenarios(job.id);
    assert_eq!(scenarios.len(), 2);
    let numbers: Vec<i32> = scenarios.iter().map(|s| s.number).collect();
    assert_eq!(numbers, vec![1, 2]);
    for scenario in &scenarios {
        assert!(has_required_exit_pair(&scenario.conditions));
        assert_eq!(scenario.trade_count, 2);
    }

    // Rising AAA exits via take-profit, falling BBB via its downside exit.
    let momentum = scenarios.iter().find(|s| s.name == "momentum rider").unwrap();
    let aaa = momentum.trades.iter().find(|t| t.ticker == "AAA").unwrap();
    assert!(aaa.exit_reason.contains("price_change_percent >= 10"));
    assert!(aaa.pnl > 0.0);
    let bbb = momentum.trades.iter().find(|t| t.ticker == "BBB").unwrap();
    assert!(bbb.exit_reason.contains("price_change_percent <= -5"));
    assert!(bbb.pnl < 0.0);

    // Ranking: the momentum scenario nets positive, the quick flip loses
    // more on BBB's time exit than it gains on AAA.
    let top = store.list_top_by_pnl(job.id, 10).await.unwrap();
    assert_eq!(top[0].name, "momentum rider");
    assert!(top[0].total_pnl >= top[1].total_pnl);

    // Progress only ever moves forward while the job is active.
    let log = store.progress_log.lock().unwrap();
    assert!(log.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", *log);
}

#[tokio::test]
async fn cancellation_mid_matrix_stops_and_keeps_partial_data() {
    tokio::time::pause();
    let store = MemoryStore::with_cancel_after_puts(1);
    let market = StubMarket::new(&[
        ("AAA", 100.0, 800_000_000.0, rising_series(30)),
        ("BBB", 100.0, 700_000_000.0, rising_series(30)),
        ("CCC", 100.0, 600_000_000.0, rising_series(30)),
    ]);
    let signals = StubSignals {
        messages: vec![
            buy_message("AAA", 40.0),
            buy_message("BBB", 40.0),
            buy_message("CCC", 40.0),
        ],
    };
    let completion = StubCompletion {
        response: VALID_SCENARIOS_JSON.to_string(),
    };

    let job = create_job(&store, 50).await;
    let runner = JobRunner::new(
        &store,
        &store,
        &store,
        &market,
        &completion,
        completion_options(),
    );
    let outcome = runner.run(job.id, &signals).await.unwrap();
    assert_eq!(outcome, JobOutcome::Cancelled);

    let stored = store.job(job.id);
    assert_eq!(stored.status, JobStatus::Cancelled);
    // The first candidate's series was persisted before the cancel landed
    // and stays; the remaining candidates were never fetched.
    assert_eq!(store.stored_series_count(), 1);
    assert!(store.stored_scenarios(job.id).is_empty());
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn zero_candidate_batch_completes_empty() {
    tokio::time::pause();
    let store = MemoryStore::default();
    let market = StubMarket::new(&[
        ("SMALL", 100.0, 400_000_000.0, rising_series(30)),
        ("CHEAP", 100.0, 900_000_000.0, rising_series(30)),
    ]);
    let signals = StubSignals {
        messages: vec![
            SignalMessage {
                recommendation: "S - Sale".to_string(),
                ..buy_message("AAA", 40.0)
            },
            buy_message("SMALL", 40.0),
            buy_message("CHEAP", 2.0),
        ],
    };
    let completion = StubCompletion {
        response: VALID_SCENARIOS_JSON.to_string(),
    };

    let job = create_job(&store, 50).await;
    let runner = JobRunner::new(
        &store,
        &store,
        &store,
        &market,
        &completion,
        completion_options(),
    );
    let outcome = runner.run(job.id, &signals).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);

    let stored = store.job(job.id);
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert!(stored.candidates.is_empty());
    assert!(stored.error.is_none());
    assert_eq!(store.stored_series_count(), 0);
    assert!(store.stored_scenarios(job.id).is_empty());
}

#[tokio::test]
async fn authoring_parse_failure_fails_job_with_message() {
    tokio::time::pause();
    let store = MemoryStore::default();
    let market = StubMarket::new(&[("AAA", 100.0, 800_000_000.0, rising_series(30))]);
    let signals = StubSignals {
        messages: vec![buy_message("AAA", 40.0)],
    };
    let completion = StubCompletion {
        response: "I could not produce JSON today.".to_string(),
    };

    let job = create_job(&store, 50).await;
    let runner = JobRunner::new(
        &store,
        &store,
        &store,
        &market,
        &completion,
        completion_options(),
    );
    let err = runner.run(job.id, &signals).await.unwrap_err();
    assert!(matches!(err, ReplayError::AuthoringParse(_)));

    let stored = store.job(job.id);
    assert_eq!(stored.status, JobStatus::Failed);
    let message = stored.error.expect("failed job exposes an error message");
    assert!(message.contains("parsed"));
    // The price matrix built before the failure stays persisted.
    assert_eq!(store.stored_series_count(), 1);
    assert!(store.stored_scenarios(job.id).is_empty());
}

#[tokio::test]
async fn no_data_candidate_is_skipped_not_fatal() {
    tokio::time::pause();
    let store = MemoryStore::default();
    let market = StubMarket::new(&[
        ("AAA", 100.0, 800_000_000.0, rising_series(30)),
        ("GONE", 100.0, 900_000_000.0, Vec::new()),
    ]);
    let signals = StubSignals {
        messages: vec![buy_message("GONE", 40.0), buy_message("AAA", 40.0)],
    };
    let completion = StubCompletion {
        response: VALID_SCENARIOS_JSON.to_string(),
    };

    let job = create_job(&store, 50).await;
    let runner = JobRunner::new(
        &store,
        &store,
        &store,
        &market,
        &completion,
        completion_options(),
    );
    let outcome = runner.run(job.id, &signals).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);

    // Both survived filtering, only AAA made it into the matrix.
    let stored = store.job(job.id);
    assert_eq!(stored.candidates.len(), 2);
    assert_eq!(store.stored_series_count(), 1);
    let scenarios = store.stored_scenarios(job.id);
    assert!(!scenarios.is_empty());
    for scenario in &scenarios {
        assert_eq!(scenario.trade_count, 1);
        assert!(scenario.trades.iter().all(|t| t.ticker == "AAA"));
    }
}

#[tokio::test]
async fn signal_count_is_clamped_to_bounds() {
    tokio::time::pause();
    let store = MemoryStore::default();
    let market = StubMarket::new(&[("AAA", 100.0, 800_000_000.0, rising_series(30))]);
    let signals = StubSignals {
        messages: vec![buy_message("AAA", 40.0)],
    };
    let completion = StubCompletion {
        response: VALID_SCENARIOS_JSON.to_string(),
    };

    let mut job = BacktestJob::new("user-1", "oversized", SignalSourceKind::ChatFeed, 100);
    job.signal_count = 5000;
    store.create(&job).await.unwrap();

    let runner = JobRunner::new(
        &store,
        &store,
        &store,
        &market,
        &completion,
        completion_options(),
    );
    let outcome = runner.run(job.id, &signals).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);
}
