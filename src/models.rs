use crate::error::ReplayError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Which ingestion service endpoint a job pulls its raw signals from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSourceKind {
    ChatFeed,
    PublicFilings,
}

impl SignalSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSourceKind::ChatFeed => "chat-feed",
            SignalSourceKind::PublicFilings => "public-filings",
        }
    }
}

impl FromStr for SignalSourceKind {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat-feed" | "chat_feed" => Ok(SignalSourceKind::ChatFeed),
            "public-filings" | "public_filings" => Ok(SignalSourceKind::PublicFilings),
            other => Err(ReplayError::InvalidSource(other.to_string())),
        }
    }
}

impl fmt::Display for SignalSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle. Stages advance strictly forward; `Completed`, `Failed`
/// and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    FetchingMessages,
    Filtering,
    BuildingMatrix,
    GeneratingScenarios,
    CalculatingResults,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::FetchingMessages => "fetching_messages",
            JobStatus::Filtering => "filtering",
            JobStatus::BuildingMatrix => "building_matrix",
            JobStatus::GeneratingScenarios => "generating_scenarios",
            JobStatus::CalculatingResults => "calculating_results",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Checkpoint progress persisted alongside each stage transition.
    /// `BuildingMatrix` advances incrementally from 40 to 60 as candidates
    /// complete.
    pub fn checkpoint_progress(&self) -> i32 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::FetchingMessages => 10,
            JobStatus::Filtering => 25,
            JobStatus::BuildingMatrix => 40,
            JobStatus::GeneratingScenarios => 70,
            JobStatus::CalculatingResults => 90,
            JobStatus::Completed => 100,
            JobStatus::Failed | JobStatus::Cancelled => 0,
        }
    }

    /// Position in the forward-only stage order. Terminal states rank
    /// above every active stage so a transition into them is always legal.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::FetchingMessages => 1,
            JobStatus::Filtering => 2,
            JobStatus::BuildingMatrix => 3,
            JobStatus::GeneratingScenarios => 4,
            JobStatus::CalculatingResults => 5,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl FromStr for JobStatus {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "fetching_messages" => Ok(JobStatus::FetchingMessages),
            "filtering" => Ok(JobStatus::Filtering),
            "building_matrix" => Ok(JobStatus::BuildingMatrix),
            "generating_scenarios" => Ok(JobStatus::GeneratingScenarios),
            "calculating_results" => Ok(JobStatus::CalculatingResults),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(ReplayError::Persistence(format!(
                "unknown job status '{}'",
                other
            ))),
        }
    }
}

/// One user-initiated what-if run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestJob {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub source: SignalSourceKind,
    pub signal_count: u32,
    pub status: JobStatus,
    pub progress: i32,
    pub candidates: Vec<CandidateSummary>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BacktestJob {
    pub fn new(user_id: &str, name: &str, source: SignalSourceKind, signal_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            source,
            signal_count,
            status: JobStatus::Pending,
            progress: 0,
            candidates: Vec::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Candidate shape persisted onto the job after filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSummary {
    pub ticker: String,
    pub buy_date: NaiveDate,
    pub insider_price: f64,
    pub market_price: f64,
    pub market_cap: f64,
}

/// A filtered, de-duplicated insider signal eligible for simulation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ticker: String,
    pub insider_price: f64,
    /// Date of the underlying insider transaction, kept for display only.
    pub insider_trade_date: Option<NaiveDate>,
    /// Date the signal surfaced to users; the simulated buy anchor.
    pub signal_date: NaiveDate,
    pub market_price: f64,
    pub market_cap: f64,
    pub first_viable_date: Option<NaiveDate>,
}

impl Candidate {
    pub fn summary(&self) -> CandidateSummary {
        CandidateSummary {
            ticker: self.ticker.clone(),
            buy_date: self.signal_date,
            insider_price: self.insider_price,
            market_price: self.market_price,
            market_cap: self.market_cap,
        }
    }
}

/// Raw signal message as delivered by an ingestion source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    pub ticker: String,
    pub recommendation: String,
    pub insider_price: f64,
    #[serde(default)]
    pub insider_trade_date: Option<NaiveDate>,
    pub signal_surface_date: NaiveDate,
}

/// One day of a historical close series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub current_price: f64,
    pub previous_close: f64,
}

#[derive(Debug, Clone)]
pub struct CompanyProfile {
    pub market_cap: Option<f64>,
}

/// Metric an exit condition is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitMetric {
    #[serde(rename = "price_change_percent")]
    PriceChangePercent,
    #[serde(rename = "days_held")]
    DaysHeld,
}

impl ExitMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitMetric::PriceChangePercent => "price_change_percent",
            ExitMetric::DaysHeld => "days_held",
        }
    }

    /// Parses a metric name from an authored payload. Returns `None` for
    /// anything outside the closed set; callers reject, never coerce.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "price_change_percent" | "price_change_percent_from_entry" => {
                Some(ExitMetric::PriceChangePercent)
            }
            "days_held" => Some(ExitMetric::DaysHeld),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Lt => "<",
            Comparator::Ge => ">=",
            Comparator::Le => "<=",
            Comparator::Eq => "==",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            ">" => Some(Comparator::Gt),
            "<" => Some(Comparator::Lt),
            ">=" => Some(Comparator::Ge),
            "<=" => Some(Comparator::Le),
            "==" | "=" => Some(Comparator::Eq),
            _ => None,
        }
    }
}

/// A single OR-branch exit rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitCondition {
    pub metric: ExitMetric,
    pub comparator: Comparator,
    pub threshold: f64,
}

impl ExitCondition {
    /// Human-readable form used in trade exit reasons.
    pub fn describe(&self) -> String {
        format!(
            "{} {} {}",
            self.metric.as_str(),
            self.comparator.as_str(),
            self.threshold
        )
    }
}

/// What happens when a condition fires. Only full liquidation exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitAction {
    #[serde(rename = "liquidate")]
    Liquidate,
}

impl ExitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitAction::Liquidate => "liquidate",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.starts_with("liquidate") {
            Some(ExitAction::Liquidate)
        } else {
            None
        }
    }
}

/// One simulated position for one candidate under one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub ticker: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub exit_reason: String,
}

/// One exit-rule set with its simulation results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub number: i32,
    pub name: String,
    pub description: String,
    pub conditions: Vec<ExitCondition>,
    pub action: ExitAction,
    pub total_pnl: f64,
    pub total_pnl_percent: f64,
    pub win_rate: f64,
    pub trade_count: i32,
    pub trades: Vec<TradeRecord>,
}
