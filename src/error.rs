use chrono::NaiveDate;

/// Failure modes of the replay pipeline. Per-candidate recoveries
/// (`NoData`, `Upstream` during matrix construction) are caught and logged
/// by the orchestrator; everything else aborts the job.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("missing or invalid setting {0}")]
    Config(String),

    #[error("no historical data available for {ticker} from {start}")]
    NoData { ticker: String, start: NaiveDate },

    #[error("unrecognized signal source '{0}'")]
    InvalidSource(String),

    #[error("scenario response could not be parsed: {0}")]
    AuthoringParse(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl From<tokio_postgres::Error> for ReplayError {
    fn from(err: tokio_postgres::Error) -> Self {
        ReplayError::Persistence(err.to_string())
    }
}

impl ReplayError {
    /// Errors that skip a single candidate during price-matrix
    /// construction instead of aborting the job.
    pub fn is_candidate_recoverable(&self) -> bool {
        matches!(self, ReplayError::NoData { .. } | ReplayError::Upstream(_))
    }
}

impl From<reqwest::Error> for ReplayError {
    fn from(err: reqwest::Error) -> Self {
        ReplayError::Upstream(err.to_string())
    }
}

pub type Result<T, E = ReplayError> = std::result::Result<T, E>;
