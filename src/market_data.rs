use crate::config::Settings;
use crate::error::{ReplayError, Result};
use crate::models::{CompanyProfile, DailyClose, Quote};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Minimum gap between outbound requests. The upstream ceiling is about
/// 75 requests/minute; 800ms keeps us under it with margin.
const REQUEST_GAP: Duration = Duration::from_millis(800);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const BASE_RETRY_DELAY_MS: u64 = 1000;
const MAX_RETRY_DELAY_MS: u64 = 10000;

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_quote(&self, ticker: &str) -> Result<Quote>;
    async fn get_historical_daily_closes(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyClose>>;
    async fn get_company_profile(&self, ticker: &str) -> Result<CompanyProfile>;
}

pub struct MarketDataClient {
    http: Client,
    base_url: String,
    api_key: String,
    request_gate: Mutex<Option<Instant>>,
}

impl MarketDataClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ReplayError::Upstream(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self {
            http,
            base_url: settings.market_data_base_url.clone(),
            api_key: settings.market_data_api_key.clone(),
            request_gate: Mutex::new(None),
        })
    }

    /// Serializes outbound calls: the gate is held across the pacing sleep
    /// so concurrent callers queue instead of bursting.
    async fn pace(&self) {
        let mut gate = self.request_gate.lock().await;
        if let Some(last) = *gate {
            let elapsed = last.elapsed();
            if elapsed < REQUEST_GAP {
                sleep(REQUEST_GAP - elapsed).await;
            }
        }
        *gate = Some(Instant::now());
    }

    /// GET with pacing and jittered backoff. `None` means the upstream
    /// answered 404 for this resource.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay_ms = (BASE_RETRY_DELAY_MS * 2_u64.pow(attempt - 1)).min(MAX_RETRY_DELAY_MS);
                let jitter_range = (delay_ms as f64 * 0.25) as u64;
                let jitter = fastrand::u64(0..=jitter_range * 2);
                let final_delay = delay_ms.saturating_sub(jitter_range).saturating_add(jitter);
                debug!(
                    "Retrying GET {} in {}ms (attempt {}/{})",
                    path,
                    final_delay,
                    attempt + 1,
                    MAX_RETRIES + 1
                );
                sleep(Duration::from_millis(final_delay)).await;
            }

            self.pace().await;
            let response = match self
                .http
                .get(&url)
                .header("X-Api-Key", &self.api_key)
                .query(query)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    last_error = Some(ReplayError::Upstream(format!("GET {} failed: {}", path, err)));
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                last_error = Some(ReplayError::Upstream(format!(
                    "GET {} returned status {}",
                    path, status
                )));
                continue;
            }
            if !status.is_success() {
                return Err(ReplayError::Upstream(format!(
                    "GET {} returned status {}",
                    path, status
                )));
            }

            return match response.json::<T>().await {
                Ok(payload) => Ok(Some(payload)),
                Err(err) => Err(ReplayError::Upstream(format!(
                    "failed to parse response from {}: {}",
                    path, err
                ))),
            };
        }

        Err(last_error
            .unwrap_or_else(|| ReplayError::Upstream(format!("GET {} exhausted retries", path))))
    }
}

#[async_trait]
impl MarketDataProvider for MarketDataClient {
    async fn get_quote(&self, ticker: &str) -> Result<Quote> {
        let payload: QuotePayload = self
            .get_json("/quote", &[("symbol", ticker)])
            .await?
            .ok_or_else(|| ReplayError::Upstream(format!("no quote found for {}", ticker)))?;
        let current_price = payload.current_price.filter(|value| *value > 0.0).ok_or_else(|| {
            ReplayError::Upstream(format!("quote for {} carried no usable price", ticker))
        })?;
        Ok(Quote {
            current_price,
            previous_close: payload.previous_close.unwrap_or(current_price),
        })
    }

    async fn get_historical_daily_closes(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyClose>> {
        let from = start.format("%Y-%m-%d").to_string();
        let to = end.format("%Y-%m-%d").to_string();
        let payload: Option<HistoryPayload> = self
            .get_json(
                "/history/daily",
                &[("symbol", ticker), ("from", &from), ("to", &to)],
            )
            .await?;

        let mut series: Vec<DailyClose> = payload
            .map(|payload| payload.series)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|point| {
                let close = point.close.filter(|value| *value > 0.0)?;
                Some(DailyClose {
                    date: point.date,
                    close,
                })
            })
            .collect();

        if series.is_empty() {
            return Err(ReplayError::NoData {
                ticker: ticker.to_string(),
                start,
            });
        }

        series.sort_by_key(|point| point.date);
        series.dedup_by_key(|point| point.date);
        Ok(series)
    }

    async fn get_company_profile(&self, ticker: &str) -> Result<CompanyProfile> {
        let payload: Option<ProfilePayload> =
            self.get_json("/profile", &[("symbol", ticker)]).await?;
        let Some(payload) = payload else {
            warn!("No company profile found for {}", ticker);
            return Ok(CompanyProfile { market_cap: None });
        };
        Ok(CompanyProfile {
            market_cap: payload.market_cap.filter(|value| value.is_finite() && *value >= 0.0),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotePayload {
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    current_price: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfilePayload {
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    series: Vec<HistoryPoint>,
}

#[derive(Debug, Deserialize)]
struct HistoryPoint {
    date: NaiveDate,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    close: Option<f64>,
}

/// Upstream feeds mix numeric and quoted-numeric fields; accept both.
fn deserialize_f64_opt<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct F64OptVisitor;

    impl<'de> Visitor<'de> for F64OptVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or string")
        }

        fn visit_none<E>(self) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_f64<E>(self, value: f64) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().parse::<f64>().ok())
        }

        fn visit_string<E>(self, value: String) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().parse::<f64>().ok())
        }
    }

    deserializer.deserialize_any(F64OptVisitor)
}
