use crate::config::Settings;
use crate::error::{ReplayError, Result};
use crate::models::{SignalMessage, SignalSourceKind};
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn fetch_batch(&self, count: u32) -> Result<Vec<SignalMessage>>;
}

/// Client for the ingestion service, one instance per source endpoint.
pub struct SignalFeedClient {
    http: Client,
    base_url: String,
    kind: SignalSourceKind,
}

impl SignalFeedClient {
    pub fn new(settings: &Settings, kind: SignalSourceKind) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ReplayError::Upstream(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self {
            http,
            base_url: settings.signal_feed_base_url.clone(),
            kind,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SignalBatchPayload {
    #[serde(default)]
    signals: Vec<SignalMessage>,
}

#[async_trait]
impl SignalSource for SignalFeedClient {
    async fn fetch_batch(&self, count: u32) -> Result<Vec<SignalMessage>> {
        let url = format!("{}/signals/{}", self.base_url, self.kind.as_str());
        let count_text = count.to_string();

        let response = self
            .http
            .get(&url)
            .query(&[("count", count_text.as_str())])
            .send()
            .await
            .map_err(|err| ReplayError::Upstream(format!("signal batch request failed: {}", err)))?
            .error_for_status()
            .map_err(|err| ReplayError::Upstream(format!("signal batch request failed: {}", err)))?;

        let payload: SignalBatchPayload = response.json().await.map_err(|err| {
            ReplayError::Upstream(format!("failed to parse signal batch: {}", err))
        })?;

        let mut signals = payload.signals;
        signals.truncate(count as usize);
        info!(
            "Fetched {} raw signals from the {} source",
            signals.len(),
            self.kind
        );
        Ok(signals)
    }
}
