use crate::completion::{CompletionClient, CompletionOptions};
use crate::config::Settings;
use crate::database::Database;
use crate::market_data::MarketDataClient;
use crate::models::SignalSourceKind;
use crate::signal_feed::SignalFeedClient;
use anyhow::{anyhow, Result};

/// Lazily wires the database and HTTP collaborators for CLI commands.
#[derive(Clone)]
pub struct AppContext {
    database_url: Option<String>,
}

impl AppContext {
    pub fn initialize(database_url: Option<String>) -> Self {
        Self { database_url }
    }

    pub async fn database(&self) -> Result<Database> {
        let Some(database_url) = self.database_url.as_deref() else {
            return Err(anyhow!("DATABASE_URL must be set to run replay commands."));
        };
        Ok(Database::new(database_url).await?)
    }

    pub fn settings(&self) -> Result<Settings> {
        Ok(Settings::from_env()?)
    }

    pub fn market_data_client(&self, settings: &Settings) -> Result<MarketDataClient> {
        Ok(MarketDataClient::new(settings)?)
    }

    pub fn completion_client(&self, settings: &Settings) -> Result<CompletionClient> {
        Ok(CompletionClient::new(settings)?)
    }

    pub fn completion_options(&self, settings: &Settings) -> CompletionOptions {
        CompletionOptions::from_settings(settings)
    }

    pub fn signal_source(
        &self,
        settings: &Settings,
        kind: SignalSourceKind,
    ) -> Result<SignalFeedClient> {
        Ok(SignalFeedClient::new(settings, kind)?)
    }
}
