use crate::error::{ReplayError, Result};
use std::collections::HashMap;

const DEFAULT_COMPLETION_TEMPERATURE: f64 = 0.8;
const DEFAULT_COMPLETION_MAX_TOKENS: u32 = 4096;

/// External collaborator configuration. A missing required key is fatal
/// before any job starts.
#[derive(Debug, Clone)]
pub struct Settings {
    pub market_data_base_url: String,
    pub market_data_api_key: String,
    pub signal_feed_base_url: String,
    pub completion_base_url: String,
    pub completion_api_key: String,
    pub completion_model: String,
    pub completion_temperature: f64,
    pub completion_max_tokens: u32,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&vars)
    }

    pub fn from_map(settings: &HashMap<String, String>) -> Result<Self> {
        let market_data_base_url = require_setting_url(settings, "MARKET_DATA_BASE_URL")?;
        let market_data_api_key = require_setting(settings, "MARKET_DATA_API_KEY")?.to_string();
        let signal_feed_base_url = require_setting_url(settings, "SIGNAL_FEED_BASE_URL")?;
        let completion_base_url = require_setting_url(settings, "COMPLETION_BASE_URL")?;
        let completion_api_key = require_setting(settings, "COMPLETION_API_KEY")?.to_string();
        let completion_model = require_setting(settings, "COMPLETION_MODEL")?.to_string();
        let completion_temperature = optional_setting_f64(
            settings,
            "COMPLETION_TEMPERATURE",
            DEFAULT_COMPLETION_TEMPERATURE,
            0.0,
            2.0,
        )?;
        let completion_max_tokens = optional_setting_u32(
            settings,
            "COMPLETION_MAX_TOKENS",
            DEFAULT_COMPLETION_MAX_TOKENS,
            1,
        )?;

        Ok(Self {
            market_data_base_url,
            market_data_api_key,
            signal_feed_base_url,
            completion_base_url,
            completion_api_key,
            completion_model,
            completion_temperature,
            completion_max_tokens,
        })
    }
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ReplayError::Config(key.to_string()))
}

fn require_setting_url(settings: &HashMap<String, String>, key: &str) -> Result<String> {
    let raw = require_setting(settings, key)?;
    if !raw.starts_with("http://") && !raw.starts_with("https://") {
        return Err(ReplayError::Config(format!(
            "{} must be an http(s) URL (value: {})",
            key, raw
        )));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> Result<f64> {
    let Some(raw) = settings.get(key).map(|value| value.trim()).filter(|value| !value.is_empty())
    else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| ReplayError::Config(format!("{} must be a number (value: {})", key, raw)))?;
    if !value.is_finite() || value < min || value > max {
        return Err(ReplayError::Config(format!(
            "{} must be between {} and {} (value: {})",
            key, min, max, raw
        )));
    }
    Ok(value)
}

fn optional_setting_u32(
    settings: &HashMap<String, String>,
    key: &str,
    default: u32,
    min: u32,
) -> Result<u32> {
    let Some(raw) = settings.get(key).map(|value| value.trim()).filter(|value| !value.is_empty())
    else {
        return Ok(default);
    };
    let value = raw
        .parse::<u32>()
        .map_err(|_| ReplayError::Config(format!("{} must be an integer (value: {})", key, raw)))?;
    if value < min {
        return Err(ReplayError::Config(format!(
            "{} must be >= {} (value: {})",
            key, min, raw
        )));
    }
    Ok(value)
}
