use crate::config::Settings;
use crate::error::{ReplayError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl CompletionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            temperature: settings.completion_temperature,
            max_tokens: settings.completion_max_tokens,
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: CompletionOptions,
    ) -> Result<String>;
}

/// Chat-completions client. The response content may be a plain string or
/// an array of text parts; both are accepted.
pub struct CompletionClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl CompletionClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ReplayError::Upstream(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self {
            http,
            base_url: settings.completion_base_url.clone(),
            api_key: settings.completion_api_key.clone(),
            model: settings.completion_model.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for CompletionClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: CompletionOptions,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ]
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ReplayError::Upstream(format!("completion request failed: {}", err)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ReplayError::Upstream(
                "completion provider rejected credentials".to_string(),
            ));
        }
        let raw = response
            .text()
            .await
            .map_err(|err| ReplayError::Upstream(format!("completion read failed: {}", err)))?;
        if !status.is_success() {
            return Err(ReplayError::Upstream(format!(
                "completion provider returned {}: {}",
                status,
                truncate_for_log(&raw, 512)
            )));
        }

        let value: Value = serde_json::from_str(&raw).map_err(|err| {
            ReplayError::Upstream(format!("completion response was not JSON: {}", err))
        })?;
        extract_message_text(&value).ok_or_else(|| {
            ReplayError::Upstream(format!(
                "completion response carried no content: {}",
                truncate_for_log(&raw, 512)
            ))
        })
    }
}

fn extract_message_text(value: &Value) -> Option<String> {
    let content = value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?;
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let joined: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str).or(part.as_str()))
                .collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined.join("\n"))
            }
        }
        _ => None,
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().take(max_chars).collect()
}
