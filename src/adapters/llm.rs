use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub max_retries: usize,
    pub retry_backoff_secs: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: "gpt-4.1".to_string(),
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            max_retries: 3,
            retry_backoff_secs: 5,
            connect_timeout_secs: 10,
            read_timeout_secs: 180,
        }
    }
}

impl ModelConfig {
    /// Wait before retry number `attempt` (zero-based): `(attempt + 1) * backoff`.
    pub fn retry_delay(&self, attempt: usize) -> Duration {
        Duration::from_secs(self.retry_backoff_secs * (attempt as u64 + 1))
    }

    pub fn attempts(&self) -> usize {
        self.max_retries.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl LLMRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub reachable: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn complete(&self, request: LLMRequest) -> Result<LLMResponse>;

    fn model_name(&self) -> &str;

    /// Sends a trivial prompt to check the backend answers at all.
    async fn health_check(&self) -> HealthStatus {
        let request = LLMRequest::new("", "this is a test request, write a short poem");
        match self.complete(request).await {
            Ok(_) => HealthStatus {
                reachable: true,
                error: None,
            },
            Err(err) => HealthStatus {
                reachable: false,
                error: Some(format!("{err:#}")),
            },
        }
    }
}

pub fn create_adapter(config: &ModelConfig) -> Result<Box<dyn LLMAdapter>> {
    match config.model_name.as_str() {
        name if name.starts_with("ollama:") => {
            Ok(Box::new(crate::adapters::OllamaAdapter::new(config.clone())?))
        }
        _ if config
            .base_url
            .as_ref()
            .map_or(false, |url| url.contains("11434")) =>
        {
            Ok(Box::new(crate::adapters::OllamaAdapter::new(config.clone())?))
        }
        // OpenAI and any OpenAI-compatible proxy such as LiteLLM
        _ => Ok(Box::new(crate::adapters::OpenAIAdapter::new(config.clone())?)),
    }
}

pub(crate) fn http_client(config: &ModelConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(
            config.connect_timeout_secs + config.read_timeout_secs,
        ))
        .user_agent("AI-Code-Reviewer/1.0")
        .build()?)
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sends a request built by `make_request`, retrying transport failures and
/// retryable statuses with linear backoff. Other error statuses fail at once.
pub(crate) async fn send_with_retry<F>(
    config: &ModelConfig,
    backend: &str,
    mut make_request: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let attempts = config.attempts();

    for attempt in 0..attempts {
        let last = attempt + 1 == attempts;
        tracing::debug!("{} request attempt {}/{}", backend, attempt + 1, attempts);

        match make_request().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if !is_retryable_status(status) || last {
                    anyhow::bail!("{} API error ({}): {}", backend, status, body);
                }
                tracing::warn!("{} returned {} on attempt {}", backend, status, attempt + 1);
            }
            Err(err) => {
                if last {
                    let kind = if err.is_timeout() { "timed out" } else { "unreachable" };
                    return Err(anyhow::Error::new(err)
                        .context(format!("{backend} service {kind} after {attempts} attempts")));
                }
                tracing::warn!("{} request failed on attempt {}: {}", backend, attempt + 1, err);
            }
        }

        let delay = config.retry_delay(attempt);
        tracing::info!("Waiting {}s before retry", delay.as_secs());
        tokio::time::sleep(delay).await;
    }

    anyhow::bail!("{} request failed after retries", backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_linearly() {
        let config = ModelConfig::default();

        assert_eq!(config.retry_delay(0), Duration::from_secs(5));
        assert_eq!(config.retry_delay(2), Duration::from_secs(15));
    }

    #[test]
    fn selects_backend_by_model_name() {
        let ollama = ModelConfig {
            model_name: "ollama:codellama".to_string(),
            ..ModelConfig::default()
        };
        assert_eq!(create_adapter(&ollama).unwrap().model_name(), "ollama:codellama");

        let openai = ModelConfig {
            model_name: "gpt-4.1".to_string(),
            api_key: Some("k".to_string()),
            ..ModelConfig::default()
        };
        assert_eq!(create_adapter(&openai).unwrap().model_name(), "gpt-4.1");
    }

    #[test]
    fn only_throttling_and_server_errors_retry() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
