use crate::adapters::llm::{
    http_client, send_with_retry, LLMAdapter, LLMRequest, LLMResponse, ModelConfig, Usage,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Chat-completions client for OpenAI and compatible proxies (LiteLLM).
pub struct OpenAIAdapter {
    client: Client,
    config: ModelConfig,
    api_key: String,
    endpoint: String,
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    model: String,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl OpenAIAdapter {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .context("API key not found. Set LITELLM_KEY or OPENAI_API_KEY, or provide api_key in config")?;

        let endpoint = chat_endpoint(
            config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1"),
        );
        let client = http_client(&config)?;

        Ok(Self {
            client,
            config,
            api_key,
            endpoint,
        })
    }
}

/// Accepts either a full `/chat/completions` URL or an API base.
fn chat_endpoint(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

#[async_trait]
impl LLMAdapter for OpenAIAdapter {
    async fn complete(&self, request: LLMRequest) -> Result<LLMResponse> {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(Message {
                role: "system".to_string(),
                content: request.system_prompt,
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.user_prompt,
        });

        let openai_request = OpenAIRequest {
            model: self.config.model_name.clone(),
            messages,
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens.or(self.config.max_tokens),
        };

        let started = std::time::Instant::now();
        let response = send_with_retry(&self.config, "LLM", || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .header("Accept", "application/json")
                .json(&openai_request)
        })
        .await?;
        tracing::info!("LLM request took {:.2}s", started.elapsed().as_secs_f64());

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let content = openai_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .context("Chat completion response contained no choices")?;

        Ok(LLMResponse {
            content,
            model: openai_response.model,
            usage: openai_response.usage.map(|usage| Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }),
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}
