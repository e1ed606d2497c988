use crate::adapters::llm::{
    http_client, send_with_retry, LLMAdapter, LLMRequest, LLMResponse, ModelConfig, Usage,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct OllamaAdapter {
    client: Client,
    config: ModelConfig,
    base_url: String,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
    model: String,
    done: bool,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
}

impl OllamaAdapter {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();
        let client = http_client(&config)?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }
}

#[async_trait]
impl LLMAdapter for OllamaAdapter {
    async fn complete(&self, request: LLMRequest) -> Result<LLMResponse> {
        let model_name = self
            .config
            .model_name
            .strip_prefix("ollama:")
            .unwrap_or(&self.config.model_name);

        let temperature = request.temperature.or(self.config.temperature);
        let num_predict = request.max_tokens.or(self.config.max_tokens);
        let ollama_request = OllamaRequest {
            model: model_name.to_string(),
            prompt: request.user_prompt,
            system: request.system_prompt,
            stream: false,
            options: (temperature.is_some() || num_predict.is_some()).then_some(OllamaOptions {
                temperature,
                num_predict,
            }),
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = send_with_retry(&self.config, "Ollama", || {
            self.client.post(&url).json(&ollama_request)
        })
        .await?;

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        let usage = ollama_response.done.then(|| {
            let prompt_tokens = ollama_response.prompt_eval_count.unwrap_or(0);
            let completion_tokens = ollama_response.eval_count.unwrap_or(0);
            Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }
        });

        Ok(LLMResponse {
            content: ollama_response.response.trim().to_string(),
            model: ollama_response.model,
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}
