use crate::adapters::llm::ModelConfig;
use crate::core::prompt::PromptConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAMES: [&str; 2] = [".pr-reviewer.yml", ".pr-reviewer.yaml"];
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GITLAB_API_URL: &str = "https://gitlab.com/api/v4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReviewMode {
    /// Fetch diffs and file content through the host's REST API.
    #[default]
    Api,
    /// Clone the repository and review the whole branch diff.
    Clone,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    pub token: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,

    pub github: HostConfig,
    pub gitlab: HostConfig,
    pub webhook_secret: Option<String>,
    pub bind_address: String,

    pub mode: ReviewMode,
    pub inline_comments: bool,
    pub auto_fix: bool,
    pub exclude: Vec<String>,
    pub max_context_chars: usize,
    pub max_file_chars: usize,

    pub max_retries: usize,
    pub retry_backoff_secs: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let model = ModelConfig::default();
        Self {
            model: model.model_name,
            temperature: None,
            max_tokens: None,
            base_url: None,
            api_key: None,
            system_prompt: None,
            github: HostConfig::default(),
            gitlab: HostConfig::default(),
            webhook_secret: None,
            bind_address: "0.0.0.0:6000".to_string(),
            mode: ReviewMode::Api,
            inline_comments: true,
            auto_fix: false,
            exclude: Vec::new(),
            max_context_chars: 50_000,
            max_file_chars: 50_000,
            max_retries: model.max_retries,
            retry_backoff_secs: model.retry_backoff_secs,
            connect_timeout_secs: model.connect_timeout_secs,
            read_timeout_secs: model.read_timeout_secs,
        }
    }
}

impl Config {
    /// Loads the first config file found (working directory, then home),
    /// then applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut candidates: Vec<PathBuf> = CONFIG_FILE_NAMES.iter().map(PathBuf::from).collect();
        if let Some(home_dir) = dirs::home_dir() {
            candidates.push(home_dir.join(CONFIG_FILE_NAMES[0]));
        }

        let mut config = match candidates.iter().find(|path| path.exists()) {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Overrides fields from environment variables; `lookup` returns the
    /// value of a variable if set.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(token) = get("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(url) = get("GITHUB_API_URL") {
            self.github.api_url = Some(url);
        }
        if let Some(token) = get("GITLAB_TOKEN") {
            self.gitlab.token = Some(token);
        }
        if let Some(url) = get("GITLAB_API_URL") {
            self.gitlab.api_url = Some(url);
        }
        if let Some(url) = get("LITELLM_URL") {
            self.base_url = Some(url);
        }
        if let Some(key) = get("LITELLM_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = get("MODEL_ID") {
            self.model = model;
        }
        if let Some(secret) = get("WEBHOOK_SECRET") {
            self.webhook_secret = Some(secret);
        }
        if let Some(address) = get("BIND_ADDRESS") {
            self.bind_address = address;
        }
    }

    pub fn merge_with_cli(
        &mut self,
        model: Option<String>,
        temperature: Option<f32>,
        max_tokens: Option<usize>,
    ) {
        if let Some(model) = model {
            self.model = model;
        }
        if temperature.is_some() {
            self.temperature = temperature;
        }
        if max_tokens.is_some() {
            self.max_tokens = max_tokens;
        }
    }

    /// Names of required settings that are not configured.
    pub fn validate(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        if self.github.token.is_none() && self.gitlab.token.is_none() {
            missing.push("GITHUB_TOKEN");
        }
        if !self.model.starts_with("ollama:") {
            if self.base_url.is_none() {
                missing.push("LITELLM_URL");
            }
            if self.api_key.is_none() {
                missing.push("LITELLM_KEY");
            }
        }
        missing
    }

    pub fn github_api_url(&self) -> &str {
        self.github.api_url.as_deref().unwrap_or(DEFAULT_GITHUB_API_URL)
    }

    pub fn gitlab_api_url(&self) -> &str {
        self.gitlab.api_url.as_deref().unwrap_or(DEFAULT_GITLAB_API_URL)
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model_name: self.model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_retries: self.max_retries,
            retry_backoff_secs: self.retry_backoff_secs,
            connect_timeout_secs: self.connect_timeout_secs,
            read_timeout_secs: self.read_timeout_secs,
        }
    }

    pub fn prompt_config(&self) -> PromptConfig {
        let mut prompt = PromptConfig {
            max_file_chars: self.max_file_chars,
            max_context_chars: self.max_context_chars,
            ..PromptConfig::default()
        };
        if let Some(system_prompt) = &self.system_prompt {
            prompt.system_prompt = system_prompt.clone();
        }
        prompt
    }

    /// True when `path` matches one of the `exclude` glob patterns.
    pub fn should_exclude(&self, path: &str) -> bool {
        self.exclude.iter().any(|pattern| match glob::Pattern::new(pattern) {
            Ok(glob) => glob.matches(path),
            Err(err) => {
                tracing::warn!("Ignoring invalid exclude pattern {}: {}", pattern, err);
                false
            }
        })
    }
}
