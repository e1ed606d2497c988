pub mod github;
pub mod gitlab;
pub mod host;
pub mod llm;
pub mod ollama;
pub mod openai;

pub use github::GitHubClient;
pub use gitlab::GitLabClient;
pub use ollama::OllamaAdapter;
pub use openai::OpenAIAdapter;
