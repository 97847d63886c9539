pub mod providers;
pub mod retry;

use weave_core::config::LlmConfig;
use weave_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client for the configured provider, wrapped in retries
/// when `[llm.retry]` is set.
pub fn create_client(config: &LlmConfig) -> Box<dyn LlmClient> {
    // Every supported provider speaks the OpenAI chat-completions dialect
    let base: Box<dyn LlmClient> = Box::new(OpenAiClient::new(config));
    match &config.retry {
        Some(retry) => Box::new(RetryingClient::new(base, retry.clone())),
        None => base,
    }
}
