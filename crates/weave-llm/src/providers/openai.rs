use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weave_core::config::LlmConfig;
use weave_core::error::{Result, WeaveError};
use weave_core::traits::LlmClient;
use weave_core::types::{ChatMessage, CompletionRequest};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default endpoint for a provider name.
pub fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "ollama" => "http://localhost:11434/v1/chat/completions",
        "groq" => "https://api.groq.com/openai/v1/chat/completions",
        "openrouter" => "https://openrouter.ai/api/v1/chat/completions",
        "together" => "https://api.together.xyz/v1/chat/completions",
        "mistral" => "https://api.mistral.ai/v1/chat/completions",
        "deepseek" => "https://api.deepseek.com/v1/chat/completions",
        _ => OPENAI_API_URL,
    }
}

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    url: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url(&config.provider).to_string()),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the assistant text from a chat-completions response body.
pub(crate) fn parse_response(body: &str) -> Result<String> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| WeaveError::LlmParse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| WeaveError::LlmParse("response has no message content".into()))
}

impl LlmClient for OpenAiClient {
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: &request.model,
                messages: &request.messages,
                max_tokens: self.max_tokens,
                temperature: request.temperature,
                stream: false,
            };

            let mut req = self.http.post(&self.url).json(&body);
            if let Some(api_key) = &self.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            debug!(model = %request.model, messages = request.messages.len(), "Sending completion request");

            let response = req
                .send()
                .await
                .map_err(|e| WeaveError::LlmRequest(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| WeaveError::LlmRequest(e.to_string()))?;

            if !status.is_success() {
                return Err(WeaveError::LlmRequest(format!("HTTP {}: {}", status, text)));
            }

            parse_response(&text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_text() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Hello"}}]}"#;
        assert_eq!(parse_response(body).unwrap(), "Hello");
    }

    #[test]
    fn test_parse_response_without_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert!(matches!(parse_response(body), Err(WeaveError::LlmParse(_))));
        assert!(parse_response(r#"{"choices":[]}"#).is_err());
        assert!(parse_response("<html>").is_err());
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            max_tokens: 800,
            temperature: 0.0,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_base_url_resolution() {
        let config = LlmConfig {
            provider: "ollama".into(),
            ..Default::default()
        };
        assert_eq!(
            OpenAiClient::new(&config).url,
            "http://localhost:11434/v1/chat/completions"
        );

        let custom = LlmConfig {
            base_url: Some("http://vllm:8000/v1/chat/completions".into()),
            ..Default::default()
        };
        assert_eq!(
            OpenAiClient::new(&custom).url,
            "http://vllm:8000/v1/chat/completions"
        );
    }
}
