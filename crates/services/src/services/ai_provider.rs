//! Anthropic Messages API client used by the coach.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{error, warn};

const MESSAGES_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

#[derive(Debug, Clone, Error)]
pub enum AiProviderError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("json error: {0}")]
    Serde(String),
}

impl AiProviderError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// A text-in, text-out model. The coach only depends on this seam.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn ask(&self, system: &str, prompt: &str) -> Result<String, AiProviderError>;
}

/// Asks `model` for JSON and decodes it, tolerating markdown fences around the payload.
pub async fn ask_json<T: DeserializeOwned>(
    model: &dyn LanguageModel,
    system: &str,
    prompt: &str,
) -> Result<T, AiProviderError> {
    let response = model.ask(system, prompt).await?;
    if response.trim().is_empty() {
        error!("Model returned an empty response");
        return Err(AiProviderError::Serde("Empty response from model".to_string()));
    }

    let json_str = extract_json(&response);
    serde_json::from_str(json_str).map_err(|e| {
        error!(
            json_error = %e,
            response_length = response.len(),
            extracted_json_preview = %json_str.chars().take(500).collect::<String>(),
            "Failed to parse JSON response from model"
        );
        AiProviderError::Serde(e.to_string())
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
    system: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

impl MessagesResponse {
    fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: Client,
    api_key: SecretString,
    model: String,
}

impl AnthropicClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self, AiProviderError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("habitforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AiProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: model.into(),
        })
    }

    async fn send_request(
        &self,
        request: &MessagesRequest<'_>,
    ) -> Result<MessagesResponse, AiProviderError> {
        let res = self
            .http
            .post(MESSAGES_API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<MessagesResponse>()
                .await
                .map_err(|e| AiProviderError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(AiProviderError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(AiProviderError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(AiProviderError::Http { status, body })
            }
        }
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn ask(&self, system: &str, prompt: &str) -> Result<String, AiProviderError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            system,
        };

        let response = (|| async { self.send_request(&request).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(30))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &AiProviderError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "AI provider call failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await?;

        response
            .text()
            .map(str::to_string)
            .ok_or_else(|| AiProviderError::Serde("No text content in response".to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> AiProviderError {
    if e.is_timeout() {
        AiProviderError::Timeout
    } else {
        AiProviderError::Transport(e.to_string())
    }
}

/// Extract JSON from a string that might contain markdown code blocks
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        // Skip past any language identifier on the same line
        let content_start = text[content_start..]
            .find('\n')
            .map(|i| content_start + i + 1)
            .unwrap_or(content_start);
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(&'static str);

    #[async_trait]
    impl LanguageModel for Canned {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn ask(&self, _system: &str, _prompt: &str) -> Result<String, AiProviderError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn extract_json_plain() {
        let input = r#"{"key": "value"}"#;
        assert_eq!(extract_json(input), r#"{"key": "value"}"#);
    }

    #[test]
    fn extract_json_code_block() {
        let input = "Here you go:\n```json\n{\"key\": \"value\"}\n```\nEnjoy";
        assert_eq!(extract_json(input), r#"{"key": "value"}"#);
    }

    #[test]
    fn extract_json_generic_code_block() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(extract_json(input), r#"{"key": "value"}"#);
    }

    #[test]
    fn only_transient_errors_are_retried() {
        assert!(AiProviderError::RateLimited.should_retry());
        assert!(AiProviderError::Http { status: 503, body: String::new() }.should_retry());
        assert!(!AiProviderError::Http { status: 400, body: String::new() }.should_retry());
        assert!(!AiProviderError::InvalidApiKey.should_retry());
    }

    #[tokio::test]
    async fn ask_json_decodes_fenced_payloads() {
        let model = Canned("```json\n{\"tips\": [\"drink water\"]}\n```");
        let value: serde_json::Value = ask_json(&model, "system", "prompt").await.unwrap();
        assert_eq!(value["tips"][0], "drink water");

        let empty = Canned("   ");
        assert!(ask_json::<serde_json::Value>(&empty, "s", "p").await.is_err());
    }
}
