use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::TranslationConfig;
use crate::error::{DubSyncError, Result};

// Chat message structure for OpenAI-compatible APIs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Something that answers a chat conversation
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Client of an OpenAI-compatible `/chat/completions` endpoint
pub struct ChatClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(DubSyncError::Configuration(
                "API key is required for translation".to_string(),
            ));
        }

        let client = Client::builder().timeout(Duration::from_secs(300)).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        log::debug!("Sending chat request to {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            log::error!("Chat API error: HTTP {}, body: {}", status, error_text);
            return Err(DubSyncError::Other(format!(
                "Chat API error (status {}): {}",
                status, error_text
            )));
        }

        let completion: ChatCompletion = response.json().await?;
        first_choice(completion)
    }
}

fn first_choice(completion: ChatCompletion) -> Result<String> {
    completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.trim().to_string())
        .ok_or_else(|| DubSyncError::Other("chat completion without choices".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_request_body() {
        let messages = [ChatMessage::system("be brief"), ChatMessage::user("[1] Hi")];
        let request = ChatRequest {
            model: "deepseek-chat",
            messages: &messages,
            temperature: 0.1,
            max_tokens: 8192,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "deepseek-chat");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "[1] Hi");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_first_choice() {
        let completion: ChatCompletion = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":" [1] 嗨 \n"}}]}"#,
        )
        .unwrap();
        assert_eq!(assert_ok!(first_choice(completion)), "[1] 嗨");

        let empty: ChatCompletion = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_err!(first_choice(empty));
    }

    #[test]
    fn test_endpoint_and_key() {
        assert!(ChatClient::new(&TranslationConfig::default()).is_err());

        let config = TranslationConfig {
            api_key: "key".to_string(),
            base_url: "https://api.openai.com/v1/".to_string(),
            ..Default::default()
        };
        let client = assert_ok!(ChatClient::new(&config));
        assert_eq!(client.endpoint, "https://api.openai.com/v1/chat/completions");
    }
}
