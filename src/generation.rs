//! Grounded response generation through an OpenAI-compatible chat completion endpoint.
//!
//! Failures never escape [`ResponseGenerator::generate`]: transport, status, and decode errors
//! are logged and returned as [`GenerationOutcome::Failed`] so callers can forward a structured
//! `{ "error": ... }` payload.

use crate::config::{Config, get_config};
use crate::records::{ChatMessage, Role};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Result of one chat completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GenerationOutcome {
    /// The model's completion message.
    Message(ChatMessage),
    /// The call failed; `error` describes why.
    Failed {
        /// Human readable failure description.
        error: String,
    },
}

impl GenerationOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }
}

/// Interface implemented by chat completion backends.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Ask `model` for one completion of `messages`, bounded by `max_tokens` output tokens.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
    ) -> GenerationOutcome;
}

/// Chat client for `POST {base}/chat/completions` with bearer authentication.
pub struct ChatCompletionsGenerator {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    provider: String,
}

impl ChatCompletionsGenerator {
    /// Construct a client for the API rooted at `base_url`; `provider` only labels logs.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        provider: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().user_agent("citerag/chat").build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            provider: provider.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
    ) -> Result<ChatMessage, String> {
        let mut request = self.http.post(self.endpoint()).json(&json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| format!("failed to reach {}: {error}", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("{} returned {status}: {body}", self.provider));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| format!("failed to decode completion: {error}"))?;
        let message = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| "completion contained no choices".to_string())?;

        Ok(ChatMessage {
            role: message.role.unwrap_or(Role::Assistant),
            content: message.content.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ResponseGenerator for ChatCompletionsGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
    ) -> GenerationOutcome {
        tracing::debug!(
            provider = %self.provider,
            model,
            max_tokens,
            messages = messages.len(),
            "Requesting chat completion"
        );
        match self.complete(messages, model, max_tokens).await {
            Ok(message) => GenerationOutcome::Message(message),
            Err(error) => {
                tracing::error!(provider = %self.provider, model, error = %error, "Chat completion failed");
                GenerationOutcome::failed(error)
            }
        }
    }
}

/// Build the chat client described by `config` (Gemini's OpenAI-compatible endpoint).
pub fn generator_from_config(
    config: &Config,
) -> Result<Box<dyn ResponseGenerator>, reqwest::Error> {
    Ok(Box::new(ChatCompletionsGenerator::new(
        config.gemini_openai_base_url.clone(),
        config.gemini_api_key.clone(),
        "gemini",
    )?))
}

/// Build a chat client for the globally loaded configuration.
pub fn get_generator() -> Result<Box<dyn ResponseGenerator>, reqwest::Error> {
    generator_from_config(get_config())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn generator(server: &MockServer) -> ChatCompletionsGenerator {
        ChatCompletionsGenerator::new(server.base_url(), Some("key".into()), "test").expect("client")
    }

    #[tokio::test]
    async fn returns_first_choice_message() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer key")
                    .json_body(json!({
                        "model": "gemini-2.0-flash",
                        "messages": [
                            { "role": "user", "content": "What is 2:22?" },
                            { "role": "system", "content": "context" }
                        ],
                        "max_tokens": 300
                    }));
                then.status(200).json_body(json!({
                    "choices": [{
                        "index": 0,
                        "message": { "role": "assistant", "content": "It is a verse." }
                    }]
                }));
            })
            .await;

        let outcome = generator(&server)
            .generate(
                &[
                    ChatMessage::user("What is 2:22?"),
                    ChatMessage::system("context"),
                ],
                "gemini-2.0-flash",
                300,
            )
            .await;

        mock.assert();
        assert_eq!(
            outcome,
            GenerationOutcome::Message(ChatMessage {
                role: Role::Assistant,
                content: "It is a verse.".into()
            })
        );
    }

    #[tokio::test]
    async fn error_status_becomes_structured_payload() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let outcome = generator(&server)
            .generate(&[ChatMessage::user("hi")], "m", 10)
            .await;
        let payload = serde_json::to_value(&outcome).expect("serialize");
        let error = payload["error"].as_str().expect("error field");
        assert!(error.contains("503"));
        assert!(error.contains("overloaded"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_caught() {
        let generator = ChatCompletionsGenerator::new("http://127.0.0.1:1", None, "test")
            .expect("client");
        let outcome = generator.generate(&[ChatMessage::user("hi")], "m", 10).await;
        assert!(matches!(outcome, GenerationOutcome::Failed { .. }));
    }
}
