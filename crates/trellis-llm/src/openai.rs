use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use trellis_core::config::ModelConfig;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::TextGenerator;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// A request timeout doubles as the dispatch-level timeout: on expiry the
/// call fails like any other transport error and the batch index falls
/// into the retry set.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat-completions generator (non-streaming).
///
/// Speaks the single `/v1/chat/completions` shape, which also covers
/// Ollama, vLLM, Groq, OpenRouter, etc. Deliberately one endpoint and one
/// call form — not a provider abstraction.
pub struct OpenAiGenerator {
    http: Client,
    config: ModelConfig,
}

impl OpenAiGenerator {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl TextGenerator for OpenAiGenerator {
    fn generate<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let url = self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            debug!(model = %self.config.model_id, "sending generation request");

            let body = ChatRequest {
                model: &self.config.model_id,
                messages: vec![
                    RequestMessage {
                        role: "system",
                        content: system_prompt,
                    },
                    RequestMessage {
                        role: "user",
                        content: user_prompt,
                    },
                ],
                max_tokens: self.config.max_tokens,
                temperature: (self.config.temperature > 0.0).then_some(self.config.temperature),
            };

            let mut req = self.http.post(url).timeout(REQUEST_TIMEOUT).json(&body);
            if let Some(api_key) = self.config.resolve_api_key() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
                .send()
                .await
                .map_err(|e| TrellisError::Generation(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(TrellisError::Generation(format!("HTTP {}: {}", status, body)));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| TrellisError::Generation(e.to_string()))?;

            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| TrellisError::Generation("empty completion".into()))
        })
    }
}
