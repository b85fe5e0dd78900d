// src/provider/openai_compat.rs — OpenAI-compatible chat completion client
//
// Works against any `/chat/completions` endpoint: the Hugging Face router
// (default), a local Ollama or vLLM server, OpenRouter, and similar.

use async_trait::async_trait;
use std::time::Duration;

use super::{Completion, CompletionRequest, TextGenerator, TokenUsage};
use crate::infra::errors::{Result, VidloopError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct OpenAICompatProvider {
    id_str: String,
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    pub fn new(id: impl Into<String>, api_key: String, base_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            id_str: id.into(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        }
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut msgs = Vec::new();
        if let Some(system) = &request.system {
            msgs.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &request.messages {
            msgs.push(serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            }));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": msgs,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

/// 429 and 5xx are worth retrying; everything else is the caller's problem.
fn is_retriable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Pull the assistant text and usage out of a chat completion response.
fn parse_completion(resp: &serde_json::Value) -> Option<Completion> {
    let content = resp["choices"][0]["message"]["content"].as_str()?.to_string();
    let usage = TokenUsage {
        input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    };
    Some(Completion { content, usage })
}

#[async_trait]
impl TextGenerator for OpenAICompatProvider {
    fn id(&self) -> &str {
        &self.id_str
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let body = self.request_body(&request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header(
                "User-Agent",
                format!("vidloop/{}", env!("CARGO_PKG_VERSION")),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    VidloopError::ProviderUnavailable {
                        provider: self.id_str.clone(),
                        message: e.to_string(),
                    }
                } else {
                    VidloopError::Provider {
                        provider: self.id_str.clone(),
                        message: e.to_string(),
                        retriable: false,
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(VidloopError::Provider {
                provider: self.id_str.clone(),
                message: format!("HTTP {status}: {}", crate::util::truncate_str(&error_body, 300)),
                retriable: is_retriable_status(status),
            });
        }

        let resp: serde_json::Value = response.json().await.map_err(|e| VidloopError::Provider {
            provider: self.id_str.clone(),
            message: e.to_string(),
            retriable: false,
        })?;

        parse_completion(&resp).ok_or_else(|| VidloopError::Provider {
            provider: self.id_str.clone(),
            message: "response has no choices[0].message.content".into(),
            retriable: false,
        })
    }
}
