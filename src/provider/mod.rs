// src/provider/mod.rs — Text-generation provider layer

pub mod openai_compat;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::infra::config::ProviderConfig;
use crate::infra::errors::Result;

/// The optional text-generation collaborator. Used for prompt translation
/// and subjective scoring only; the loop runs without one.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn id(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Single-turn request.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Build the configured provider, wrapped with retry.
/// Returns `None` when disabled or when the API key variable is unset.
pub fn from_config(cfg: &ProviderConfig) -> Option<Arc<dyn TextGenerator>> {
    if !cfg.enabled {
        tracing::debug!("text-generation provider disabled in config");
        return None;
    }
    let api_key = match std::env::var(&cfg.api_key_env) {
        Ok(k) if !k.trim().is_empty() => k,
        _ => {
            tracing::info!(
                "{} not set; prompt translation will use keyword heuristics",
                cfg.api_key_env
            );
            return None;
        }
    };
    let inner = Arc::new(openai_compat::OpenAICompatProvider::new(
        "openai-compat",
        api_key,
        cfg.base_url.clone(),
        cfg.model.clone(),
    ));
    let retry = retry::RetryConfig {
        max_retries: cfg.max_retries,
        ..Default::default()
    };
    Some(Arc::new(retry::RetryProvider::with_config(inner, retry)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_request_single_user_turn() {
        let req = CompletionRequest::prompt("hello").with_system("be brief");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(req.system.as_deref(), Some("be brief"));
    }

    #[test]
    fn test_token_usage_total() {
        let u = TokenUsage {
            input_tokens: 120,
            output_tokens: 30,
        };
        assert_eq!(u.total(), 150);
    }

    #[test]
    fn test_from_config_disabled() {
        let cfg = ProviderConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(from_config(&cfg).is_none());
    }

    #[test]
    fn test_from_config_missing_key() {
        let cfg = ProviderConfig {
            api_key_env: "VIDLOOP_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        assert!(from_config(&cfg).is_none());
    }
}
