use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::{Generation, GenerationOptions, Generator, TokenStream};
use crate::config::{parse_llm_provider_model, LlmConfig};
use crate::error::{LexError, Result};
use crate::llm::api::LlmApiClient;
use crate::models::ChatMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAI,
    OpenRouter,
    Ollama,
    LmStudio,
    Vllm,
    OpenAICompatible { base_url: String },
    Unavailable { reason: String },
}

/// Generation backend over an OpenAI-compatible inference server.
#[derive(Clone)]
pub struct LlmProvider {
    backend: LlmBackend,
    config: Option<Arc<LlmConfig>>,
    client: Option<LlmApiClient>,
}

impl LlmProvider {
    pub fn new(config: Option<&LlmConfig>) -> Self {
        let Some(config) = config else {
            return Self::unavailable("No LLM configuration provided");
        };

        let (provider, _model) = parse_llm_provider_model(&config.model);

        let backend = match provider.to_lowercase().as_str() {
            "openai" => LlmBackend::OpenAI,
            "openrouter" => LlmBackend::OpenRouter,
            "ollama" => LlmBackend::Ollama,
            "lmstudio" => LlmBackend::LmStudio,
            "vllm" => LlmBackend::Vllm,
            _ => {
                if let Some(base_url) = &config.base_url {
                    LlmBackend::OpenAICompatible {
                        base_url: base_url.clone(),
                    }
                } else {
                    LlmBackend::Unavailable {
                        reason: format!("Unknown provider in model: {}", config.model),
                    }
                }
            }
        };

        if let LlmBackend::Unavailable { reason } = &backend {
            tracing::warn!(reason = %reason, "LLM backend unavailable");
            return Self {
                backend,
                config: Some(Arc::new(config.clone())),
                client: None,
            };
        }

        match LlmApiClient::new(config) {
            Ok(client) => {
                tracing::info!(backend = ?backend, model = client.model(), "LLM backend configured");
                Self {
                    backend,
                    config: Some(Arc::new(config.clone())),
                    client: Some(client),
                }
            }
            Err(e) => Self::unavailable(&e.to_string()),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: LlmBackend::Unavailable {
                reason: reason.to_string(),
            },
            config: None,
            client: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some() && !matches!(self.backend, LlmBackend::Unavailable { .. })
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    pub fn config(&self) -> Option<&LlmConfig> {
        self.config.as_deref()
    }

    fn client(&self) -> Result<&LlmApiClient> {
        match (&self.backend, &self.client) {
            (LlmBackend::Unavailable { reason }, _) => Err(LexError::LlmUnavailable(reason.clone())),
            (_, Some(client)) => Ok(client),
            (_, None) => Err(LexError::LlmUnavailable("No client available".to_string())),
        }
    }
}

#[async_trait]
impl Generator for LlmProvider {
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TokenStream> {
        tracing::debug!(purpose = %options.purpose, messages = messages.len(), "LLM stream call");
        self.client()?.complete_stream(messages, options).await
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Generation> {
        tracing::debug!(purpose = %options.purpose, messages = messages.len(), "LLM call");
        self.client()?.complete(messages, options).await
    }
}
