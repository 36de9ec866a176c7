use std::time::{Duration, Instant};

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionResponseStream, CompletionUsage, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
        CreateChatCompletionStreamResponse, FinishReason, ResponseFormat, ResponseFormatJsonSchema,
        Stop,
    },
    Client,
};
use futures::StreamExt;

use crate::{
    backends::{Generation, GenerationOptions, GenerationStats, StreamChunk, TokenStream},
    config::{parse_llm_provider_model, LlmConfig},
    error::{LexError, Result},
    models::{ChatMessage, Role},
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const VLLM_BASE_URL: &str = "http://localhost:8000/v1";

#[derive(Debug, Clone)]
struct ApiConfig {
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

#[derive(Clone)]
pub struct LlmApiClient {
    client: Client<OpenAIConfig>,
    config: ApiConfig,
}

impl LlmApiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_config = ApiConfig::from_llm_config(config);

        let (provider, _) = parse_llm_provider_model(&config.model);
        let needs_api_key = !matches!(
            provider.to_lowercase().as_str(),
            "ollama" | "local" | "lmstudio" | "vllm"
        );

        if needs_api_key && api_config.api_key.is_none() {
            return Err(LexError::Llm(
                "API key required for this provider".to_string(),
            ));
        }

        let openai_config = OpenAIConfig::new()
            .with_api_base(api_config.base_url.clone())
            .with_api_key(api_config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api_config.timeout_secs))
            .build()
            .map_err(|error| LexError::Llm(format!("Failed to create LLM HTTP client: {error}")))?;

        // async-openai retries server errors on its own for up to 15 minutes
        // unless told otherwise; keep it inside our timeout.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(api_config.timeout_secs)),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self {
            client,
            config: api_config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Non-streaming completion with retry on transient failures.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Generation> {
        let mut last_error: Option<LexError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(attempt)).await;
            }

            let request = self.build_request(messages, options, false)?;
            let started = Instant::now();

            match self.client.chat().create(request).await {
                Ok(response) => return Self::extract_generation(response, started),
                Err(error) => {
                    last_error = Some(self.retry_or_fail(error, attempt)?);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LexError::Llm("LLM completion failed after retries".to_string())))
    }

    /// Streaming completion. Retries happen only until the first chunk
    /// arrives; once tokens flow, an error ends the stream.
    pub async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TokenStream> {
        let mut last_error: Option<LexError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(attempt)).await;
            }

            let request = self.build_request(messages, options, true)?;
            let started = Instant::now();

            let mut stream = match self.client.chat().create_stream(request).await {
                Ok(stream) => stream,
                Err(error) => {
                    last_error = Some(self.retry_or_fail(error, attempt)?);
                    continue;
                }
            };

            match stream.next().await {
                Some(Ok(first)) => return Ok(Self::token_stream(Some(first), stream, started)),
                Some(Err(error)) => {
                    last_error = Some(self.retry_or_fail(error, attempt)?);
                }
                None => return Ok(Self::token_stream(None, stream, started)),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LexError::Llm("LLM streaming completion failed after retries".to_string())
        }))
    }

    /// Returns the mapped error when another attempt is allowed, or fails
    /// straight away for rate limits, auth failures and non-retryable errors.
    fn retry_or_fail(&self, error: OpenAIError, attempt: u32) -> Result<LexError> {
        if let Some(rate_limit_error) = Self::rate_limit_error(&error) {
            return Err(rate_limit_error);
        }

        if let Some(auth_error) = Self::auth_error(&error) {
            return Err(auth_error);
        }

        let retryable = Self::is_retryable(&error);
        let mapped_error = Self::map_openai_error(error);

        if retryable && attempt < self.config.max_retries {
            tracing::warn!(attempt, error = %mapped_error, "LLM call failed, retrying");
            return Ok(mapped_error);
        }

        Err(mapped_error)
    }

    fn token_stream(
        first: Option<CreateChatCompletionStreamResponse>,
        mut rest: ChatCompletionResponseStream,
        started: Instant,
    ) -> TokenStream {
        Box::pin(async_stream::stream! {
            let mut stats = GenerationStats::default();
            let mut pending = first;

            loop {
                let response = match pending.take() {
                    Some(response) => response,
                    None => match rest.next().await {
                        Some(Ok(response)) => response,
                        Some(Err(error)) => {
                            yield Err(Self::map_openai_error(error));
                            return;
                        }
                        None => break,
                    },
                };

                if let Some(usage) = response.usage.as_ref() {
                    Self::apply_usage(&mut stats, usage);
                }

                for choice in response.choices {
                    if let Some(reason) = choice.finish_reason {
                        stats.finish_reason = Some(finish_reason_name(reason));
                    }
                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                        yield Ok(StreamChunk::token(content));
                    }
                }
            }

            stats.latency_ms = started.elapsed().as_millis() as u64;
            yield Ok(StreamChunk::finished(stats));
        })
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest> {
        if messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(LexError::Validation("Prompt cannot be empty".to_string()));
        }

        let messages = messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(self.config.model.clone()).messages(messages);
        if stream {
            request.stream(true);
        }
        Self::apply_generation_options(&mut request, options);

        request.build().map_err(|error| {
            LexError::Validation(format!("Invalid LLM completion request: {error}"))
        })
    }

    fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
        let content = message.content.as_str();
        let built: ChatCompletionRequestMessage = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()
                .map_err(|error| LexError::Validation(format!("Invalid system prompt: {error}")))?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()
                .map_err(|error| LexError::Validation(format!("Invalid user prompt: {error}")))?
                .into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()
                .map_err(|error| {
                    LexError::Validation(format!("Invalid assistant message: {error}"))
                })?
                .into(),
        };
        Ok(built)
    }

    fn apply_generation_options(
        request: &mut CreateChatCompletionRequestArgs,
        options: &GenerationOptions,
    ) {
        if let Some(temperature) = options.temperature {
            request.temperature(temperature);
        }

        if let Some(max_tokens) = options.max_tokens {
            request.max_tokens(max_tokens);
        }

        if let Some(stop) = options.stop.as_ref().filter(|values| !values.is_empty()) {
            request.stop(Stop::StringArray(stop.clone()));
        }

        if let Some(spec) = options.json_schema.as_ref() {
            request.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: spec.name.clone(),
                    schema: Some(spec.schema.clone()),
                    strict: Some(true),
                },
            });
        }
    }

    fn extract_generation(
        response: CreateChatCompletionResponse,
        started: Instant,
    ) -> Result<Generation> {
        let mut stats = GenerationStats {
            latency_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };
        if let Some(usage) = response.usage.as_ref() {
            Self::apply_usage(&mut stats, usage);
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LexError::Llm("LLM response contained no choices".to_string()))?;

        stats.finish_reason = choice.finish_reason.map(finish_reason_name);
        let text = choice.message.content.unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LexError::Llm(
                "LLM response contained empty content".to_string(),
            ));
        }

        Ok(Generation { text, stats })
    }

    fn apply_usage(stats: &mut GenerationStats, usage: &CompletionUsage) {
        stats.prompt_tokens = Some(usage.prompt_tokens);
        stats.completion_tokens = Some(usage.completion_tokens);
    }

    fn is_retryable(error: &OpenAIError) -> bool {
        match error {
            OpenAIError::ApiError(api_error) => {
                api_error.r#type.is_none() && api_error.code.is_none()
            }
            OpenAIError::Reqwest(reqwest_error) => reqwest_error
                .status()
                .map(|status| status.is_server_error())
                .unwrap_or(true),
            OpenAIError::StreamError(_) => true,
            _ => false,
        }
    }

    fn rate_limit_error(error: &OpenAIError) -> Option<LexError> {
        match error {
            OpenAIError::Reqwest(reqwest_error)
                if reqwest_error.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) =>
            {
                Some(LexError::LlmRateLimit { retry_after: None })
            }
            OpenAIError::ApiError(api_error) if Self::is_rate_limit_api_error(api_error) => {
                Some(LexError::LlmRateLimit { retry_after: None })
            }
            _ => None,
        }
    }

    fn auth_error(error: &OpenAIError) -> Option<LexError> {
        match error {
            OpenAIError::Reqwest(reqwest_error)
                if reqwest_error.status() == Some(reqwest::StatusCode::UNAUTHORIZED)
                    || reqwest_error.status() == Some(reqwest::StatusCode::FORBIDDEN) =>
            {
                Some(LexError::Llm(format!(
                    "LLM authentication failed: {reqwest_error}"
                )))
            }
            OpenAIError::ApiError(api_error) if Self::is_auth_api_error(api_error) => Some(
                LexError::Llm(format!("LLM authentication failed: {api_error}")),
            ),
            _ => None,
        }
    }

    fn is_rate_limit_api_error(api_error: &ApiError) -> bool {
        let message = api_error.message.to_lowercase();
        let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
        let code = api_error.code.clone().unwrap_or_default().to_lowercase();

        message.contains("rate limit")
            || message.contains("too many requests")
            || error_type.contains("rate_limit")
            || code.contains("rate_limit")
            || code == "insufficient_quota"
    }

    fn is_auth_api_error(api_error: &ApiError) -> bool {
        let message = api_error.message.to_lowercase();
        let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
        let code = api_error.code.clone().unwrap_or_default().to_lowercase();

        message.contains("unauthorized")
            || message.contains("forbidden")
            || message.contains("authentication")
            || message.contains("invalid api key")
            || code.contains("invalid_api_key")
            || code.contains("authentication")
            || error_type.contains("authentication")
    }

    fn map_openai_error(error: OpenAIError) -> LexError {
        match error {
            OpenAIError::Reqwest(reqwest_error) => {
                LexError::Llm(format!("LLM request failed: {reqwest_error}"))
            }
            OpenAIError::ApiError(api_error) => {
                LexError::Llm(format!("LLM API error: {api_error}"))
            }
            OpenAIError::JSONDeserialize(err) => {
                LexError::Llm(format!("Failed to parse LLM response: {err}"))
            }
            OpenAIError::StreamError(message) => {
                LexError::Llm(format!("LLM stream failed: {message}"))
            }
            OpenAIError::InvalidArgument(message) => LexError::Validation(message),
            other => LexError::Llm(other.to_string()),
        }
    }
}

/// 100ms, 200ms, 400ms, ...
fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2_u64.pow(attempt.saturating_sub(1)))
}

fn finish_reason_name(reason: FinishReason) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

impl ApiConfig {
    fn from_llm_config(config: &LlmConfig) -> Self {
        let (provider, model) = parse_llm_provider_model(&config.model);

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        let normalized_model = if provider.eq_ignore_ascii_case("local") {
            config.model.clone()
        } else {
            model.to_string()
        };

        Self {
            base_url,
            api_key: config.api_key.clone(),
            model: normalized_model,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openai" => OPENAI_BASE_URL,
        "openrouter" => OPENROUTER_BASE_URL,
        "ollama" => OLLAMA_BASE_URL,
        "lmstudio" => "http://localhost:1234/v1",
        "vllm" => VLLM_BASE_URL,
        _ => OPENAI_BASE_URL,
    }
}
