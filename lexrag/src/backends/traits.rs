use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::Intent;
use crate::error::Result;
use crate::models::{ChatMessage, RerankOutcome, RetrievalOutcome, RetrievedDocument, SearchFilter};

/// What a generation call is for. Carried through to logs, and used by
/// test doubles to script replies per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    #[default]
    Answer,
    Grading,
    Reflection,
    Decontextualize,
    Repair,
    Reformat,
    Critique,
    Revise,
    TruncationRetry,
}

impl std::fmt::Display for CallPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Answer => "answer",
            Self::Grading => "grading",
            Self::Reflection => "reflection",
            Self::Decontextualize => "decontextualize",
            Self::Repair => "repair",
            Self::Reformat => "reformat",
            Self::Critique => "critique",
            Self::Revise => "revise",
            Self::TruncationRetry => "truncation_retry",
        };
        f.write_str(name)
    }
}

/// A JSON schema the server should constrain its output to.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchemaSpec {
    pub name: String,
    pub schema: Value,
}

/// Per-call overrides for the generation backend.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub purpose: CallPurpose,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub json_schema: Option<JsonSchemaSpec>,
}

impl GenerationOptions {
    pub fn for_purpose(purpose: CallPurpose) -> Self {
        Self {
            purpose,
            ..Default::default()
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json_schema(mut self, name: &str, schema: Value) -> Self {
        self.json_schema = Some(JsonSchemaSpec {
            name: name.to_string(),
            schema,
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub finish_reason: Option<String>,
    pub latency_ms: u64,
}

/// One element of a generation stream. The final element carries stats and
/// an empty token.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub token: String,
    pub stats: Option<GenerationStats>,
}

impl StreamChunk {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            stats: None,
        }
    }

    pub fn finished(stats: GenerationStats) -> Self {
        Self {
            token: String::new(),
            stats: Some(stats),
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// A completed generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    pub stats: GenerationStats,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search_with_routing(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
        history: &[ChatMessage],
    ) -> Result<RetrievalOutcome>;
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Returns at most `top_k` documents, best first, with one score each.
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<RetrievedDocument>,
        top_k: usize,
    ) -> Result<RerankOutcome>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TokenStream>;

    /// Runs the call to completion. The default drains `chat_stream`.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Generation> {
        let mut stream = self.chat_stream(messages, options).await?;
        let mut generation = Generation::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            generation.text.push_str(&chunk.token);
            if let Some(stats) = chunk.stats {
                generation.stats = stats;
            }
        }

        Ok(generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub intent: Intent,
    pub question: String,
    pub answer: String,
}

#[async_trait]
pub trait ExampleStore: Send + Sync {
    async fn examples_for(&self, intent: Intent, limit: usize) -> Result<Vec<FewShotExample>>;
}
