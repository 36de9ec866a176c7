use serde::{Deserialize, Serialize};

use super::answer::StructuredAnswer;
use super::document::RetrievedDocument;
use super::grading::GradingMetrics;
use super::query::ResponseMode;
use super::verdict::{EvidenceLevel, GuardrailVerdict};
use crate::classify::Intent;
use crate::error::LexError;

/// How a request ended, as seen by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Answered,
    /// Evidence was insufficient; the refusal template was returned.
    Refused,
    /// Harm, injection, anomaly or rate-limit rejection.
    Blocked,
    /// Self-harm signal; crisis resources were returned instead of an answer.
    Compassionate,
    /// Internal or collaborator failure; the generic failure text was returned.
    Failed,
}

/// Per-stage latencies and counts for one run. Built by
/// [`MetricsRecorder`](crate::services::MetricsRecorder) and frozen when the
/// run completes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineMetrics {
    pub total_ms: u64,
    pub safety_ms: u64,
    pub classify_ms: u64,
    pub decontextualize_ms: u64,
    pub retrieval_ms: u64,
    pub rerank_ms: u64,
    pub generation_ms: u64,
    pub postprocess_ms: u64,
    pub guardrail_ms: u64,
    pub documents_retrieved: usize,
    pub documents_after_grading: usize,
    pub documents_after_rerank: usize,
    pub sources_dropped: usize,
    pub context_tokens: usize,
    pub grading: Option<GradingMetrics>,
    pub parse_attempts: u32,
    pub parse_error: bool,
    pub truncation_retries: u32,
    pub critic_rounds: u32,
    pub critic_exhausted: bool,
    pub corrections: usize,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// A source as exposed to the caller alongside the answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub id: String,
    pub title: String,
    pub source: String,
    pub score: f32,
}

impl From<&RetrievedDocument> for SourceRef {
    fn from(document: &RetrievedDocument) -> Self {
        Self {
            id: document.id.clone(),
            title: document.title.clone(),
            source: document.source.clone(),
            score: document.score,
        }
    }
}

/// Complete, well-typed result of a run. Every path (answer, refusal,
/// rejection, failure) produces one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagResult {
    pub answer: String,
    pub outcome: Outcome,
    pub mode: ResponseMode,
    pub intent: Intent,
    pub evidence_level: EvidenceLevel,
    pub evidence_lacking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<StructuredAnswer>,
    pub sources: Vec<SourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail: Option<GuardrailVerdict>,
    /// Reasoning trail for refusals and degraded paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning: Vec<String>,
    pub metrics: PipelineMetrics,
}

impl RagResult {
    fn bare(answer: &str, outcome: Outcome, mode: ResponseMode, metrics: PipelineMetrics) -> Self {
        Self {
            answer: answer.to_string(),
            outcome,
            mode,
            intent: Intent::General,
            evidence_level: EvidenceLevel::None,
            evidence_lacking: false,
            structured: None,
            sources: Vec::new(),
            guardrail: None,
            reasoning: Vec::new(),
            metrics,
        }
    }

    /// Converts any error into the fixed, non-leaking failure shape.
    pub fn from_error(error: &LexError, mode: ResponseMode, metrics: PipelineMetrics) -> Self {
        let outcome = if error.is_security_violation() {
            Outcome::Blocked
        } else {
            Outcome::Failed
        };
        Self::bare(error.user_message(), outcome, mode, metrics)
    }

    pub fn blocked(message: &str, mode: ResponseMode, metrics: PipelineMetrics) -> Self {
        Self::bare(message, Outcome::Blocked, mode, metrics)
    }

    pub fn compassionate(message: &str, mode: ResponseMode, metrics: PipelineMetrics) -> Self {
        Self::bare(message, Outcome::Compassionate, mode, metrics)
    }
}
