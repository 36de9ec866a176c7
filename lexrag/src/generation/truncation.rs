use std::sync::Arc;

use crate::backends::{CallPurpose, GenerationOptions, Generator};
use crate::llm::prompts::TRUNCATION_INSTRUCTIONS;
use crate::models::{ChatMessage, ResponseMode, StructuredAnswer};

use super::structured::{answer_schema, parse_answer};

/// Answers shorter than this are treated as cut off.
pub const MIN_ANSWER_CHARS: usize = 150;
pub const MAX_TRUNCATION_RETRIES: u32 = 3;
const TEMPERATURE_STEP: f32 = 0.15;

pub fn is_truncated(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.chars().count() < MIN_ANSWER_CHARS || trimmed.ends_with(':')
}

#[derive(Debug, Clone, PartialEq)]
pub struct TruncationOutcome {
    pub answer: StructuredAnswer,
    pub raw: String,
    pub retries: u32,
    /// True when no attempt produced a complete answer.
    pub still_truncated: bool,
}

/// Regenerates answers that look cut off. The first complete candidate wins;
/// if none is complete the longest candidate seen is kept.
#[derive(Clone)]
pub struct TruncationGuard {
    generator: Arc<dyn Generator>,
    base_max_tokens: u32,
    base_temperature: f32,
}

impl TruncationGuard {
    pub fn new(generator: Arc<dyn Generator>, base_max_tokens: u32, base_temperature: f32) -> Self {
        Self {
            generator,
            base_max_tokens,
            base_temperature,
        }
    }

    /// `structured` selects whether regenerations are parsed as JSON answers
    /// (single attempt) or taken as plain text.
    pub async fn ensure_complete(
        &self,
        messages: &[ChatMessage],
        answer: StructuredAnswer,
        raw: String,
        mode: ResponseMode,
        structured: bool,
    ) -> TruncationOutcome {
        if !is_truncated(&answer.answer) {
            return TruncationOutcome {
                answer,
                raw,
                retries: 0,
                still_truncated: false,
            };
        }

        tracing::warn!(
            chars = answer.answer.trim().chars().count(),
            "Answer looks truncated, regenerating"
        );

        let mut best_complete: Option<(StructuredAnswer, String)> = None;
        let mut longest_truncated = (answer, raw);
        let mut retries = 0;

        for (index, instruction) in TRUNCATION_INSTRUCTIONS
            .iter()
            .take(MAX_TRUNCATION_RETRIES as usize)
            .enumerate()
        {
            retries += 1;
            let step = index as u32 + 1;

            let mut retry_messages = messages.to_vec();
            retry_messages.push(ChatMessage::assistant(longest_truncated.1.clone()));
            retry_messages.push(ChatMessage::user(*instruction));

            let mut options = GenerationOptions::for_purpose(CallPurpose::TruncationRetry)
                .max_tokens(self.base_max_tokens + self.base_max_tokens / 2 * step)
                .temperature((self.base_temperature + TEMPERATURE_STEP * step as f32).min(1.0));
            if structured {
                options = options.json_schema("structured_answer", answer_schema());
            }

            let text = match self.generator.chat(&retry_messages, &options).await {
                Ok(generation) => generation.text,
                Err(e) => {
                    tracing::warn!(attempt = step, error = %e, "Truncation retry failed");
                    continue;
                }
            };

            let candidate = if structured {
                match parse_answer(&text, mode) {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        tracing::warn!(attempt = step, error = %e, "Truncation retry unparseable");
                        continue;
                    }
                }
            } else {
                StructuredAnswer::plain(mode, text.trim())
            };

            let length = candidate.answer.trim().chars().count();
            if is_truncated(&candidate.answer) {
                if length > longest_truncated.0.answer.trim().chars().count() {
                    longest_truncated = (candidate, text);
                }
                continue;
            }

            best_complete = Some((candidate, text));
            break;
        }

        match best_complete {
            Some((answer, raw)) => {
                tracing::info!(retries, "Truncated answer regenerated");
                TruncationOutcome {
                    answer,
                    raw,
                    retries,
                    still_truncated: false,
                }
            }
            None => {
                tracing::warn!(retries, "No complete answer after truncation retries");
                TruncationOutcome {
                    answer: longest_truncated.0,
                    raw: longest_truncated.1,
                    retries,
                    still_truncated: true,
                }
            }
        }
    }
}
