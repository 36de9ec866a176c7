//! Structured answer parsing with a three-step escalation: parse the raw
//! reply, ask the model to repair it, then ask for a formatting-only
//! conversion. Exhaustion yields a fixed per-mode fallback.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::backends::{CallPurpose, GenerationOptions, Generator};
use crate::error::{LexError, Result};
use crate::llm::{extract_json_object, prompts};
use crate::models::{ChatMessage, ResponseMode, StructuredAnswer};

/// Shown when no structured answer could be recovered outside EVIDENCE mode.
pub const PARSE_FALLBACK_MESSAGE: &str =
    "Svaret kunde inte tolkas korrekt. Försök att omformulera frågan.";

pub const MAX_PARSE_ATTEMPTS: u32 = 3;

/// JSON schema sent to the generation server for constrained decoding.
pub fn answer_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "mode": {"type": "string", "enum": ["CHAT", "ASSIST", "EVIDENCE"]},
            "evidenceLacking": {"type": "boolean"},
            "answer": {"type": "string"},
            "sources": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "docId": {"type": "string"},
                        "chunkId": {"type": "string"},
                        "quote": {"type": "string"},
                        "location": {"type": "string"}
                    },
                    "required": ["docId", "chunkId", "quote", "location"],
                    "additionalProperties": false
                }
            },
            "unsourcedFacts": {"type": "array", "items": {"type": "string"}},
            "selfCheck": {"type": "string"}
        },
        "required": ["mode", "evidenceLacking", "answer", "sources", "unsourcedFacts", "selfCheck"],
        "additionalProperties": false
    })
}

/// The fallback shape used when parsing or critique is exhausted.
pub fn fallback_answer(mode: ResponseMode, refusal_template: &str) -> StructuredAnswer {
    if mode.is_evidence_bound() {
        StructuredAnswer::refusal(mode, refusal_template)
    } else {
        StructuredAnswer::plain(mode, PARSE_FALLBACK_MESSAGE)
    }
}

/// One parse attempt: JSON extraction, deserialization and mode invariants.
/// The answer's mode is always the requested mode.
pub fn parse_answer(raw: &str, mode: ResponseMode) -> Result<StructuredAnswer> {
    let json = extract_json_object(raw)
        .ok_or_else(|| LexError::Validation("svaret innehåller inget JSON-objekt".to_string()))?;

    let mut answer: StructuredAnswer = serde_json::from_str(json)
        .map_err(|e| LexError::Validation(format!("ogiltig JSON: {e}")))?;

    if answer.answer.trim().is_empty() {
        return Err(LexError::Validation("fältet \"answer\" är tomt".to_string()));
    }

    if mode.is_evidence_bound() && !answer.unsourced_facts.is_empty() {
        return Err(LexError::Validation(format!(
            "\"unsourcedFacts\" måste vara tom i EVIDENCE-läge men innehöll {} påstående(n)",
            answer.unsourced_facts.len()
        )));
    }

    answer.mode = mode;
    Ok(answer)
}

/// Result of the parse escalation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed {
        answer: StructuredAnswer,
        /// Raw text the answer was parsed from.
        raw: String,
        attempts: u32,
    },
    Exhausted {
        fallback: StructuredAnswer,
        attempts: u32,
        last_error: String,
    },
}

impl ParseOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Parsed { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed { .. })
    }
}

#[derive(Clone)]
pub struct StructuredOutputParser {
    generator: Arc<dyn Generator>,
    max_tokens: u32,
    temperature: f32,
    refusal_template: String,
}

impl StructuredOutputParser {
    pub fn new(
        generator: Arc<dyn Generator>,
        max_tokens: u32,
        temperature: f32,
        refusal_template: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            max_tokens,
            temperature,
            refusal_template: refusal_template.into(),
        }
    }

    /// `messages` is the conversation that produced `raw`.
    pub async fn parse_with_retry(
        &self,
        messages: &[ChatMessage],
        raw: String,
        mode: ResponseMode,
    ) -> ParseOutcome {
        let mut current = raw;
        let mut last_error = String::new();

        for attempt in 1..=MAX_PARSE_ATTEMPTS {
            if attempt > 1 {
                match self.regenerate(attempt, messages, &current, &last_error, mode).await {
                    Ok(text) => current = text,
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "Structured output retry call failed");
                        last_error = e.to_string();
                        continue;
                    }
                }
            }

            match parse_answer(&current, mode) {
                Ok(answer) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Structured output recovered");
                    }
                    return ParseOutcome::Parsed {
                        answer,
                        raw: current,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    tracing::warn!(attempt, %mode, error = %e, "Structured output parse failed");
                    last_error = e.to_string();
                }
            }
        }

        tracing::error!(%mode, error = %last_error, "Structured output exhausted, using fallback");
        ParseOutcome::Exhausted {
            fallback: fallback_answer(mode, &self.refusal_template),
            attempts: MAX_PARSE_ATTEMPTS,
            last_error,
        }
    }

    async fn regenerate(
        &self,
        attempt: u32,
        messages: &[ChatMessage],
        previous: &str,
        error: &str,
        mode: ResponseMode,
    ) -> Result<String> {
        let (messages, options) = if attempt == 2 {
            let mut repair = messages.to_vec();
            repair.push(ChatMessage::assistant(previous));
            repair.push(ChatMessage::user(prompts::repair_prompt(previous, error)));
            let options = GenerationOptions::for_purpose(CallPurpose::Repair)
                .temperature(self.temperature)
                .max_tokens(self.max_tokens)
                .json_schema("structured_answer", answer_schema());
            (repair, options)
        } else {
            let reformat = vec![ChatMessage::user(prompts::reformat_prompt(previous, mode))];
            let options = GenerationOptions::for_purpose(CallPurpose::Reformat)
                .temperature(0.0)
                .max_tokens(self.max_tokens)
                .json_schema("structured_answer", answer_schema());
            (reformat, options)
        };

        Ok(self.generator.chat(&messages, &options).await?.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"mode": "ASSIST", "evidenceLacking": false, "answer": "Svar [1].", "sources": [], "unsourcedFacts": ["allmän kunskap"], "selfCheck": "ok"}"#;

    #[test]
    fn test_parse_answer_overrides_mode() {
        let answer = parse_answer(VALID, ResponseMode::Assist).unwrap();
        assert_eq!(answer.mode, ResponseMode::Assist);
        assert_eq!(answer.unsourced_facts.len(), 1);
    }

    #[test]
    fn test_evidence_mode_rejects_unsourced_facts() {
        let err = parse_answer(VALID, ResponseMode::Evidence).unwrap_err();
        assert!(err.to_string().contains("unsourcedFacts"));
    }

    #[test]
    fn test_empty_answer_is_invalid() {
        let raw = r#"{"mode": "ASSIST", "evidenceLacking": false, "answer": "  ", "sources": [], "unsourcedFacts": []}"#;
        assert!(parse_answer(raw, ResponseMode::Assist).is_err());
        assert!(parse_answer("Bara text", ResponseMode::Assist).is_err());
    }

    #[test]
    fn test_fallback_shapes() {
        let evidence = fallback_answer(ResponseMode::Evidence, "Underlag saknas.");
        assert_eq!(evidence.answer, "Underlag saknas.");
        assert!(evidence.evidence_lacking);
        assert!(evidence.sources.is_empty());

        let assist = fallback_answer(ResponseMode::Assist, "Underlag saknas.");
        assert_eq!(assist.answer, PARSE_FALLBACK_MESSAGE);
        assert!(!assist.evidence_lacking);
    }

    #[test]
    fn test_schema_requires_answer_fields() {
        let schema = answer_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"unsourcedFacts"));
        assert!(required.contains(&"evidenceLacking"));
    }
}
