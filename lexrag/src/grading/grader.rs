use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use regex::Regex;

use crate::backends::{CallPurpose, GenerationOptions, Generator};
use crate::error::Result;
use crate::llm::{extract_json_object, prompts};
use crate::models::{ChatMessage, GradeResult, GradeSource, RetrievedDocument};

const STRUCTURED_CONFIDENCE: f32 = 0.9;
const KEYWORD_CONFIDENCE: f32 = 0.5;
const KEYWORD_RELEVANT_SCORE: f32 = 0.6;
const GRADING_MAX_TOKENS: u32 = 120;
/// Snippets are cut to keep grading prompts small.
const MAX_SNIPPET_CHARS: usize = 1500;

static NEGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)("no"|\bnej\b|\bno\b|inte relevant|ej relevant|irrelevant|not relevant)"#)
        .expect("negative grade pattern")
});

static POSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)("yes"|\bja\b|\byes\b|\brelevant\b)"#).expect("positive grade pattern")
});

#[derive(Debug, Deserialize)]
struct GradeReply {
    verdict: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    reason: String,
}

fn grade_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string", "enum": ["yes", "no"]},
            "score": {"type": "number", "minimum": 0, "maximum": 1},
            "reason": {"type": "string"}
        },
        "required": ["verdict", "score", "reason"],
        "additionalProperties": false
    })
}

/// Reads a grade from model output. Never fails: output that is not the
/// constrained JSON form is scanned for keywords, and output with no usable
/// signal is graded not relevant.
pub fn parse_grade(doc_id: &str, raw: &str, threshold: f32, latency_ms: u64) -> GradeResult {
    let structured = extract_json_object(raw)
        .and_then(|json| serde_json::from_str::<GradeReply>(json).ok())
        .and_then(|reply| {
            let verdict = reply.verdict.trim().to_lowercase();
            let yes = match verdict.as_str() {
                "yes" => true,
                "no" => false,
                _ => return None,
            };
            let score = reply
                .score
                .unwrap_or(if yes { 1.0 } else { 0.0 })
                .clamp(0.0, 1.0);
            Some((yes, score, reply.reason))
        });

    if let Some((yes, score, reason)) = structured {
        return GradeResult {
            doc_id: doc_id.to_string(),
            relevant: yes && score >= threshold,
            reason,
            score,
            confidence: STRUCTURED_CONFIDENCE,
            latency_ms,
            source: GradeSource::Structured,
        };
    }

    let positive = !NEGATIVE.is_match(raw) && POSITIVE.is_match(raw);
    let score = if positive { KEYWORD_RELEVANT_SCORE } else { 0.0 };
    GradeResult {
        doc_id: doc_id.to_string(),
        relevant: positive && score >= threshold,
        reason: "keyword fallback".to_string(),
        score,
        confidence: KEYWORD_CONFIDENCE,
        latency_ms,
        source: GradeSource::Keyword,
    }
}

/// Judges the relevance of one document with one generation call.
#[derive(Clone)]
pub struct DocumentGrader {
    generator: Arc<dyn Generator>,
    threshold: f32,
}

impl DocumentGrader {
    pub fn new(generator: Arc<dyn Generator>, threshold: f32) -> Self {
        Self {
            generator,
            threshold,
        }
    }

    pub async fn grade(&self, question: &str, document: &RetrievedDocument) -> Result<GradeResult> {
        let start = Instant::now();
        let snippet: String = document.snippet.chars().take(MAX_SNIPPET_CHARS).collect();
        let messages = [ChatMessage::user(prompts::grading_prompt(
            question,
            &document.title,
            &snippet,
        ))];
        let options = GenerationOptions::for_purpose(CallPurpose::Grading)
            .temperature(0.0)
            .max_tokens(GRADING_MAX_TOKENS)
            .json_schema("relevance_grade", grade_schema());

        let generation = self.generator.chat(&messages, &options).await?;
        let grade = parse_grade(
            &document.id,
            &generation.text,
            self.threshold,
            start.elapsed().as_millis() as u64,
        );

        tracing::debug!(
            doc_id = %grade.doc_id,
            relevant = grade.relevant,
            score = grade.score,
            source = ?grade.source,
            "Document graded"
        );

        Ok(grade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_grade() {
        let grade = parse_grade(
            "d1",
            r#"{"verdict": "yes", "score": 0.82, "reason": "Handlar om uppsägning"}"#,
            0.5,
            12,
        );
        assert!(grade.relevant);
        assert_eq!(grade.source, GradeSource::Structured);
        assert_eq!(grade.confidence, STRUCTURED_CONFIDENCE);
        assert_eq!(grade.reason, "Handlar om uppsägning");
        assert_eq!(grade.latency_ms, 12);
    }

    #[test]
    fn test_structured_yes_below_threshold_is_not_relevant() {
        let grade = parse_grade("d1", r#"{"verdict": "yes", "score": 0.3, "reason": ""}"#, 0.5, 0);
        assert!(!grade.relevant);
        assert_eq!(grade.source, GradeSource::Structured);
    }

    #[test]
    fn test_structured_no() {
        let grade = parse_grade("d1", r#"```json
{"verdict": "NO", "reason": "Annat rättsområde"}
```"#, 0.5, 0);
        assert!(!grade.relevant);
        assert_eq!(grade.score, 0.0);
        assert_eq!(grade.source, GradeSource::Structured);
    }

    #[test]
    fn test_unknown_verdict_falls_back_to_keywords() {
        let grade = parse_grade("d1", r#"{"verdict": "maybe"} ja, relevant"#, 0.5, 0);
        assert_eq!(grade.source, GradeSource::Keyword);
        assert!(grade.relevant);
        assert_eq!(grade.confidence, KEYWORD_CONFIDENCE);
    }

    #[test]
    fn test_keyword_fallback_prefers_negative() {
        let grade = parse_grade("d1", "Dokumentet är inte relevant för frågan.", 0.5, 0);
        assert!(!grade.relevant);
        assert_eq!(grade.source, GradeSource::Keyword);

        let grade = parse_grade("d1", "Yes, this document is relevant", 0.5, 0);
        assert!(grade.relevant);
        assert_eq!(grade.score, KEYWORD_RELEVANT_SCORE);
    }

    #[test]
    fn test_keyword_fallback_respects_threshold() {
        let grade = parse_grade("d1", "Ja, dokumentet är relevant.", 0.7, 0);
        assert_eq!(grade.source, GradeSource::Keyword);
        assert_eq!(grade.score, KEYWORD_RELEVANT_SCORE);
        assert!(!grade.relevant);

        let grade = parse_grade("d1", "Ja, dokumentet är relevant.", 0.6, 0);
        assert!(grade.relevant);
    }

    #[test]
    fn test_garbage_never_fails() {
        for raw in ["", "{{{", "???", "\u{0}"] {
            let grade = parse_grade("d1", raw, 0.5, 0);
            assert!(!grade.relevant);
        }
    }
}
