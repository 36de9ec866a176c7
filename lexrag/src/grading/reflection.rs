use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::backends::{CallPurpose, GenerationOptions, Generator};
use crate::llm::{parse_json_reply, prompts};
use crate::models::ChatMessage;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReflectionVerdict {
    pub sufficient: bool,
    /// Kinds of evidence the model judged missing.
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    /// True when the call failed and the verdict defaulted to sufficient.
    #[serde(skip)]
    pub degraded: bool,
}

impl ReflectionVerdict {
    fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            sufficient: true,
            missing: Vec::new(),
            reasoning: reason.into(),
            degraded: true,
        }
    }

    /// Lines for the reasoning trail shown with a refusal.
    pub fn trail(&self) -> Vec<String> {
        let mut trail = Vec::new();
        if !self.reasoning.trim().is_empty() {
            trail.push(format!("Självreflektion: {}", self.reasoning.trim()));
        }
        trail.extend(self.missing.iter().map(|m| format!("Saknat underlag: {m}")));
        trail
    }
}

/// One extra generation call judging whether the graded sources suffice.
#[derive(Clone)]
pub struct SelfReflector {
    generator: Arc<dyn Generator>,
    timeout: Duration,
}

impl SelfReflector {
    pub fn new(generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Fails open: an error, timeout or unreadable reply counts as sufficient.
    pub async fn reflect(&self, question: &str, context: &str) -> ReflectionVerdict {
        let messages = [ChatMessage::user(prompts::reflection_prompt(question, context))];
        let options = GenerationOptions::for_purpose(CallPurpose::Reflection)
            .temperature(0.0)
            .max_tokens(300);

        let generation =
            match tokio::time::timeout(self.timeout, self.generator.chat(&messages, &options)).await {
                Ok(Ok(generation)) => generation,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Self-reflection failed, continuing");
                    return ReflectionVerdict::fail_open("självreflektion misslyckades");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Self-reflection timed out, continuing"
                    );
                    return ReflectionVerdict::fail_open("självreflektion tog för lång tid");
                }
            };

        match parse_json_reply::<ReflectionVerdict>(&generation.text) {
            Ok(verdict) => {
                tracing::info!(
                    sufficient = verdict.sufficient,
                    missing = verdict.missing.len(),
                    "Self-reflection complete"
                );
                verdict
            }
            Err(e) => {
                tracing::warn!(error = %e, "Self-reflection reply unreadable, continuing");
                ReflectionVerdict::fail_open("självreflektionens svar kunde inte tolkas")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{GenerationStats, StreamChunk, TokenStream};
    use crate::error::{LexError, Result};
    use async_trait::async_trait;

    struct Fixed(std::result::Result<&'static str, ()>);

    #[async_trait]
    impl Generator for Fixed {
        async fn chat_stream(
            &self,
            _messages: &[ChatMessage],
            _options: &GenerationOptions,
        ) -> Result<TokenStream> {
            let text = self.0.map_err(|_| LexError::Llm("down".to_string()))?;
            let chunks = vec![
                Ok(StreamChunk::token(text)),
                Ok(StreamChunk::finished(GenerationStats::default())),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn reflector(reply: std::result::Result<&'static str, ()>) -> SelfReflector {
        SelfReflector::new(Arc::new(Fixed(reply)), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_insufficient_verdict_with_missing_categories() {
        let verdict = reflector(Ok(
            r#"{"sufficient": false, "missing": ["förarbeten", "praxis"], "reasoning": "Endast en paragraf"}"#,
        ))
        .reflect("fråga", "[1] text")
        .await;

        assert!(!verdict.sufficient);
        assert!(!verdict.degraded);
        assert_eq!(
            verdict.trail(),
            vec![
                "Självreflektion: Endast en paragraf".to_string(),
                "Saknat underlag: förarbeten".to_string(),
                "Saknat underlag: praxis".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_fail_open() {
        let verdict = reflector(Err(())).reflect("fråga", "ctx").await;
        assert!(verdict.sufficient);
        assert!(verdict.degraded);

        let verdict = reflector(Ok("inte json")).reflect("fråga", "ctx").await;
        assert!(verdict.sufficient);
        assert!(verdict.degraded);
    }
}
