use serde::Deserialize;
use std::sync::Arc;

use crate::backends::{CallPurpose, GenerationOptions, Generator};
use crate::config::MAX_CRITIC_ROUNDS;
use crate::llm::{parse_json_reply, prompts};
use crate::models::{ChatMessage, ResponseMode, StructuredAnswer};

use super::structured::{answer_schema, fallback_answer, parse_answer};

#[derive(Debug, Deserialize)]
struct Critique {
    ok: bool,
    #[serde(default)]
    feedback: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CriticOutcome {
    /// The critic accepted the candidate (original or revised).
    Approved {
        answer: StructuredAnswer,
        rounds: u32,
        revised: bool,
    },
    /// Still rejected after the last round.
    Exhausted {
        fallback: StructuredAnswer,
        rounds: u32,
        feedback: String,
    },
}

impl CriticOutcome {
    pub fn rounds(&self) -> u32 {
        match self {
            Self::Approved { rounds, .. } | Self::Exhausted { rounds, .. } => *rounds,
        }
    }

    pub fn into_answer(self) -> StructuredAnswer {
        match self {
            Self::Approved { answer, .. } => answer,
            Self::Exhausted { fallback, .. } => fallback,
        }
    }
}

/// Bounded critique and revision of a parsed structured answer.
#[derive(Clone)]
pub struct CriticReviser {
    generator: Arc<dyn Generator>,
    max_rounds: u32,
    max_tokens: u32,
    temperature: f32,
    refusal_template: String,
}

impl CriticReviser {
    /// `max_rounds` is capped at [`MAX_CRITIC_ROUNDS`].
    pub fn new(
        generator: Arc<dyn Generator>,
        max_rounds: u32,
        max_tokens: u32,
        temperature: f32,
        refusal_template: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            max_rounds: max_rounds.min(MAX_CRITIC_ROUNDS),
            max_tokens,
            temperature,
            refusal_template: refusal_template.into(),
        }
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// A failed or unreadable critique approves the current candidate. A
    /// revision that does not parse leaves the candidate unchanged. No revision
    /// is requested after the last round's critique. Zero rounds approves the
    /// candidate without any critique call.
    pub async fn review(
        &self,
        question: &str,
        context: &str,
        answer: StructuredAnswer,
        mode: ResponseMode,
        trail: &mut Vec<String>,
    ) -> CriticOutcome {
        let mut candidate = answer;
        let mut revised = false;
        let mut feedback = String::new();

        if self.max_rounds == 0 {
            return CriticOutcome::Approved {
                answer: candidate,
                rounds: 0,
                revised,
            };
        }

        for round in 1..=self.max_rounds {
            let critique = match self.critique(question, context, &candidate).await {
                Some(critique) => critique,
                None => {
                    trail.push(format!("Granskning runda {round} misslyckades, svaret godtogs"));
                    return CriticOutcome::Approved {
                        answer: candidate,
                        rounds: round,
                        revised,
                    };
                }
            };

            if critique.ok {
                tracing::info!(round, revised, "Critic approved answer");
                return CriticOutcome::Approved {
                    answer: candidate,
                    rounds: round,
                    revised,
                };
            }

            feedback = critique.feedback;
            tracing::info!(round, feedback_chars = feedback.len(), "Critic rejected answer");
            trail.push(format!("Granskning runda {round}: {}", feedback.trim()));

            if round == self.max_rounds {
                break;
            }

            if let Some(revision) = self.revise(question, context, &candidate, &feedback, mode).await {
                candidate = revision;
                revised = true;
            }
        }

        tracing::warn!(rounds = self.max_rounds, "Critic rounds exhausted, using fallback");
        trail.push("Granskningen godkände inte svaret, reservsvar används".to_string());
        CriticOutcome::Exhausted {
            fallback: fallback_answer(mode, &self.refusal_template),
            rounds: self.max_rounds,
            feedback,
        }
    }

    async fn critique(
        &self,
        question: &str,
        context: &str,
        candidate: &StructuredAnswer,
    ) -> Option<Critique> {
        let messages = [ChatMessage::user(prompts::critique_prompt(
            question,
            &candidate.to_public_json(),
            context,
        ))];
        let options = GenerationOptions::for_purpose(CallPurpose::Critique)
            .temperature(0.0)
            .max_tokens(400);

        let generation = match self.generator.chat(&messages, &options).await {
            Ok(generation) => generation,
            Err(e) => {
                tracing::warn!(error = %e, "Critique call failed, approving candidate");
                return None;
            }
        };

        match parse_json_reply::<Critique>(&generation.text) {
            Ok(critique) => Some(critique),
            Err(e) => {
                tracing::warn!(error = %e, "Critique unreadable, approving candidate");
                None
            }
        }
    }

    async fn revise(
        &self,
        question: &str,
        context: &str,
        candidate: &StructuredAnswer,
        feedback: &str,
        mode: ResponseMode,
    ) -> Option<StructuredAnswer> {
        let messages = [ChatMessage::user(prompts::revise_prompt(
            question,
            &candidate.to_public_json(),
            feedback,
            context,
        ))];
        let options = GenerationOptions::for_purpose(CallPurpose::Revise)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .json_schema("structured_answer", answer_schema());

        let text = match self.generator.chat(&messages, &options).await {
            Ok(generation) => generation.text,
            Err(e) => {
                tracing::warn!(error = %e, "Revise call failed, keeping candidate");
                return None;
            }
        };

        match parse_answer(&text, mode) {
            Ok(revision) => Some(revision),
            Err(e) => {
                tracing::warn!(error = %e, "Revision unparseable, keeping candidate");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{GenerationStats, StreamChunk, TokenStream};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Replies from a queue per call purpose; missing entries yield "{}".
    struct Queued {
        replies: Mutex<HashMap<CallPurpose, Vec<&'static str>>>,
        calls: Mutex<Vec<CallPurpose>>,
    }

    impl Queued {
        fn new(replies: &[(CallPurpose, &'static str)]) -> Self {
            let mut map: HashMap<CallPurpose, Vec<&'static str>> = HashMap::new();
            for (purpose, reply) in replies {
                map.entry(*purpose).or_default().push(*reply);
            }
            Self {
                replies: Mutex::new(map),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self, purpose: CallPurpose) -> usize {
            self.calls.lock().unwrap().iter().filter(|p| **p == purpose).count()
        }
    }

    #[async_trait]
    impl Generator for Queued {
        async fn chat_stream(
            &self,
            _messages: &[ChatMessage],
            options: &GenerationOptions,
        ) -> Result<TokenStream> {
            self.calls.lock().unwrap().push(options.purpose);
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                let queue = replies.entry(options.purpose).or_default();
                if queue.is_empty() {
                    "{}"
                } else {
                    queue.remove(0)
                }
            };
            let chunks = vec![
                Ok(StreamChunk::token(reply)),
                Ok(StreamChunk::finished(GenerationStats::default())),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    const REVISED: &str = r#"{"mode": "ASSIST", "evidenceLacking": false, "answer": "Reviderat svar [1].", "sources": [], "unsourcedFacts": []}"#;

    fn reviser(generator: Arc<Queued>, rounds: u32) -> CriticReviser {
        CriticReviser::new(generator, rounds, 512, 0.2, "Underlag saknas.")
    }

    fn candidate() -> StructuredAnswer {
        StructuredAnswer::plain(ResponseMode::Assist, "Första svaret [1].")
    }

    #[tokio::test]
    async fn test_approved_first_round() {
        let generator = Arc::new(Queued::new(&[(CallPurpose::Critique, r#"{"ok": true, "feedback": ""}"#)]));
        let mut trail = Vec::new();
        let outcome = reviser(generator.clone(), 2)
            .review("fråga", "ctx", candidate(), ResponseMode::Assist, &mut trail)
            .await;

        assert_eq!(
            outcome,
            CriticOutcome::Approved {
                answer: candidate(),
                rounds: 1,
                revised: false
            }
        );
        assert_eq!(generator.calls(CallPurpose::Revise), 0);
    }

    #[tokio::test]
    async fn test_revision_then_approval() {
        let generator = Arc::new(Queued::new(&[
            (CallPurpose::Critique, r#"{"ok": false, "feedback": "Citat saknas"}"#),
            (CallPurpose::Critique, r#"{"ok": true}"#),
            (CallPurpose::Revise, REVISED),
        ]));
        let mut trail = Vec::new();
        let outcome = reviser(generator, 2)
            .review("fråga", "ctx", candidate(), ResponseMode::Assist, &mut trail)
            .await;

        match outcome {
            CriticOutcome::Approved { answer, rounds, revised } => {
                assert_eq!(answer.answer, "Reviderat svar [1].");
                assert_eq!(rounds, 2);
                assert!(revised);
            }
            other => panic!("expected approval, got {other:?}"),
        }
        assert_eq!(trail, vec!["Granskning runda 1: Citat saknas".to_string()]);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_fallback() {
        let generator = Arc::new(Queued::new(&[
            (CallPurpose::Critique, r#"{"ok": false, "feedback": "fel 1"}"#),
            (CallPurpose::Critique, r#"{"ok": false, "feedback": "fel 2"}"#),
            (CallPurpose::Revise, REVISED),
        ]));
        let mut trail = Vec::new();
        let outcome = reviser(generator.clone(), 5)
            .review("fråga", "ctx", candidate(), ResponseMode::Evidence, &mut trail)
            .await;

        assert_eq!(outcome.rounds(), MAX_CRITIC_ROUNDS);
        let answer = outcome.into_answer();
        assert_eq!(answer.answer, "Underlag saknas.");
        assert!(answer.sources.is_empty());
        assert_eq!(generator.calls(CallPurpose::Critique), 2);
        assert_eq!(generator.calls(CallPurpose::Revise), 1);
    }

    #[tokio::test]
    async fn test_unreadable_critique_fails_open() {
        let generator = Arc::new(Queued::new(&[(CallPurpose::Critique, "ingen json")]));
        let mut trail = Vec::new();
        let outcome = reviser(generator, 2)
            .review("fråga", "ctx", candidate(), ResponseMode::Assist, &mut trail)
            .await;

        assert!(matches!(outcome, CriticOutcome::Approved { rounds: 1, .. }));
        assert_eq!(trail.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_rounds_approves_without_critique() {
        let generator = Arc::new(Queued::new(&[(CallPurpose::Critique, r#"{"ok": false, "feedback": "fel"}"#)]));
        let mut trail = Vec::new();
        let outcome = reviser(generator.clone(), 0)
            .review("fråga", "ctx", candidate(), ResponseMode::Assist, &mut trail)
            .await;

        assert_eq!(
            outcome,
            CriticOutcome::Approved {
                answer: candidate(),
                rounds: 0,
                revised: false
            }
        );
        assert_eq!(generator.calls(CallPurpose::Critique), 0);
        assert!(trail.is_empty());
    }
}
