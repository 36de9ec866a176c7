use serde::Serialize;

use crate::classify::Intent;
use crate::models::{
    AppliedCorrection, EvidenceLevel, GradingMetrics, GuardrailStatus, RagResult, ResponseMode,
    SourceRef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    RetrievalComplete,
    GradingStart,
    GenerationStart,
}

/// One line of the streaming protocol. Consumers dispatch on `type` only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Phase {
        phase: Phase,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Decontextualized {
        original: String,
        rewritten: String,
    },
    Grading {
        metrics: GradingMetrics,
    },
    ThoughtChain {
        steps: Vec<String>,
    },
    Refusal {
        message: String,
        evidence_level: EvidenceLevel,
    },
    Metadata {
        mode: ResponseMode,
        intent: Intent,
        evidence_level: EvidenceLevel,
        sources: Vec<SourceRef>,
    },
    Token {
        content: String,
    },
    Corrections {
        status: GuardrailStatus,
        corrections: Vec<AppliedCorrection>,
        confidence: f32,
    },
    Done {
        result: Box<RagResult>,
    },
    Error {
        message: String,
        code: String,
    },
}

impl StreamEvent {
    pub fn phase(phase: Phase) -> Self {
        Self::Phase {
            phase,
            detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Phase { .. } => "phase",
            Self::Decontextualized { .. } => "decontextualized",
            Self::Grading { .. } => "grading",
            Self::ThoughtChain { .. } => "thought_chain",
            Self::Refusal { .. } => "refusal",
            Self::Metadata { .. } => "metadata",
            Self::Token { .. } => "token",
            Self::Corrections { .. } => "corrections",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// One JSON object followed by a newline.
    pub fn to_ndjson_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(e) => {
                tracing::error!(error = %e, event = self.type_name(), "Failed to serialize stream event");
                "{\"type\":\"error\",\"message\":\"serialization failed\",\"code\":\"internal\"}\n"
                    .to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PipelineMetrics;

    #[test]
    fn test_events_are_tagged_by_type() {
        let line = StreamEvent::Token {
            content: "Hej".to_string(),
        }
        .to_ndjson_line();
        assert_eq!(line, "{\"type\":\"token\",\"content\":\"Hej\"}\n");

        let line = StreamEvent::phase(Phase::RetrievalComplete).to_ndjson_line();
        assert_eq!(line, "{\"type\":\"phase\",\"phase\":\"retrieval_complete\"}\n");
    }

    #[test]
    fn test_type_name_matches_serialized_tag() {
        let events = vec![
            StreamEvent::phase(Phase::Start),
            StreamEvent::ThoughtChain { steps: vec![] },
            StreamEvent::Refusal {
                message: "nej".to_string(),
                evidence_level: EvidenceLevel::None,
            },
            StreamEvent::Done {
                result: Box::new(RagResult::blocked(
                    "nej",
                    ResponseMode::Chat,
                    PipelineMetrics::default(),
                )),
            },
            StreamEvent::Error {
                message: "fel".to_string(),
                code: "internal".to_string(),
            },
        ];

        for event in events {
            let value: serde_json::Value =
                serde_json::from_str(event.to_ndjson_line().trim_end()).unwrap();
            assert_eq!(value["type"], event.type_name());
        }
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::Error {
            message: String::new(),
            code: String::new()
        }
        .is_terminal());
        assert!(!StreamEvent::phase(Phase::Start).is_terminal());
    }
}
