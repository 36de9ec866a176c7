use serde::{Deserialize, Serialize};

use super::query::ResponseMode;

/// A source cited by the model, pointing back into the retrieved material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CitedSource {
    #[serde(alias = "doc_id")]
    pub doc_id: String,
    #[serde(default, alias = "chunk_id")]
    pub chunk_id: String,
    pub quote: String,
    #[serde(default)]
    pub location: String,
}

/// The answer shape every non-CHAT generation must produce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAnswer {
    pub mode: ResponseMode,
    #[serde(alias = "evidence_lacking")]
    pub evidence_lacking: bool,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<CitedSource>,
    #[serde(default, alias = "unsourced_facts")]
    pub unsourced_facts: Vec<String>,
    /// Private self-check note from the model. Never serialized outward.
    #[serde(default, skip_serializing, alias = "self_check", alias = "_selfCheck")]
    pub self_check: Option<String>,
}

impl StructuredAnswer {
    /// Evidence refusal: the configured refusal text with no sources.
    pub fn refusal(mode: ResponseMode, template: &str) -> Self {
        Self {
            mode,
            evidence_lacking: true,
            answer: template.to_string(),
            sources: Vec::new(),
            unsourced_facts: Vec::new(),
            self_check: None,
        }
    }

    pub fn plain(mode: ResponseMode, answer: impl Into<String>) -> Self {
        Self {
            mode,
            evidence_lacking: false,
            answer: answer.into(),
            sources: Vec::new(),
            unsourced_facts: Vec::new(),
            self_check: None,
        }
    }

    /// Serialized form without the private note, as shown to critics and callers.
    pub fn to_public_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.answer.clone())
    }
}
