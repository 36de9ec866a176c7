use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse authority tier assigned by the retrieval backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RankTier {
    /// Statutes and ordinances in force.
    Primary,
    /// Preparatory works and committee reports.
    Secondary,
    /// Everything else (guidance, summaries, older material).
    Tertiary,
}

impl std::fmt::Display for RankTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
            Self::Tertiary => write!(f, "tertiary"),
        }
    }
}

/// A document returned by the retrieval backend. The engine reads, reorders
/// and filters these but never edits their content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub snippet: String,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "type", default)]
    pub doc_type: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<RankTier>,
}

impl RetrievedDocument {
    pub fn new(id: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            snippet: snippet.into(),
            source: String::new(),
            doc_type: String::new(),
            score: 0.0,
            tier: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>, doc_type: impl Into<String>) -> Self {
        self.source = source.into();
        self.doc_type = doc_type.into();
        self
    }

    pub fn with_tier(mut self, tier: RankTier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// Timings and counts reported by the retrieval backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RetrievalMetrics {
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub candidates: usize,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetrievalOutcome {
    pub documents: Vec<RetrievedDocument>,
    #[serde(default)]
    pub metrics: RetrievalMetrics,
    #[serde(default)]
    pub detected_intent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RerankOutcome {
    /// Documents in reranked order.
    pub documents: Vec<RetrievedDocument>,
    /// Cross-encoder score for each entry of `documents`, same order.
    pub scores: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_deserializes_with_type_field() {
        let json = r#"{
            "id": "sfs-1982-80-7",
            "title": "Lag (1982:80) om anställningsskydd 7 §",
            "snippet": "En uppsägning från arbetsgivarens sida ska vara sakligt grundad.",
            "source": "SFS",
            "type": "statute",
            "score": 0.82,
            "tier": "primary"
        }"#;

        let doc: RetrievedDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.doc_type, "statute");
        assert_eq!(doc.tier, Some(RankTier::Primary));
        assert!((doc.score - 0.82).abs() < f32::EPSILON);
    }

    #[test]
    fn test_document_defaults_optional_fields() {
        let doc: RetrievedDocument =
            serde_json::from_str(r#"{"id": "d1", "snippet": "text"}"#).unwrap();
        assert_eq!(doc.title, "");
        assert_eq!(doc.tier, None);
        assert_eq!(doc.score, 0.0);
    }

    #[test]
    fn test_retrieval_metrics_keeps_unknown_fields() {
        let metrics: RetrievalMetrics = serde_json::from_str(
            r#"{"latency_ms": 42, "candidates": 30, "bm25_hits": 12}"#,
        )
        .unwrap();
        assert_eq!(metrics.latency_ms, 42);
        assert_eq!(metrics.extra.get("bm25_hits"), Some(&serde_json::json!(12)));
    }
}
