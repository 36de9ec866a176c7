use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceLevel {
    None,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for EvidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionCategory {
    /// Authority or court that has been renamed or merged.
    Authority,
    /// Statute that has been repealed or replaced.
    Statute,
    /// Benefit or legal concept with a new official name.
    Terminology,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedCorrection {
    pub original: String,
    pub corrected: String,
    pub category: CorrectionCategory,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStatus {
    Unchanged,
    TermCorrected,
    Rewritten,
    FactVerified,
    FactUnverified,
    CitationsStripped,
    Error,
}

impl std::fmt::Display for GuardrailStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::TermCorrected => write!(f, "term_corrected"),
            Self::Rewritten => write!(f, "rewritten"),
            Self::FactVerified => write!(f, "fact_verified"),
            Self::FactUnverified => write!(f, "fact_unverified"),
            Self::CitationsStripped => write!(f, "citations_stripped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of response validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardrailVerdict {
    pub corrected_text: String,
    pub corrections: Vec<AppliedCorrection>,
    pub status: GuardrailStatus,
    pub evidence_level: EvidenceLevel,
    /// Aggregate confidence in [0, 1].
    pub confidence: f32,
    /// Human-readable notes about citation and grounding issues.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

impl GuardrailVerdict {
    /// Verdict used when validation itself could not run.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            corrected_text: text.into(),
            corrections: Vec::new(),
            status: GuardrailStatus::Error,
            evidence_level: EvidenceLevel::None,
            confidence: 0.0,
            issues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HarmAction {
    Block,
    Compassionate,
    Pass,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HarmCategory {
    SelfHarm,
    Exploitation,
    Threat,
    WeaponsExplosives,
    Drugs,
    Poison,
}

impl std::fmt::Display for HarmCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfHarm => write!(f, "self_harm"),
            Self::Exploitation => write!(f, "exploitation"),
            Self::Threat => write!(f, "threat"),
            Self::WeaponsExplosives => write!(f, "weapons_explosives"),
            Self::Drugs => write!(f, "drugs"),
            Self::Poison => write!(f, "poison"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarmDetectionResult {
    pub action: HarmAction,
    pub category: Option<HarmCategory>,
    pub matched_pattern: Option<String>,
    pub message: Option<String>,
    pub whitelisted: bool,
}

impl HarmDetectionResult {
    pub fn pass() -> Self {
        Self {
            action: HarmAction::Pass,
            category: None,
            matched_pattern: None,
            message: None,
            whitelisted: false,
        }
    }

    pub fn whitelisted(pattern: impl Into<String>) -> Self {
        Self {
            whitelisted: true,
            matched_pattern: Some(pattern.into()),
            ..Self::pass()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_level_ordering() {
        assert!(EvidenceLevel::None < EvidenceLevel::Low);
        assert!(EvidenceLevel::Medium < EvidenceLevel::High);
        assert_eq!(serde_json::to_string(&EvidenceLevel::None).unwrap(), "\"none\"");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&GuardrailStatus::CitationsStripped).unwrap(),
            "\"citations_stripped\""
        );
        assert_eq!(GuardrailStatus::TermCorrected.to_string(), "term_corrected");
    }

    #[test]
    fn test_whitelisted_result_passes() {
        let result = HarmDetectionResult::whitelisted("vad säger lagen");
        assert_eq!(result.action, HarmAction::Pass);
        assert!(result.whitelisted);
        assert!(result.category.is_none());
    }
}
