mod cache;
mod classifier;
mod contracts;
mod decontextualize;

use serde::{Deserialize, Serialize};

pub use cache::DecontextCache;
pub use classifier::{Classification, QueryClassifier};
pub use contracts::{answer_contract, AnswerContract, CONTRACTS};
pub use decontextualize::{Decontextualized, Decontextualizer};

use crate::models::ResponseMode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    SmallTalk,
    Definition,
    Procedure,
    Rights,
    StatuteLookup,
    LegislativeHistory,
    Comparison,
    #[default]
    General,
}

impl Intent {
    pub fn suggested_mode(&self) -> ResponseMode {
        match self {
            Self::SmallTalk => ResponseMode::Chat,
            Self::StatuteLookup | Self::LegislativeHistory | Self::Rights => {
                ResponseMode::Evidence
            }
            Self::Definition | Self::Procedure | Self::Comparison | Self::General => {
                ResponseMode::Assist
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmallTalk => "small_talk",
            Self::Definition => "definition",
            Self::Procedure => "procedure",
            Self::Rights => "rights",
            Self::StatuteLookup => "statute_lookup",
            Self::LegislativeHistory => "legislative_history",
            Self::Comparison => "comparison",
            Self::General => "general",
        }
    }

    /// Parses an intent label reported by the retrieval backend. Unknown
    /// labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "small_talk" | "smalltalk" | "chat" => Some(Self::SmallTalk),
            "definition" => Some(Self::Definition),
            "procedure" | "process" => Some(Self::Procedure),
            "rights" => Some(Self::Rights),
            "statute_lookup" | "statute" | "legal_text" => Some(Self::StatuteLookup),
            "legislative_history" | "preparatory_works" => Some(Self::LegislativeHistory),
            "comparison" | "compare" => Some(Self::Comparison),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_modes() {
        assert_eq!(Intent::SmallTalk.suggested_mode(), ResponseMode::Chat);
        assert_eq!(Intent::StatuteLookup.suggested_mode(), ResponseMode::Evidence);
        assert_eq!(Intent::Rights.suggested_mode(), ResponseMode::Evidence);
        assert_eq!(Intent::Procedure.suggested_mode(), ResponseMode::Assist);
        assert_eq!(Intent::General.suggested_mode(), ResponseMode::Assist);
    }

    #[test]
    fn test_from_label() {
        assert_eq!(Intent::from_label("Legislative-History"), Some(Intent::LegislativeHistory));
        assert_eq!(Intent::from_label("statute"), Some(Intent::StatuteLookup));
        assert_eq!(Intent::from_label("weather"), None);
    }
}
