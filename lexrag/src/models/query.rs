use serde::{Deserialize, Serialize};

/// Mode requested by the caller. `Auto` defers to the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModeHint {
    #[default]
    Auto,
    Chat,
    Assist,
    Evidence,
}

impl std::fmt::Display for ModeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Chat => write!(f, "chat"),
            Self::Assist => write!(f, "assist"),
            Self::Evidence => write!(f, "evidence"),
        }
    }
}

impl std::str::FromStr for ModeHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "chat" => Ok(Self::Chat),
            "assist" => Ok(Self::Assist),
            "evidence" => Ok(Self::Evidence),
            _ => Err(format!("Unknown mode: {s}")),
        }
    }
}

/// Resolved response mode. Every mode-dependent decision in the pipeline
/// matches on this tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseMode {
    #[serde(alias = "chat")]
    Chat,
    #[serde(alias = "assist")]
    Assist,
    #[serde(alias = "evidence")]
    Evidence,
}

impl ResponseMode {
    /// An explicit non-auto hint wins over the classifier's suggestion.
    pub fn resolve(hint: ModeHint, suggested: ResponseMode) -> Self {
        match hint {
            ModeHint::Auto => suggested,
            ModeHint::Chat => Self::Chat,
            ModeHint::Assist => Self::Assist,
            ModeHint::Evidence => Self::Evidence,
        }
    }

    pub fn is_evidence_bound(&self) -> bool {
        matches!(self, Self::Evidence)
    }

    pub fn uses_retrieval(&self) -> bool {
        !matches!(self, Self::Chat)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::Assist => "ASSIST",
            Self::Evidence => "EVIDENCE",
        }
    }
}

impl std::fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A question as received from the transport layer. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub mode: ModeHint,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            history: Vec::new(),
            mode: ModeHint::Auto,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_mode(mut self, mode: ModeHint) -> Self {
        self.mode = mode;
        self
    }

    pub fn has_history(&self) -> bool {
        self.history
            .iter()
            .any(|m| m.role != Role::System && !m.content.trim().is_empty())
    }
}

/// Metadata filter forwarded untouched to the retrieval backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doc_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

/// Per-request options that are not part of the question itself.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Identifier used for rate limiting (e.g. an IP or session key).
    pub client_id: Option<String>,
    pub filter: Option<SearchFilter>,
    /// Overrides the configured retrieval depth.
    pub top_k: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_hint_overrides_classifier() {
        assert_eq!(
            ResponseMode::resolve(ModeHint::Evidence, ResponseMode::Chat),
            ResponseMode::Evidence
        );
        assert_eq!(
            ResponseMode::resolve(ModeHint::Chat, ResponseMode::Evidence),
            ResponseMode::Chat
        );
    }

    #[test]
    fn test_auto_hint_uses_classifier() {
        assert_eq!(
            ResponseMode::resolve(ModeHint::Auto, ResponseMode::Assist),
            ResponseMode::Assist
        );
    }

    #[test]
    fn test_mode_hint_from_str() {
        assert_eq!("EVIDENCE".parse::<ModeHint>(), Ok(ModeHint::Evidence));
        assert_eq!("".parse::<ModeHint>(), Ok(ModeHint::Auto));
        assert!("strict".parse::<ModeHint>().is_err());
    }

    #[test]
    fn test_response_mode_accepts_both_cases() {
        let upper: ResponseMode = serde_json::from_str("\"EVIDENCE\"").unwrap();
        let lower: ResponseMode = serde_json::from_str("\"evidence\"").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(serde_json::to_string(&upper).unwrap(), "\"EVIDENCE\"");
    }

    #[test]
    fn test_has_history_ignores_system_and_blank_messages() {
        let query = Query::new("Och om arbetsgivaren säger nej?").with_history(vec![
            ChatMessage::system("ignored"),
            ChatMessage::user("   "),
        ]);
        assert!(!query.has_history());

        let query = query.with_history(vec![ChatMessage::user("Hur lång är uppsägningstiden?")]);
        assert!(query.has_history());
    }
}
