use thiserror::Error;

/// Fixed rejection shown whenever a request is refused for security reasons.
pub const SECURITY_REJECTION_MESSAGE: &str =
    "Din fråga kan inte behandlas eftersom den bryter mot tjänstens säkerhetsregler. \
     Formulera gärna om frågan som en saklig juridisk fråga.";

/// Fixed message for every failure that is not a security rejection.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Ett tekniskt fel uppstod när frågan behandlades. Försök igen om en stund.";

#[derive(Error, Debug)]
pub enum LexError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM rate limit exceeded, retry after {retry_after:?} seconds")]
    LlmRateLimit { retry_after: Option<u64> },

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Reranker error: {0}")]
    Reranker(String),

    #[error("{stage} timed out after {after_ms} ms")]
    Timeout { stage: &'static str, after_ms: u64 },

    #[error("Security violation: {reason}")]
    SecurityViolation { reason: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl LexError {
    /// Collaborator failures (retrieval, generation, reranking) that a caller
    /// may retry later. The orchestrator itself never retries them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LexError::Http(_)
                | LexError::Llm(_)
                | LexError::LlmUnavailable(_)
                | LexError::LlmRateLimit { .. }
                | LexError::Retrieval(_)
                | LexError::Reranker(_)
                | LexError::Timeout { .. }
        )
    }

    pub fn is_security_violation(&self) -> bool {
        matches!(self, LexError::SecurityViolation { .. })
    }

    /// The only text a caller ever sees for this error.
    pub fn user_message(&self) -> &'static str {
        match self {
            LexError::SecurityViolation { .. } => SECURITY_REJECTION_MESSAGE,
            _ => GENERIC_FAILURE_MESSAGE,
        }
    }

    /// Stable machine-readable code for logs and stream `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            LexError::Http(_) => "http",
            LexError::Json(_) => "json",
            LexError::Io(_) => "io",
            LexError::UrlParse(_) => "url",
            LexError::Validation(_) => "validation",
            LexError::Internal(_) => "internal",
            LexError::Llm(_) => "llm",
            LexError::LlmUnavailable(_) => "llm_unavailable",
            LexError::LlmRateLimit { .. } => "llm_rate_limit",
            LexError::Retrieval(_) => "retrieval",
            LexError::Reranker(_) => "reranker",
            LexError::Timeout { .. } => "timeout",
            LexError::SecurityViolation { .. } => "security_violation",
            LexError::Cancelled => "cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, LexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_violation_uses_fixed_message() {
        let error = LexError::SecurityViolation {
            reason: "prompt override: ignore previous instructions".to_string(),
        };
        assert_eq!(error.user_message(), SECURITY_REJECTION_MESSAGE);
        assert!(!error.user_message().contains("ignore"));
        assert!(error.is_security_violation());
    }

    #[test]
    fn test_internal_errors_never_leak() {
        let error = LexError::Retrieval("connection refused: 10.0.3.7:6333".to_string());
        assert_eq!(error.user_message(), GENERIC_FAILURE_MESSAGE);
        assert!(!error.user_message().contains("6333"));
        assert!(error.is_transient());
    }

    #[test]
    fn test_timeout_display_and_code() {
        let error = LexError::Timeout {
            stage: "generation",
            after_ms: 1500,
        };
        assert_eq!(error.to_string(), "generation timed out after 1500 ms");
        assert_eq!(error.code(), "timeout");
        assert!(error.is_transient());
    }

    #[test]
    fn test_validation_is_not_transient() {
        assert!(!LexError::Validation("empty".to_string()).is_transient());
        assert!(!LexError::Cancelled.is_transient());
    }
}
