//! The Jail Warden: query safety checks before any model call, and
//! validation of generated answers before anything reaches the caller.

mod citations;
mod harm;
mod injection;
mod leakage;
mod rate_limit;
mod terms;

pub use citations::{check_markers, evidence_level, verify_grounding, GroundingReport, MarkerReport};
pub use harm::{HarmDetector, CRISIS_MESSAGE, HARM_BLOCK_MESSAGE};
pub use injection::{InjectionKind, InjectionMatch, InjectionScanner};
pub use leakage::{LeakageSanitizer, REDACTION_TOKEN};
pub use rate_limit::{
    client_fingerprint, InMemoryViolationStore, RateLimiter, ViolationStore,
};
pub use terms::TermCorrector;

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::config::GuardrailConfig;
use crate::error::{LexError, Result, SECURITY_REJECTION_MESSAGE};
use crate::models::{
    GuardrailStatus, GuardrailVerdict, HarmAction, HarmDetectionResult, ResponseMode,
    RetrievedDocument, StructuredAnswer,
};

const CAPS_RATIO_LIMIT: f32 = 0.8;
const SPECIAL_RATIO_LIMIT: f32 = 0.3;
const ANOMALY_MIN_CHARS: usize = 50;
const UNVERIFIED_PENALTY: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    Injection { pattern: InjectionKind },
    TooLong { chars: usize },
    ExcessiveCaps,
    ExcessiveSpecialChars,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Injection { pattern } => write!(f, "injection pattern ({pattern})"),
            Self::TooLong { chars } => write!(f, "query too long ({chars} chars)"),
            Self::ExcessiveCaps => write!(f, "excessive capital letters"),
            Self::ExcessiveSpecialChars => write!(f, "excessive special characters"),
        }
    }
}

/// Outcome of the query safety check. Only `Pass` lets the pipeline continue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVerdict {
    Pass { whitelisted: bool },
    Compassionate(HarmDetectionResult),
    Block(HarmDetectionResult),
    Reject { reason: RejectReason },
    Banned { retry_after_secs: u64 },
}

impl QueryVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    /// Fixed text returned to the caller when the query does not pass.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Pass { .. } => None,
            Self::Compassionate(result) => {
                Some(result.message.clone().unwrap_or_else(|| CRISIS_MESSAGE.to_string()))
            }
            Self::Block(result) => {
                Some(result.message.clone().unwrap_or_else(|| HARM_BLOCK_MESSAGE.to_string()))
            }
            Self::Reject { .. } | Self::Banned { .. } => Some(SECURITY_REJECTION_MESSAGE.to_string()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pass { .. } => "pass",
            Self::Compassionate(_) => "compassionate",
            Self::Block(_) => "block",
            Self::Reject { .. } => "reject",
            Self::Banned { .. } => "banned",
        }
    }
}

fn anomaly(text: &str) -> Option<RejectReason> {
    let total = text.chars().count();
    if total <= ANOMALY_MIN_CHARS {
        return None;
    }

    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    let upper = text.chars().filter(|c| c.is_uppercase()).count();
    if letters > 0 && upper as f32 / letters as f32 > CAPS_RATIO_LIMIT {
        return Some(RejectReason::ExcessiveCaps);
    }

    let special = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    if special as f32 / total as f32 > SPECIAL_RATIO_LIMIT {
        return Some(RejectReason::ExcessiveSpecialChars);
    }

    None
}

/// Composite safety layer owned by the orchestrator.
#[derive(Clone)]
pub struct JailWarden {
    harm: HarmDetector,
    injection: InjectionScanner,
    terms: TermCorrector,
    leakage: LeakageSanitizer,
    rate_limiter: RateLimiter,
    max_query_chars: usize,
}

impl JailWarden {
    pub fn new(config: &GuardrailConfig) -> Self {
        Self::with_store(
            config,
            Arc::new(InMemoryViolationStore::new(&config.rate_limit)),
        )
    }

    /// Uses an externally provided violation store.
    pub fn with_store(config: &GuardrailConfig, store: Arc<dyn ViolationStore>) -> Self {
        Self {
            harm: HarmDetector::new(),
            injection: InjectionScanner::new(),
            terms: TermCorrector::new(),
            leakage: LeakageSanitizer::new(&config.leakage_markers),
            rate_limiter: RateLimiter::new(store),
            max_query_chars: config.max_query_chars,
        }
    }

    /// Runs every query check in priority order; the first hit decides.
    /// Blocks and rejections count as violations for `client_id`.
    pub fn check_query(&self, client_id: Option<&str>, text: &str, now: Instant) -> QueryVerdict {
        if let Some(client) = client_id {
            if let Some(retry_after_secs) = self.rate_limiter.retry_after(client, now) {
                tracing::warn!(
                    client = %client_fingerprint(client),
                    retry_after_secs,
                    "Rejected query from banned client"
                );
                return QueryVerdict::Banned { retry_after_secs };
            }
        }

        let verdict = self.evaluate(text);

        match &verdict {
            QueryVerdict::Pass { whitelisted } => {
                tracing::debug!(whitelisted, "Query passed safety checks");
            }
            QueryVerdict::Compassionate(result) => {
                tracing::info!(category = ?result.category, "Self-harm signal, returning crisis resources");
            }
            QueryVerdict::Block(result) => {
                tracing::warn!(
                    category = ?result.category,
                    pattern = ?result.matched_pattern,
                    "Query blocked by harm detection"
                );
                self.record(client_id, now);
            }
            QueryVerdict::Reject { reason } => {
                tracing::warn!(%reason, "Query rejected");
                self.record(client_id, now);
            }
            QueryVerdict::Banned { .. } => {}
        }

        verdict
    }

    fn evaluate(&self, text: &str) -> QueryVerdict {
        let harm = self.harm.check(text);
        let whitelisted = match harm.action {
            HarmAction::Compassionate => return QueryVerdict::Compassionate(harm),
            HarmAction::Block => return QueryVerdict::Block(harm),
            HarmAction::Pass => harm.whitelisted,
        };

        if let Some(found) = self.injection.scan(text) {
            return QueryVerdict::Reject {
                reason: RejectReason::Injection { pattern: found.kind },
            };
        }

        let chars = text.chars().count();
        if chars > self.max_query_chars {
            return QueryVerdict::Reject {
                reason: RejectReason::TooLong { chars },
            };
        }

        if let Some(reason) = anomaly(text) {
            return QueryVerdict::Reject { reason };
        }

        QueryVerdict::Pass { whitelisted }
    }

    fn record(&self, client_id: Option<&str>, now: Instant) {
        if let Some(client) = client_id {
            self.rate_limiter.record_violation(client, now);
        }
    }

    /// Validates a generated answer against the sources it was given.
    ///
    /// `text` is the answer text; when `structured` is present its answer
    /// and citations are updated in place. In CHAT mode an injection pattern
    /// in the generated text is a security violation.
    pub fn validate_response(
        &self,
        text: &str,
        mode: ResponseMode,
        structured: Option<&mut StructuredAnswer>,
        sources: &[RetrievedDocument],
    ) -> Result<GuardrailVerdict> {
        if mode == ResponseMode::Chat {
            if let Some(found) = self.injection.scan(text) {
                tracing::error!(pattern = %found.kind, "Generated text echoes an injection pattern");
                return Err(LexError::SecurityViolation {
                    reason: format!("generated text matched {}", found.kind),
                });
            }
        }

        let (corrected, corrections) = self.terms.correct(text);
        let mut confidence = TermCorrector::aggregate_confidence(&corrections);
        let mut issues = Vec::new();

        let sanitized = self.leakage.sanitize(&corrected);
        let mut rewritten = sanitized != corrected;
        if rewritten {
            issues.push("infrastructure details redacted".to_string());
        }

        let mut final_text = sanitized;
        let mut citations_stripped = false;
        let mut grounding = None;

        if mode.uses_retrieval() {
            let markers = check_markers(&final_text, sources.len());
            confidence -= markers.penalty();
            issues.extend(markers.issues());
            if !markers.stripped.is_empty() {
                rewritten = true;
            }
            final_text = markers.text;
        }

        if let Some(answer) = structured {
            if mode.uses_retrieval() {
                let report = verify_grounding(answer, sources);
                if !report.removed.is_empty() {
                    citations_stripped = true;
                    issues.push(format!("removed citations of unknown documents {:?}", report.removed));
                }
                if report.unverified > 0 {
                    confidence -= UNVERIFIED_PENALTY;
                    issues.push(format!("{} quote(s) not found in sources", report.unverified));
                }
                grounding = Some(report);
            }

            for cited in &mut answer.sources {
                cited.quote = self.leakage.sanitize(&cited.quote);
                cited.location = self.leakage.sanitize(&cited.location);
            }
            answer.unsourced_facts = answer
                .unsourced_facts
                .iter()
                .map(|fact| self.leakage.sanitize(fact))
                .collect();
            answer.answer = final_text.clone();
        }

        let status = if citations_stripped {
            GuardrailStatus::CitationsStripped
        } else if rewritten {
            GuardrailStatus::Rewritten
        } else if grounding.as_ref().is_some_and(|g| g.unverified > 0) {
            GuardrailStatus::FactUnverified
        } else if !corrections.is_empty() {
            GuardrailStatus::TermCorrected
        } else if grounding.as_ref().is_some_and(GroundingReport::all_verified) {
            GuardrailStatus::FactVerified
        } else {
            GuardrailStatus::Unchanged
        };

        let evidence_level = if mode.uses_retrieval() {
            evidence_level(sources)
        } else {
            crate::models::EvidenceLevel::None
        };

        tracing::info!(
            %status,
            %evidence_level,
            corrections = corrections.len(),
            issues = issues.len(),
            "Response validated"
        );

        Ok(GuardrailVerdict {
            corrected_text: final_text,
            corrections,
            status,
            evidence_level,
            confidence: confidence.clamp(0.0, 1.0),
            issues,
        })
    }

    /// Leakage redaction alone, for text that skips full validation.
    pub fn sanitize_output(&self, text: &str) -> String {
        self.leakage.sanitize(text)
    }
}
