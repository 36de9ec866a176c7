//! Answer generation stages that run after retrieval: context assembly,
//! structured-output recovery, anti-truncation and critic-revise.

mod context;
mod critic;
mod structured;
mod truncation;

pub use context::{assemble_context, estimate_tokens, format_sources, AssembledContext, CHARS_PER_TOKEN};
pub use critic::{CriticOutcome, CriticReviser};
pub use structured::{
    answer_schema, fallback_answer, parse_answer, ParseOutcome, StructuredOutputParser,
    MAX_PARSE_ATTEMPTS, PARSE_FALLBACK_MESSAGE,
};
pub use truncation::{is_truncated, TruncationGuard, TruncationOutcome, MAX_TRUNCATION_RETRIES, MIN_ANSWER_CHARS};
