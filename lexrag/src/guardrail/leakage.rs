//! Redaction of infrastructure details from generated text.
//!
//! The sanitizer fails open: if the pattern cannot be built, or redaction
//! panics, the original text is returned unchanged.

use std::panic::{self, AssertUnwindSafe};

use regex::Regex;

pub const REDACTION_TOKEN: &str = "[REDACTED]";

const MAX_PASSES: usize = 3;

/// Internal service and technology names that must never reach a user.
const SERVICE_NAMES: &[&str] = &[
    "qdrant",
    "chromadb",
    "lancedb",
    "faiss",
    "elasticsearch",
    "opensearch",
    "ollama",
    "vllm",
    "llama.cpp",
    "llama-server",
    "text-generation-inference",
    "fastembed",
    "bge-m3",
    "bge-reranker",
    "sentence-transformers",
    "redis",
    "postgresql",
    "uvicorn",
    "gunicorn",
    "fastapi",
    "kubernetes",
    "docker",
    "nginx",
];

/// Host with optional scheme, port and path. Listed first so that a port is
/// redacted together with its host and statute numbers are left alone.
const HOST_PATTERN: &str = r"(?:\b[a-z][a-z0-9+.-]*://)?(?:\blocalhost\b|\b127(?:\.\d{1,3}){3}\b|\b0\.0\.0\.0\b|\b10(?:\.\d{1,3}){3}\b|\b192\.168(?:\.\d{1,3}){2}\b|\b172\.(?:1[6-9]|2\d|3[01])(?:\.\d{1,3}){2}\b)(?::\d{2,5})?(?:/[\w./-]*)?";

/// Port and path following a service or host name.
const ENDPOINT_SUFFIX: &str = r"(?::\d{2,5})?(?:/[\w./-]*)?";

/// Any `host:port` whose last host label contains a letter. Statute and
/// report numbers such as `1982:80` have digits only before the colon.
const HOST_PORT_PATTERN: &str =
    r"(?:\b[a-z][a-z0-9+.-]*://)?\b(?:[\w-]+\.)*[\w-]*[a-z][\w-]*:\d{2,5}\b(?:/[\w./-]*)?";

const PORT_PATTERN: &str = r"\bport(?:en|nummer)?\s*:?\s*\d{2,5}\b";

const PATH_PATTERN: &str = r"(?:~|\B/(?:home|root|opt|srv|var|etc|usr|tmp|mnt|data|app|models))(?:/[\w.-]+)+/?";

const MODEL_FILE_PATTERN: &str = r"\b[\w.-]+\.(?:gguf|safetensors|onnx|ckpt|pt|bin)\b";

/// Replaces infrastructure markers with [`REDACTION_TOKEN`].
#[derive(Debug, Clone)]
pub struct LeakageSanitizer {
    pattern: Option<Regex>,
}

impl Default for LeakageSanitizer {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl LeakageSanitizer {
    /// `extra_markers` are matched literally and case-insensitively.
    pub fn new(extra_markers: &[String]) -> Self {
        let services = SERVICE_NAMES
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");

        let mut alternatives = vec![
            HOST_PATTERN.to_string(),
            PORT_PATTERN.to_string(),
            PATH_PATTERN.to_string(),
            MODEL_FILE_PATTERN.to_string(),
            format!(r"(?:\b[a-z][a-z0-9+.-]*://)?\b(?:{services})\b{ENDPOINT_SUFFIX}"),
            HOST_PORT_PATTERN.to_string(),
        ];

        alternatives.extend(
            extra_markers
                .iter()
                .map(|m| m.trim())
                .filter(|m| !m.is_empty())
                .map(regex::escape),
        );

        let source = format!("(?i){}", alternatives.join("|"));
        let pattern = match Regex::new(&source) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(error = %e, "Leakage pattern failed to compile, sanitizer disabled");
                None
            }
        };

        Self { pattern }
    }

    pub fn is_enabled(&self) -> bool {
        self.pattern.is_some()
    }

    pub fn contains_leak(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(text))
    }

    /// Never panics and never errors. Returns the input unchanged on any
    /// internal failure.
    pub fn sanitize(&self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };

        if text.is_empty() {
            return String::new();
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut current = text.to_string();
            let mut redactions = 0usize;

            for _ in 0..MAX_PASSES {
                let (next, found) = redact_pass(pattern, &current);
                if found == 0 {
                    break;
                }
                redactions += found;
                current = next;
            }

            (current, redactions)
        }));

        match result {
            Ok((sanitized, redactions)) => {
                if redactions > 0 {
                    tracing::warn!(redactions, "Redacted infrastructure details from output");
                }
                sanitized
            }
            Err(_) => {
                tracing::error!("Leakage sanitizer panicked, returning original text");
                text.to_string()
            }
        }
    }
}

/// Redacts the text between existing redaction tokens, leaving the tokens
/// themselves alone.
fn redact_pass(pattern: &Regex, text: &str) -> (String, usize) {
    let mut found = 0;
    let segments: Vec<String> = text
        .split(REDACTION_TOKEN)
        .map(|segment| {
            found += pattern.find_iter(segment).count();
            pattern.replace_all(segment, REDACTION_TOKEN).into_owned()
        })
        .collect();
    (segments.join(REDACTION_TOKEN), found)
}
