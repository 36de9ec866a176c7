use std::sync::Arc;
use std::time::Duration;

use super::DecontextCache;
use crate::backends::{CallPurpose, GenerationOptions, Generator};
use crate::config::DecontextConfig;
use crate::llm::prompts::decontextualize_prompt;
use crate::models::{ChatMessage, Role};

const MAX_REWRITE_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decontextualized {
    pub question: String,
    pub rewritten: bool,
    pub cached: bool,
}

impl Decontextualized {
    fn original(question: &str) -> Self {
        Self {
            question: question.to_string(),
            rewritten: false,
            cached: false,
        }
    }
}

/// Rewrites follow-up questions into standalone questions using the
/// conversation history. Never fails: any problem yields the original.
#[derive(Clone)]
pub struct Decontextualizer {
    generator: Arc<dyn Generator>,
    cache: Option<DecontextCache>,
    timeout: Duration,
    max_history_turns: usize,
}

impl Decontextualizer {
    pub fn new(
        generator: Arc<dyn Generator>,
        config: &DecontextConfig,
        max_history_turns: usize,
    ) -> Self {
        Self {
            generator,
            cache: DecontextCache::new(config.cache_size),
            timeout: Duration::from_millis(config.timeout_ms),
            max_history_turns,
        }
    }

    pub async fn decontextualize(&self, question: &str, history: &[ChatMessage]) -> Decontextualized {
        let transcript = format_history(history, self.max_history_turns);
        if transcript.is_empty() {
            return Decontextualized::original(question);
        }

        let cache_key = self
            .cache
            .as_ref()
            .map(|cache| cache.generate_key(&transcript, question));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(cached) = cache.get(key) {
                return Decontextualized {
                    question: cached,
                    rewritten: true,
                    cached: true,
                };
            }
        }

        let messages = [ChatMessage::user(decontextualize_prompt(&transcript, question))];
        let options = GenerationOptions::for_purpose(CallPurpose::Decontextualize)
            .temperature(0.0)
            .max_tokens(200);

        match tokio::time::timeout(self.timeout, self.generator.chat(&messages, &options)).await {
            Ok(Ok(generation)) => {
                let Some(rewritten) = clean_rewrite(&generation.text, question) else {
                    return Decontextualized::original(question);
                };

                tracing::info!(
                    original_chars = question.chars().count(),
                    rewritten_chars = rewritten.chars().count(),
                    "Question decontextualized"
                );

                if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                    cache.put(key, rewritten.clone());
                }

                Decontextualized {
                    question: rewritten,
                    rewritten: true,
                    cached: false,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Decontextualization failed, using original question");
                Decontextualized::original(question)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Decontextualization timeout, using original question"
                );
                Decontextualized::original(question)
            }
        }
    }
}

/// Last `max_turns` user/assistant messages as a plain transcript.
pub(crate) fn format_history(history: &[ChatMessage], max_turns: usize) -> String {
    let relevant: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| m.role != Role::System && !m.content.trim().is_empty())
        .collect();
    let start = relevant.len().saturating_sub(max_turns);

    relevant[start..]
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::Assistant => "Assistent",
                _ => "Användare",
            };
            format!("{speaker}: {}", m.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn clean_rewrite(raw: &str, question: &str) -> Option<String> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("Fristående fråga:") {
        text = rest.trim();
    }
    let text = text.trim_matches(|c| c == '"' || c == '\'' || c == '«' || c == '»').trim();

    if text.chars().count() < 3
        || text.chars().count() > MAX_REWRITE_CHARS
        || text == question.trim()
    {
        return None;
    }

    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_history_keeps_last_turns() {
        let history = vec![
            ChatMessage::system("ignored"),
            ChatMessage::user("Vad är LAS?"),
            ChatMessage::assistant("Lagen om anställningsskydd."),
            ChatMessage::user("Vem gäller den för?"),
        ];

        let transcript = format_history(&history, 2);
        assert_eq!(
            transcript,
            "Assistent: Lagen om anställningsskydd.\nAnvändare: Vem gäller den för?"
        );
    }

    #[test]
    fn test_clean_rewrite_strips_prefix_and_quotes() {
        assert_eq!(
            clean_rewrite("Fristående fråga: \"Gäller LAS för visstidsanställda?\"", "Gäller den?"),
            Some("Gäller LAS för visstidsanställda?".to_string())
        );
    }

    #[test]
    fn test_clean_rewrite_rejects_unchanged_and_empty() {
        assert_eq!(clean_rewrite("  Gäller den?  ", "Gäller den?"), None);
        assert_eq!(clean_rewrite("  ", "Gäller den?"), None);
    }
}
