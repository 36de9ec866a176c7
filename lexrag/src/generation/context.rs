use crate::models::RetrievedDocument;

/// Rough token estimate used for the context budget.
pub const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn format_source(number: usize, document: &RetrievedDocument) -> String {
    let mut header = format!("[{number}] {}", document.title.trim());
    match (document.source.is_empty(), document.doc_type.is_empty()) {
        (false, false) => header.push_str(&format!(" ({}, {})", document.source, document.doc_type)),
        (false, true) => header.push_str(&format!(" ({})", document.source)),
        (true, false) => header.push_str(&format!(" ({})", document.doc_type)),
        (true, true) => {}
    }
    format!("{header}\ndocId: {}\n{}", document.id, document.snippet.trim())
}

/// Numbered `[n]` blocks for the given documents, in order.
pub fn format_sources(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, document)| format_source(i + 1, document))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Source context that fits the token budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// The documents behind `[1]..[n]`, in marker order.
    pub sources: Vec<RetrievedDocument>,
    pub dropped: usize,
    pub tokens: usize,
}

/// Drops the lowest-ranked documents until the numbered context fits
/// `max_tokens`. The best document is always kept, cut to the budget if needed.
pub fn assemble_context(documents: Vec<RetrievedDocument>, max_tokens: usize) -> AssembledContext {
    let mut sources = documents;
    let mut dropped = 0;

    loop {
        let text = format_sources(&sources);
        let tokens = estimate_tokens(&text);

        if tokens <= max_tokens {
            return finish(text, sources, dropped, tokens);
        }

        if sources.len() == 1 {
            let overflow_chars = (tokens - max_tokens) * CHARS_PER_TOKEN;
            let first = &mut sources[0];
            let keep = first.snippet.chars().count().saturating_sub(overflow_chars);
            first.snippet = first.snippet.chars().take(keep).collect();

            let text = format_sources(&sources);
            let tokens = estimate_tokens(&text);
            return finish(text, sources, dropped, tokens);
        }

        sources.pop();
        dropped += 1;
    }
}

fn finish(
    text: String,
    sources: Vec<RetrievedDocument>,
    dropped: usize,
    tokens: usize,
) -> AssembledContext {
    if dropped > 0 {
        tracing::info!(dropped, kept = sources.len(), tokens, "Context trimmed to token budget");
    }
    AssembledContext {
        text,
        sources,
        dropped,
        tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(id: &str, snippet_chars: usize) -> RetrievedDocument {
        RetrievedDocument::new(id, format!("Titel {id}"), "x".repeat(snippet_chars))
    }

    #[test]
    fn test_format_sources_numbers_documents() {
        let documents = vec![
            RetrievedDocument::new("sfs-1982-80", "LAS 7 §", "Uppsägning ska vara sakligt grundad.")
                .with_source("riksdagen", "sfs"),
            RetrievedDocument::new("prop-1973-129", "Prop. 1973:129", "Förarbeten."),
        ];
        assert_eq!(
            format_sources(&documents),
            "[1] LAS 7 § (riksdagen, sfs)\ndocId: sfs-1982-80\nUppsägning ska vara sakligt grundad.\n\n\
             [2] Prop. 1973:129\ndocId: prop-1973-129\nFörarbeten."
        );
    }

    #[test]
    fn test_everything_fits() {
        let context = assemble_context(vec![doc("a", 100), doc("b", 100)], 1000);
        assert_eq!(context.sources.len(), 2);
        assert_eq!(context.dropped, 0);
        assert_eq!(context.tokens, estimate_tokens(&context.text));
    }

    #[test]
    fn test_drops_lowest_ranked_first() {
        let context = assemble_context(vec![doc("a", 400), doc("b", 400), doc("c", 400)], 250);
        let ids: Vec<&str> = context.sources.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(context.dropped, 1);
        assert!(context.tokens <= 250);
    }

    #[test]
    fn test_single_oversized_document_is_cut() {
        let context = assemble_context(vec![doc("a", 4000), doc("b", 10)], 100);
        assert_eq!(context.sources.len(), 1);
        assert_eq!(context.dropped, 1);
        assert!(context.tokens <= 100);
        assert!(context.text.starts_with("[1] Titel a"));
    }

    #[test]
    fn test_empty_input() {
        let context = assemble_context(Vec::new(), 100);
        assert!(context.text.is_empty());
        assert!(context.sources.is_empty());
    }
}
