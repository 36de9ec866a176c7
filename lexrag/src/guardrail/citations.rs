//! Citation marker checks, grounding verification and evidence scoring.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::models::{EvidenceLevel, RetrievedDocument, StructuredAnswer};

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s?\[(\d+)\]").expect("citation marker pattern"));

static ADJACENT_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]\s*\[(\d+)\]").expect("adjacent marker pattern"));

static MALFORMED: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("spaced", r"\[\s+\d+\s*\]|\[\d+\s+\]"),
        ("list", r"\[\d+(?:\s*[,;]\s*\d+)+\]"),
        ("mixed", r"\[\d+\)|\(\d+\]"),
        ("unclosed", r"\[\d+(?:$|[^\d\]\s,;)])"),
    ]
    .iter()
    .map(|(name, p)| (*name, Regex::new(p).expect("malformed marker pattern")))
    .collect()
});

const ISSUE_PENALTY: f32 = 0.1;
const MAX_MARKER_PENALTY: f32 = 0.5;

/// Result of checking `[n]` markers in an answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerReport {
    /// Answer text with out-of-range markers removed.
    pub text: String,
    pub duplicates: usize,
    pub malformed: usize,
    /// Marker numbers that referred to no source.
    pub stripped: Vec<usize>,
}

impl MarkerReport {
    /// Confidence lost to formatting issues. Formatting alone never blocks.
    pub fn penalty(&self) -> f32 {
        ((self.duplicates + self.malformed) as f32 * ISSUE_PENALTY).min(MAX_MARKER_PENALTY)
    }

    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.duplicates > 0 {
            issues.push(format!("{} duplicate citation marker(s)", self.duplicates));
        }
        if self.malformed > 0 {
            issues.push(format!("{} malformed citation marker(s)", self.malformed));
        }
        if !self.stripped.is_empty() {
            issues.push(format!("stripped out-of-range markers {:?}", self.stripped));
        }
        issues
    }
}

pub fn check_markers(text: &str, source_count: usize) -> MarkerReport {
    let duplicates = ADJACENT_MARKERS
        .captures_iter(text)
        .filter(|caps| caps[1] == caps[2])
        .count();

    let malformed = MALFORMED
        .iter()
        .map(|(kind, pattern)| {
            let count = pattern.find_iter(text).count();
            if count > 0 {
                tracing::debug!(kind, count, "Malformed citation markers");
            }
            count
        })
        .sum();

    let mut stripped = Vec::new();
    let text = MARKER
        .replace_all(text, |caps: &Captures| {
            let n: usize = caps[1].parse().unwrap_or(0);
            if n == 0 || n > source_count {
                stripped.push(n);
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();

    MarkerReport {
        text,
        duplicates,
        malformed,
        stripped,
    }
}

/// Result of checking cited sources against the documents given to generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundingReport {
    /// Cited document ids that were not among the sources.
    pub removed: Vec<String>,
    pub verified: usize,
    pub unverified: usize,
}

impl GroundingReport {
    pub fn all_verified(&self) -> bool {
        self.unverified == 0 && self.verified > 0
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Drops citations of unknown documents and checks each quote verbatim
/// (case and whitespace insensitive) against its document.
pub fn verify_grounding(
    answer: &mut StructuredAnswer,
    sources: &[RetrievedDocument],
) -> GroundingReport {
    let by_id: HashMap<&str, &RetrievedDocument> =
        sources.iter().map(|doc| (doc.id.as_str(), doc)).collect();

    let mut report = GroundingReport::default();

    answer.sources.retain(|cited| {
        if by_id.contains_key(cited.doc_id.as_str()) {
            true
        } else {
            report.removed.push(cited.doc_id.clone());
            false
        }
    });

    for cited in &answer.sources {
        let quote = normalize(&cited.quote);
        let found = !quote.is_empty()
            && by_id.get(cited.doc_id.as_str()).is_some_and(|doc| {
                normalize(&doc.snippet).contains(&quote) || normalize(&doc.title).contains(&quote)
            });

        if found {
            report.verified += 1;
        } else {
            tracing::debug!(doc_id = %cited.doc_id, "Quote not found in source");
            report.unverified += 1;
        }
    }

    report
}

pub fn evidence_level(sources: &[RetrievedDocument]) -> EvidenceLevel {
    if sources.is_empty() {
        return EvidenceLevel::None;
    }

    let count = sources.len();
    let mean = sources.iter().map(|d| d.score).sum::<f32>() / count as f32;

    if count >= 3 && mean >= 0.7 {
        EvidenceLevel::High
    } else if count >= 2 && mean >= 0.45 {
        EvidenceLevel::Medium
    } else {
        EvidenceLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CitedSource, ResponseMode};
    use pretty_assertions::assert_eq;

    fn doc(id: &str, snippet: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument::new(id, format!("Titel {id}"), snippet).with_score(score)
    }

    fn cited(doc_id: &str, quote: &str) -> CitedSource {
        CitedSource {
            doc_id: doc_id.to_string(),
            chunk_id: String::new(),
            quote: quote.to_string(),
            location: String::new(),
        }
    }

    #[test]
    fn test_clean_markers() {
        let report = check_markers("Uppsägning ska vara sakligt grundad [1]. Se även [2].", 2);
        assert_eq!(report.text, "Uppsägning ska vara sakligt grundad [1]. Se även [2].");
        assert_eq!(report.penalty(), 0.0);
        assert!(report.issues().is_empty());
    }

    #[test]
    fn test_duplicate_and_malformed_markers() {
        let report = check_markers("Regeln [1][1] gäller [ 2 ] och [1,2].", 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.malformed, 2);
        assert!((report.penalty() - 0.3).abs() < 1e-6);
        assert_eq!(report.issues().len(), 2);
    }

    #[test]
    fn test_unclosed_and_mixed_brackets() {
        let report = check_markers("Se [1) och (2] samt [3.", 3);
        assert_eq!(report.malformed, 3);
    }

    #[test]
    fn test_penalty_is_capped() {
        let report = check_markers("[1][1] [1][1] [1][1] [1][1] [1][1] [1][1] [1][1]", 1);
        assert_eq!(report.penalty(), MAX_MARKER_PENALTY);
    }

    #[test]
    fn test_out_of_range_markers_are_stripped() {
        let report = check_markers("Enligt lagen [1] och praxis [4] samt [0].", 2);
        assert_eq!(report.text, "Enligt lagen [1] och praxis samt.");
        assert_eq!(report.stripped, vec![4, 0]);
    }

    #[test]
    fn test_grounding_removes_unknown_documents() {
        let sources = vec![doc("d1", "En uppsägning ska vara sakligt grundad.", 0.9)];
        let mut answer = StructuredAnswer::plain(ResponseMode::Evidence, "Svar [1]");
        answer.sources = vec![cited("d1", "sakligt  GRUNDAD"), cited("d9", "påhittat")];

        let report = verify_grounding(&mut answer, &sources);
        assert_eq!(report.removed, vec!["d9".to_string()]);
        assert_eq!(answer.sources.len(), 1);
        assert!(report.all_verified());
    }

    #[test]
    fn test_grounding_flags_missing_quote() {
        let sources = vec![doc("d1", "Arbetsgivaren ska underrätta arbetstagaren.", 0.9)];
        let mut answer = StructuredAnswer::plain(ResponseMode::Assist, "Svar");
        answer.sources = vec![cited("d1", "två veckor i förväg"), cited("d1", "")];

        let report = verify_grounding(&mut answer, &sources);
        assert_eq!(report.verified, 0);
        assert_eq!(report.unverified, 2);
        assert!(!report.all_verified());
    }

    #[test]
    fn test_evidence_levels() {
        assert_eq!(evidence_level(&[]), EvidenceLevel::None);
        assert_eq!(evidence_level(&[doc("a", "", 0.95)]), EvidenceLevel::Low);
        assert_eq!(
            evidence_level(&[doc("a", "", 0.5), doc("b", "", 0.5)]),
            EvidenceLevel::Medium
        );
        assert_eq!(
            evidence_level(&[doc("a", "", 0.8), doc("b", "", 0.75), doc("c", "", 0.7)]),
            EvidenceLevel::High
        );
        assert_eq!(
            evidence_level(&[doc("a", "", 0.2), doc("b", "", 0.3), doc("c", "", 0.1)]),
            EvidenceLevel::Low
        );
    }
}
