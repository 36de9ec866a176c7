use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::models::{AppliedCorrection, CorrectionCategory};

struct TermRule {
    pattern: Regex,
    replacement: &'static str,
    category: CorrectionCategory,
    confidence: f32,
}

/// Outdated term, current term, category, confidence. No replacement contains
/// any outdated term, so correction is idempotent.
const TERMS: &[(&str, &str, CorrectionCategory, f32)] = &[
    ("länsrätten", "förvaltningsrätten", CorrectionCategory::Authority, 0.95),
    ("länsrätt", "förvaltningsrätt", CorrectionCategory::Authority, 0.95),
    ("Regeringsrätten", "Högsta förvaltningsdomstolen", CorrectionCategory::Authority, 0.95),
    ("Riksförsäkringsverket", "Försäkringskassan", CorrectionCategory::Authority, 0.95),
    ("Statens invandrarverk", "Migrationsverket", CorrectionCategory::Authority, 0.95),
    ("Invandrarverket", "Migrationsverket", CorrectionCategory::Authority, 0.95),
    ("Rikspolisstyrelsen", "Polismyndigheten", CorrectionCategory::Authority, 0.9),
    ("Datainspektionen", "Integritetsskyddsmyndigheten", CorrectionCategory::Authority, 0.95),
    ("Riksskatteverket", "Skatteverket", CorrectionCategory::Authority, 0.95),
    ("personuppgiftslagen", "dataskyddsförordningen", CorrectionCategory::Statute, 0.9),
    ("socialbidrag", "ekonomiskt bistånd", CorrectionCategory::Terminology, 0.9),
    ("förtidspension", "sjukersättning", CorrectionCategory::Terminology, 0.85),
    ("sjukbidrag", "sjukersättning", CorrectionCategory::Terminology, 0.85),
    ("hemspråk", "modersmål", CorrectionCategory::Terminology, 0.85),
    ("dagis", "förskola", CorrectionCategory::Terminology, 0.8),
];

static RULES: LazyLock<Vec<TermRule>> = LazyLock::new(|| {
    TERMS
        .iter()
        .map(|(term, replacement, category, confidence)| TermRule {
            pattern: Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term)))
                .expect("term pattern"),
            replacement,
            category: *category,
            confidence: *confidence,
        })
        .collect()
});

/// Keeps the capitalization of the first letter of the matched text.
fn match_case(matched: &str, replacement: &str) -> String {
    let starts_upper = matched.chars().next().is_some_and(char::is_uppercase);
    let mut chars = replacement.chars();
    match chars.next() {
        Some(first) if starts_upper && first.is_lowercase() => {
            first.to_uppercase().chain(chars).collect()
        }
        _ => replacement.to_string(),
    }
}

/// Replaces outdated Swedish legal terminology with current terms.
#[derive(Debug, Clone, Default)]
pub struct TermCorrector;

impl TermCorrector {
    pub fn new() -> Self {
        Self
    }

    pub fn correct(&self, text: &str) -> (String, Vec<AppliedCorrection>) {
        let mut corrected = text.to_string();
        let mut applied = Vec::new();

        for rule in RULES.iter() {
            if !rule.pattern.is_match(&corrected) {
                continue;
            }

            corrected = rule
                .pattern
                .replace_all(&corrected, |caps: &Captures| {
                    let original = &caps[0];
                    let replacement = match_case(original, rule.replacement);
                    applied.push(AppliedCorrection {
                        original: original.to_string(),
                        corrected: replacement.clone(),
                        category: rule.category,
                        confidence: rule.confidence,
                    });
                    replacement
                })
                .into_owned();
        }

        (corrected, applied)
    }

    /// Mean confidence of the applied corrections, 1.0 when none were applied.
    pub fn aggregate_confidence(corrections: &[AppliedCorrection]) -> f32 {
        if corrections.is_empty() {
            return 1.0;
        }
        corrections.iter().map(|c| c.confidence).sum::<f32>() / corrections.len() as f32
    }
}
