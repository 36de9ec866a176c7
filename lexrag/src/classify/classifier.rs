use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::Intent;
use crate::models::ResponseMode;

static SMALL_TALK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(hej|hejsan|hallå|tjena|tja|god (morgon|dag|kväll)|tack( så mycket)?|hi|hello|thanks|vem är du|vad kan du( hjälpa till med)?|hur mår du)\b",
    )
    .expect("small talk pattern")
});

static STATUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(§|\bkap\.|\bkapitlet\b|\bSFS\b|\b(19|20)\d{2}:\d+\b|vad säger (lagen|paragrafen|förordningen)|\blagrum|\bparagraf)",
    )
    .expect("statute pattern")
});

static LEGISLATIVE_HISTORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\bprop\.|\bproposition|\bSOU\b|\bDs \d|förarbete|\butskott|\bbetänkande|\blagstiftarens? (syfte|avsikt)|varför inför(de|des))",
    )
    .expect("legislative history pattern")
});

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(skillnad(en|er)? (mellan|på)|\bjämför|\bjämfört med|\bvs\.?\s)")
        .expect("comparison pattern")
});

static PROCEDURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(hur (gör|ansöker|överklagar|anmäler|begär|söker|ska jag|går (det|man) till)|vilka steg|\bansöka\b|\böverklaga\b|\banmäla\b|\bblankett)",
    )
    .expect("procedure pattern")
});

static RIGHTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(har jag rätt|rätt(en)? till|\bfår (jag|min|mitt|mina|arbetsgivaren|hyresvärden)|mina rättigheter|\bskyldig(het)?\b|\bär det (tillåtet|lagligt|olagligt))",
    )
    .expect("rights pattern")
});

static DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(vad (är|betyder|innebär|menas med)|\bdefinition|\bdefiniera|what is|what does .* mean)")
        .expect("definition pattern")
});

/// Result of rule-based classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub suggested_mode: ResponseMode,
    pub confidence: f32,
    /// Names of the rules that matched, in evaluation order.
    pub signals: Vec<&'static str>,
}

/// Keyword and pattern based intent classifier. Cheap enough to run on every
/// request before any model call.
#[derive(Debug, Clone, Default)]
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> Classification {
        let rules: [(&'static str, &LazyLock<Regex>, Intent); 6] = [
            ("statute", &STATUTE, Intent::StatuteLookup),
            ("legislative_history", &LEGISLATIVE_HISTORY, Intent::LegislativeHistory),
            ("comparison", &COMPARISON, Intent::Comparison),
            ("procedure", &PROCEDURE, Intent::Procedure),
            ("rights", &RIGHTS, Intent::Rights),
            ("definition", &DEFINITION, Intent::Definition),
        ];

        let signals: Vec<&'static str> = rules
            .iter()
            .filter(|(_, pattern, _)| pattern.is_match(text))
            .map(|(name, _, _)| *name)
            .collect();

        let intent = match signals.first() {
            Some(first) => rules
                .iter()
                .find(|(name, _, _)| name == first)
                .map(|(_, _, intent)| *intent)
                .unwrap_or_default(),
            None if Self::is_small_talk(text) => {
                return Self::result(Intent::SmallTalk, 0.9, vec!["small_talk"]);
            }
            None => Intent::General,
        };

        let confidence = match signals.len() {
            0 => 0.5,
            1 => 0.85,
            _ => 0.7,
        };

        Self::result(intent, confidence, signals)
    }

    fn is_small_talk(text: &str) -> bool {
        text.chars().count() <= 60 && SMALL_TALK.is_match(text)
    }

    fn result(intent: Intent, confidence: f32, signals: Vec<&'static str>) -> Classification {
        Classification {
            intent,
            suggested_mode: intent.suggested_mode(),
            confidence,
            signals,
        }
    }
}
