//! Harm detection for incoming questions.
//!
//! Checks run in a fixed priority order and the first match decides:
//! self-harm, exploitation, legal-framing whitelist, direct threats, then an
//! action verb co-occurring with a dangerous-topic noun.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{HarmAction, HarmCategory, HarmDetectionResult};

/// Returned instead of an answer when a question signals self-harm.
pub const CRISIS_MESSAGE: &str = "Det låter som att du har det väldigt svårt just nu, och du ska inte behöva vara ensam med det. \
Ring Självmordslinjen på 90101 eller chatta via mind.se, dygnet runt. \
Du kan också ringa 1177 Vårdguiden för stöd. Vid akut fara, ring 112.";

/// Returned when a question is blocked for harmful content.
pub const HARM_BLOCK_MESSAGE: &str = "Jag kan inte hjälpa till med detta. \
Om du har en juridisk fråga om vad som gäller enligt lag är du välkommen att ställa den.";

static SELF_HARM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(ta livet av mig|ta mitt (eget )?liv|vill inte leva( längre)?|orkar inte leva|vill dö\b|självmordstankar|skada mig själv|skära mig|hur (tar|begår) man självmord|kill myself|end my life|want to die|hurt myself|suicidal)",
    )
    .expect("self-harm pattern")
});

static EXPLOITATION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(hitta|köpa|ladda (ner|ned)|sprida|dela|skaffa|producera|find|buy|download|share|get)\b.{0,40}(barnpornografi|barnporr|nakenbilder på barn|child porn|csam)",
        r"(?i)\b(ha sex med|förföra|träffa för sex)\s+(ett |en )?(barn|minderårig|\d{1,2}[- ]?åring)",
        r"(?i)\b(sex with a (child|minor)|groom(ing)? a (child|minor))\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("exploitation pattern"))
    .collect()
});

static LEGAL_WHITELIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(vad säger (lagen|lagstiftningen|paragrafen|brottsbalken|rättspraxis)|\blagen om\b|enligt (lagen|brottsbalken|\d+\s?§)|\d+\s?§|\bkap\.|\bSFS\s?\d{4}:\d+|\b(19|20)\d{2}:\d+\b|är det (lagligt|olagligt|tillåtet|straffbart)|vilket straff|vad blir straffet|straffskala|\bbrottsbalken\b|is it (legal|illegal)|what does the law say)",
    )
    .expect("legal whitelist pattern")
});

static THREAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jag (ska|kommer att|tänker) (döda|mörda|skjuta|spränga|knivhugga|slå ihjäl)|i (will|am going to|'m going to) (kill|shoot|murder|bomb|stab))\b",
    )
    .expect("threat pattern")
});

static ACTION_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(tillverka\w*|bygg\w*|skapa\w*|framställ\w*|blanda\w*|odla\w*|syntetiser\w*|koka\w*|make|making|build|building|create|produce|synthesi[sz]e|cook|grow)\b",
    )
    .expect("action verb pattern")
});

static DANGEROUS_TOPICS: LazyLock<Vec<(HarmCategory, Regex)>> = LazyLock::new(|| {
    [
        (
            HarmCategory::WeaponsExplosives,
            r"(?i)\b(bomb\w*|spräng\w*|explosi\w*|rörbomb\w*|molotov\w*|vapen|skjutvapen|pistol\w*|ljuddämpare|granat\w*|weapons?|guns?|grenades?)\b",
        ),
        (
            HarmCategory::Drugs,
            r"(?i)\b(amfetamin\w*|kokain\w*|heroin\w*|metamfetamin\w*|meth|narkotika|knark|hasch|cannabis|mdma|ecstasy|fentanyl\w*|lsd|cocaine|methamphetamine|drugs?)\b",
        ),
        (
            HarmCategory::Poison,
            r"(?i)\b(ricin|cyanid\w*|cyanide|sarin|novitjok|novichok|arsenik|giftgas|nervgas|nerve agents?|poisons?)\b",
        ),
    ]
    .iter()
    .map(|(category, p)| (*category, Regex::new(p).expect("dangerous topic pattern")))
    .collect()
});

#[derive(Debug, Clone, Default)]
pub struct HarmDetector;

impl HarmDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, text: &str) -> HarmDetectionResult {
        if let Some(m) = SELF_HARM.find(text) {
            return HarmDetectionResult {
                action: HarmAction::Compassionate,
                category: Some(HarmCategory::SelfHarm),
                matched_pattern: Some(m.as_str().to_string()),
                message: Some(CRISIS_MESSAGE.to_string()),
                whitelisted: false,
            };
        }

        if let Some(m) = EXPLOITATION.iter().find_map(|p| p.find(text)) {
            return Self::block(HarmCategory::Exploitation, m.as_str());
        }

        if let Some(m) = LEGAL_WHITELIST.find(text) {
            return HarmDetectionResult::whitelisted(m.as_str());
        }

        if let Some(m) = THREAT.find(text) {
            return Self::block(HarmCategory::Threat, m.as_str());
        }

        if let Some(verb) = ACTION_VERB.find(text) {
            for (category, pattern) in DANGEROUS_TOPICS.iter() {
                if let Some(noun) = pattern.find(text) {
                    return Self::block(*category, &format!("{} + {}", verb.as_str(), noun.as_str()));
                }
            }
        }

        HarmDetectionResult::pass()
    }

    fn block(category: HarmCategory, matched: &str) -> HarmDetectionResult {
        HarmDetectionResult {
            action: HarmAction::Block,
            category: Some(category),
            matched_pattern: Some(matched.to_string()),
            message: Some(HARM_BLOCK_MESSAGE.to_string()),
            whitelisted: false,
        }
    }
}
