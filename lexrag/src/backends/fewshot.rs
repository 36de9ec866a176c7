use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::{ExampleStore, FewShotExample};
use crate::classify::Intent;
use crate::error::{LexError, Result};

fn example(intent: Intent, question: &str, answer: &str) -> FewShotExample {
    FewShotExample {
        intent,
        question: question.to_string(),
        answer: answer.to_string(),
    }
}

fn builtin_examples() -> Vec<FewShotExample> {
    vec![
        example(
            Intent::Definition,
            "Vad innebär god tro vid köp av lös egendom?",
            "God tro innebär att köparen varken kände till eller borde ha känt till att säljaren saknade rätt att sälja egendomen [1]. \
             Regeln finns i 2 § lagen (1986:796) om godtrosförvärv av lösöre [1].",
        ),
        example(
            Intent::Procedure,
            "Hur överklagar jag ett beslut från Försäkringskassan?",
            "1. Begär omprövning hos Försäkringskassan inom två månader från att du fick beslutet [1]. \
             2. Om omprövningen inte går dig till mötes kan du överklaga till förvaltningsrätten [1].",
        ),
        example(
            Intent::Rights,
            "Har jag rätt till ledighet för att vårda sjukt barn?",
            "Ja. En förälder har rätt till ledighet från anställningen när hen får tillfällig föräldrapenning [1], \
             enligt 8 § föräldraledighetslagen (1995:584) [1].",
        ),
        example(
            Intent::StatuteLookup,
            "Vad säger 7 § lagen om anställningsskydd?",
            "Enligt 7 § LAS ska en uppsägning från arbetsgivarens sida vara sakligt grundad [1].",
        ),
        example(
            Intent::LegislativeHistory,
            "Varför infördes kravet på saklig grund?",
            "Av förarbetena framgår att syftet var att stärka arbetstagarens skydd mot godtyckliga uppsägningar [1].",
        ),
        example(
            Intent::Comparison,
            "Vad är skillnaden mellan samboegendom och giftorättsgods?",
            "Samboegendom omfattar endast gemensam bostad och bohag som skaffats för gemensamt bruk [1], \
             medan giftorättsgods omfattar all egendom som inte är enskild [2].",
        ),
        example(
            Intent::General,
            "Vilka regler gäller när grannens träd skuggar min tomt?",
            "Det finns ingen särskild lag om skuggning, men bestämmelserna om grannelagsrätt i 3 kap. jordabalken kan bli tillämpliga [1].",
        ),
    ]
}

/// Few-shot examples held in memory, keyed by intent.
#[derive(Clone)]
pub struct StaticExampleStore {
    examples: Arc<Vec<FewShotExample>>,
}

impl Default for StaticExampleStore {
    fn default() -> Self {
        Self::new(builtin_examples())
    }
}

impl StaticExampleStore {
    pub fn new(examples: Vec<FewShotExample>) -> Self {
        Self {
            examples: Arc::new(examples),
        }
    }

    /// Replaces the built-in examples with a JSON array read from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let examples: Vec<FewShotExample> = serde_json::from_str(&content)?;

        if examples.is_empty() {
            return Err(LexError::Validation(format!(
                "Few-shot file {} contains no examples",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), count = examples.len(), "Loaded few-shot examples");
        Ok(Self::new(examples))
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

#[async_trait]
impl ExampleStore for StaticExampleStore {
    async fn examples_for(&self, intent: Intent, limit: usize) -> Result<Vec<FewShotExample>> {
        let mut selected: Vec<FewShotExample> = self
            .examples
            .iter()
            .filter(|e| e.intent == intent)
            .take(limit)
            .cloned()
            .collect();

        if selected.is_empty() && intent != Intent::SmallTalk {
            selected = self
                .examples
                .iter()
                .filter(|e| e.intent == Intent::General)
                .take(limit)
                .cloned()
                .collect();
        }

        Ok(selected)
    }
}
