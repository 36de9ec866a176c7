use super::Intent;

/// Required answer shape for one intent, appended to the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerContract {
    pub intent: Intent,
    pub template: &'static str,
}

pub static CONTRACTS: &[AnswerContract] = &[
    AnswerContract {
        intent: Intent::Definition,
        template: "1. Definition av begreppet i en mening.\n\
                   2. Rättslig grund (lag och paragraf).\n\
                   3. Ett kort exempel på hur begreppet tillämpas.",
    },
    AnswerContract {
        intent: Intent::Procedure,
        template: "1. Numrerade steg i den ordning de ska göras.\n\
                   2. Ansvarig myndighet eller instans för varje steg.\n\
                   3. Tidsfrister som gäller.",
    },
    AnswerContract {
        intent: Intent::Rights,
        template: "1. Kort svar: ja, nej eller det beror på.\n\
                   2. Villkoren som måste vara uppfyllda, med lagrum.\n\
                   3. Undantag och begränsningar.",
    },
    AnswerContract {
        intent: Intent::StatuteLookup,
        template: "1. Vad bestämmelsen säger, med ordagrant citat.\n\
                   2. Lagens namn, SFS-nummer och paragraf.\n\
                   3. Hur bestämmelsen förhåller sig till närliggande regler.",
    },
    AnswerContract {
        intent: Intent::LegislativeHistory,
        template: "1. Vilket förarbete som avses (proposition, SOU eller betänkande).\n\
                   2. Lagstiftarens syfte enligt förarbetet.\n\
                   3. Eventuella senare ändringar.",
    },
    AnswerContract {
        intent: Intent::Comparison,
        template: "1. Kort beskrivning av vart och ett av alternativen.\n\
                   2. De viktigaste skillnaderna punkt för punkt.\n\
                   3. När det ena eller andra alternativet gäller.",
    },
    AnswerContract {
        intent: Intent::General,
        template: "Svara sakligt och strukturerat. Ange rättslig grund där den finns.",
    },
];

/// Template for `intent`, or `None` for intents without a required shape.
pub fn answer_contract(intent: Intent) -> Option<&'static str> {
    CONTRACTS
        .iter()
        .find(|contract| contract.intent == intent)
        .map(|contract| contract.template)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_talk_has_no_contract() {
        assert!(answer_contract(Intent::SmallTalk).is_none());
    }

    #[test]
    fn test_every_legal_intent_has_one_contract() {
        for intent in [
            Intent::Definition,
            Intent::Procedure,
            Intent::Rights,
            Intent::StatuteLookup,
            Intent::LegislativeHistory,
            Intent::Comparison,
            Intent::General,
        ] {
            let count = CONTRACTS.iter().filter(|c| c.intent == intent).count();
            assert_eq!(count, 1, "{intent} should have exactly one contract");
        }
    }

    #[test]
    fn test_procedure_contract_mentions_deadlines() {
        let template = answer_contract(Intent::Procedure).unwrap();
        assert!(template.contains("Tidsfrister"));
    }
}
