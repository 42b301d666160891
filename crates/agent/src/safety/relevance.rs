use navigator_core::domain::agent::AgentId;
use navigator_core::domain::safety::{Remediation, SafetyVerdict, ValidatorKind};

use super::{SafetyContext, SafetyValidator, TOPIC_REDIRECT_MESSAGE};

const CONVERSATIONAL: &[&str] = &[
    "hi", "hello", "hey", "there", "good", "morning", "afternoon", "evening", "thanks", "thank",
    "you", "yes", "yeah", "yep", "no", "nope", "ok", "okay", "sure", "great", "bye", "goodbye",
    "please", "first", "second", "third", "fourth", "fifth", "that", "that's", "one", "done",
    "all", "for", "now", "it", "i'm",
];

const TREATMENT_TERMS: &[&str] = &[
    "treatment", "rehab", "rehabilitation", "detox", "addiction", "addicted", "alcohol",
    "alcoholism", "drinking", "drug", "drugs", "opioid", "opioids", "heroin", "fentanyl",
    "meth", "substance", "recovery", "sober", "sobriety", "relapse", "therapy", "therapist",
    "counseling", "counselor", "psychiatrist", "mental", "depression", "anxiety", "withdrawal",
    "facility", "facilities", "clinic", "center", "program", "provider", "inpatient",
    "outpatient", "residential", "mat", "suboxone", "methadone", "insurance", "coverage",
    "covered", "payer", "medicaid", "medicare", "appointment", "schedule", "book", "intake",
    "form", "reminder", "remind", "message", "help", "care", "aetna", "cigna", "humana",
    "kaiser", "tricare", "anthem", "bcbs", "unitedhealthcare", "uhc",
];

/// Keeps triage conversations on treatment navigation. Specialist agents
/// own follow-up questions, so once one is active every message passes.
#[derive(Clone, Debug, Default)]
pub struct TopicRelevanceClassifier;

impl TopicRelevanceClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn is_relevant(&self, text: &str) -> bool {
        let tokens: Vec<String> = text
            .split(|character: char| !character.is_ascii_alphanumeric() && character != '\'')
            .filter(|token| !token.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();

        if tokens.is_empty() {
            return true;
        }
        if tokens.iter().all(|token| CONVERSATIONAL.contains(&token.as_str())) {
            return true;
        }
        tokens.iter().any(|token| TREATMENT_TERMS.contains(&token.as_str()))
    }
}

impl SafetyValidator for TopicRelevanceClassifier {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::TopicRelevance
    }

    fn evaluate(&self, text: &str, context: &SafetyContext<'_>) -> SafetyVerdict {
        if context.current_agent != AgentId::Triage || self.is_relevant(text) {
            return SafetyVerdict::pass(ValidatorKind::TopicRelevance);
        }
        SafetyVerdict::intercept(
            ValidatorKind::TopicRelevance,
            "off_topic",
            Remediation::Message { text: TOPIC_REDIRECT_MESSAGE.to_string() },
        )
    }
}
