use once_cell::sync::Lazy;
use regex::Regex;

use navigator_core::domain::safety::{CrisisResources, Remediation, SafetyVerdict, ValidatorKind};

use super::{SafetyContext, SafetyValidator};

static SELF_HARM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:
            kill(?:ing)?\s+my\s?self
          | end(?:ing)?\s+(?:my|it)\s+(?:life|all)
          | take\s+my\s+(?:own\s+)?life
          | suicid(?:e|al)
          | want(?:\s+to|na)\s+die
          | better\s+off\s+dead
          | no\s+reason\s+to\s+(?:live|go\s+on)
          | don'?t\s+want\s+to\s+(?:live|be\s+alive|wake\s+up)
          | hurt(?:ing)?\s+my\s?self
          | harm(?:ing)?\s+my\s?self
          | self[\s-]?harm
          | cut(?:ting)?\s+my\s?self
          | overdos(?:e|ed|ing)\s+on\s+purpose
        )\b",
    )
    .expect("invalid SELF_HARM regex")
});

static HARM_TO_OTHERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:
            kill(?:ing)?\s+(?:someone|somebody|him|her|them|people)
          | hurt(?:ing)?\s+(?:someone|somebody|people|others)
          | in\s+(?:immediate\s+)?danger
          | (?:he|she|they)\s+(?:is|are)\s+going\s+to\s+hurt\s+me
        )\b",
    )
    .expect("invalid HARM_TO_OTHERS regex")
});

/// Flags self-harm, suicide and acute-danger language. Runs first on every
/// inbound message; an escalation short-circuits everything else.
#[derive(Clone, Debug)]
pub struct CrisisDetector {
    resources: CrisisResources,
}

impl CrisisDetector {
    pub fn new(resources: CrisisResources) -> Self {
        Self { resources }
    }

    pub fn resources(&self) -> &CrisisResources {
        &self.resources
    }

    fn reason_code(text: &str) -> Option<&'static str> {
        if SELF_HARM.is_match(text) {
            Some("self_harm_language")
        } else if HARM_TO_OTHERS.is_match(text) {
            Some("acute_danger_language")
        } else {
            None
        }
    }
}

impl Default for CrisisDetector {
    fn default() -> Self {
        Self::new(CrisisResources::default())
    }
}

impl SafetyValidator for CrisisDetector {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Crisis
    }

    fn evaluate(&self, text: &str, _context: &SafetyContext<'_>) -> SafetyVerdict {
        match Self::reason_code(text) {
            Some(reason_code) => SafetyVerdict::escalate(
                ValidatorKind::Crisis,
                reason_code,
                Remediation::CrisisResources {
                    version: self.resources.version.clone(),
                    message: self.resources.payload(),
                },
            ),
            None => SafetyVerdict::pass(ValidatorKind::Crisis),
        }
    }
}
