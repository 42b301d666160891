use once_cell::sync::Lazy;
use regex::Regex;

use navigator_core::domain::safety::{Remediation, SafetyVerdict, ValidatorKind};

use super::{SafetyContext, SafetyValidator, SAFE_FALLBACK_REPLY};

static DIAGNOSIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:you|you've|you\s+have|you\s+likely\s+have|you\s+probably\s+have|you\s+are|you're)\s+
        (?:been\s+)?(?:suffering\s+from\s+|diagnosed\s+with\s+)?
        (?:an?\s+)?(?:clinical\s+|severe\s+|major\s+)?
        (?:depression|bipolar|schizophrenia|ptsd|adhd|ocd
          |(?:alcohol|opioid|substance|stimulant)\s+use\s+disorder
          |\w+\s+disorder|an\s+addict|addicted|alcoholic)\b",
    )
    .expect("invalid DIAGNOSIS regex")
});

static MEDICATION_INSTRUCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:
            \d+(?:\.\d+)?\s?(?:mg|mcg|ml)\b
          | (?:stop|start|quit|increase|decrease|double|reduce|taper)\s+(?:taking\s+|using\s+)?
            (?:your\s+)?(?:medication|meds|dose|dosage|suboxone|methadone|naltrexone
              |buprenorphine|antidepressants?|benzos?|xanax)
          | take\s+(?:\w+\s+){0,2}(?:pills?|tablets?)\s+(?:a|per|every)\s+day
        )",
    )
    .expect("invalid MEDICATION_INSTRUCTION regex")
});

static DEFINITIVE_CLAIM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:guaranteed?\s+to\s+(?:cure|work|fix)
          | will\s+(?:definitely\s+)?cure
          | 100\s?%\s+(?:success|effective|cure)
          | cure\s+your\s+addiction
          | never\s+relapse\s+again)",
    )
    .expect("invalid DEFINITIVE_CLAIM regex")
});

/// Rejects agent drafts that diagnose, instruct on medication, or promise outcomes.
#[derive(Clone, Debug, Default)]
pub struct ResponseSafetyChecker;

impl ResponseSafetyChecker {
    pub fn new() -> Self {
        Self
    }

    fn reason_code(text: &str) -> Option<&'static str> {
        if DIAGNOSIS.is_match(text) {
            Some("diagnosis")
        } else if MEDICATION_INSTRUCTION.is_match(text) {
            Some("medication_instruction")
        } else if DEFINITIVE_CLAIM.is_match(text) {
            Some("definitive_claim")
        } else {
            None
        }
    }
}

impl SafetyValidator for ResponseSafetyChecker {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::ResponseSafety
    }

    fn evaluate(&self, text: &str, _context: &SafetyContext<'_>) -> SafetyVerdict {
        match Self::reason_code(text) {
            Some(reason_code) => SafetyVerdict::intercept(
                ValidatorKind::ResponseSafety,
                reason_code,
                Remediation::Message { text: SAFE_FALLBACK_REPLY.to_string() },
            ),
            None => SafetyVerdict::pass(ValidatorKind::ResponseSafety),
        }
    }
}
