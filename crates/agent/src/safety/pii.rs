use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use navigator_core::domain::safety::{PiiClass, Remediation, SafetyVerdict, ValidatorKind};

use super::{Direction, SafetyContext, SafetyValidator, PRIVACY_NOTICE};

pub const REDACTION_TOKEN: &str = "[REDACTED]";

static NAME_INTRO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i:\b(?:my\s+name\s+is|name\s+is|my\s+name's|call\s+me)\s+)",
        r"([A-Z][a-zA-Z'-]+(?:\s+[A-Z][a-zA-Z'-]+){0,2})",
    ))
    .expect("invalid NAME_INTRO regex")
});

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b")
        .expect("invalid PHONE regex")
});

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("invalid EMAIL regex")
});

static SSN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("invalid SSN regex"));

static LABELLED_MEMBER_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i:\b(?:member|policy|subscriber|insurance|group)\s*(?:id|number|no\.?|#)\s*",
        r"(?:is\s+|:\s*|#\s*)?)([A-Za-z0-9][A-Za-z0-9-]{4,19})\b",
    ))
    .expect("invalid LABELLED_MEMBER_ID regex")
});

static BARE_MEMBER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2,4}\d{6,12}\b").expect("invalid BARE_MEMBER_ID regex"));

/// Words that carry no request content on their own once identifiers are removed.
const FILLER_WORDS: [&str; 22] = [
    "a", "am", "and", "at", "call", "email", "hi", "hello", "i", "id", "is", "it", "me", "my",
    "name", "number", "phone", "ssn", "the", "this", "to", "your",
];

/// Which identifier classes a redaction pass removes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PiiScope {
    /// Everything: user text entering the pipeline and tool arguments.
    All,
    /// Text heading back to the user. Facility phone numbers and names stay readable.
    Outbound,
}

impl PiiScope {
    fn includes(&self, class: PiiClass) -> bool {
        match self {
            Self::All => true,
            Self::Outbound => {
                matches!(class, PiiClass::Email | PiiClass::Ssn | PiiClass::InsuranceId)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redaction {
    pub text: String,
    pub classes: Vec<PiiClass>,
    /// Original substrings that were removed, in order of appearance.
    pub removed: Vec<String>,
}

impl Redaction {
    pub fn changed(&self) -> bool {
        !self.removed.is_empty()
    }

    /// True when nothing meaningful survives the redaction.
    pub fn is_insufficient(&self) -> bool {
        self.changed() && !has_meaningful_words(&self.text)
    }
}

#[derive(Clone, Debug, Default)]
pub struct PiiRedactor;

impl PiiRedactor {
    pub fn new() -> Self {
        Self
    }

    pub fn redact(&self, text: &str, scope: PiiScope, known_identifiers: &[String]) -> Redaction {
        let mut spans: Vec<(usize, usize, Option<PiiClass>)> = Vec::new();

        if scope.includes(PiiClass::Name) {
            collect_group(&NAME_INTRO, text, PiiClass::Name, &mut spans);
        }
        if scope.includes(PiiClass::Email) {
            collect_match(&EMAIL, text, PiiClass::Email, &mut spans);
        }
        if scope.includes(PiiClass::Ssn) {
            collect_match(&SSN, text, PiiClass::Ssn, &mut spans);
        }
        if scope.includes(PiiClass::InsuranceId) {
            collect_group(&LABELLED_MEMBER_ID, text, PiiClass::InsuranceId, &mut spans);
            collect_match(&BARE_MEMBER_ID, text, PiiClass::InsuranceId, &mut spans);
        }
        if scope.includes(PiiClass::Phone) {
            collect_match(&PHONE, text, PiiClass::Phone, &mut spans);
        }
        for identifier in known_identifiers {
            let identifier = identifier.trim();
            if identifier.chars().count() < 4 {
                continue;
            }
            for (start, matched) in text.match_indices(identifier) {
                spans.push((start, start + matched.len(), None));
            }
        }

        if spans.is_empty() {
            return Redaction { text: text.to_string(), classes: Vec::new(), removed: Vec::new() };
        }

        spans.sort_by_key(|(start, end, _)| (*start, std::cmp::Reverse(*end)));
        let mut merged: Vec<(usize, usize)> = Vec::new();
        let mut classes = BTreeSet::new();
        for (start, end, class) in spans {
            if let Some(class) = class {
                classes.insert(class);
            }
            match merged.last_mut() {
                Some((_, last_end)) if start <= *last_end => *last_end = (*last_end).max(end),
                _ => merged.push((start, end)),
            }
        }

        let mut output = String::with_capacity(text.len());
        let mut removed = Vec::with_capacity(merged.len());
        let mut cursor = 0;
        for (start, end) in merged {
            output.push_str(&text[cursor..start]);
            output.push_str(REDACTION_TOKEN);
            removed.push(text[start..end].to_string());
            cursor = end;
        }
        output.push_str(&text[cursor..]);

        Redaction { text: output, classes: classes.into_iter().collect(), removed }
    }

    /// Redacts every string inside a JSON value, keys excluded.
    pub fn redact_value(&self, value: &Value, known_identifiers: &[String]) -> (Value, bool) {
        match value {
            Value::String(text) => {
                let redaction = self.redact(text, PiiScope::All, known_identifiers);
                let changed = redaction.changed();
                (Value::String(redaction.text), changed)
            }
            Value::Array(items) => {
                let mut changed = false;
                let items = items
                    .iter()
                    .map(|item| {
                        let (item, item_changed) = self.redact_value(item, known_identifiers);
                        changed |= item_changed;
                        item
                    })
                    .collect();
                (Value::Array(items), changed)
            }
            Value::Object(map) => {
                let mut changed = false;
                let map = map
                    .iter()
                    .map(|(key, item)| {
                        let (item, item_changed) = self.redact_value(item, known_identifiers);
                        changed |= item_changed;
                        (key.clone(), item)
                    })
                    .collect();
                (Value::Object(map), changed)
            }
            other => (other.clone(), false),
        }
    }

    /// Identifiers found in text, used to recognise them again later in the session.
    pub fn identifiers_in(&self, text: &str) -> Vec<String> {
        self.redact(text, PiiScope::All, &[]).removed
    }
}

impl SafetyValidator for PiiRedactor {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Pii
    }

    fn evaluate(&self, text: &str, context: &SafetyContext<'_>) -> SafetyVerdict {
        let scope = match context.direction {
            Direction::Inbound => PiiScope::All,
            Direction::Outbound => PiiScope::Outbound,
        };
        let redaction = self.redact(text, scope, context.known_identifiers);

        if !redaction.changed() {
            return SafetyVerdict::pass(ValidatorKind::Pii);
        }
        if redaction.is_insufficient() {
            return SafetyVerdict::intercept(
                ValidatorKind::Pii,
                "redaction_insufficient",
                Remediation::Message { text: PRIVACY_NOTICE.to_string() },
            );
        }
        SafetyVerdict::intercept(
            ValidatorKind::Pii,
            "pii_redacted",
            Remediation::Redacted { text: redaction.text, classes: redaction.classes },
        )
    }
}

fn collect_match(
    pattern: &Regex,
    text: &str,
    class: PiiClass,
    spans: &mut Vec<(usize, usize, Option<PiiClass>)>,
) {
    spans.extend(pattern.find_iter(text).map(|found| (found.start(), found.end(), Some(class))));
}

fn collect_group(
    pattern: &Regex,
    text: &str,
    class: PiiClass,
    spans: &mut Vec<(usize, usize, Option<PiiClass>)>,
) {
    for captures in pattern.captures_iter(text) {
        if let Some(group) = captures.get(1) {
            spans.push((group.start(), group.end(), Some(class)));
        }
    }
}

fn has_meaningful_words(text: &str) -> bool {
    text.replace(REDACTION_TOKEN, " ")
        .split(|character: char| !character.is_ascii_alphanumeric() && character != '\'')
        .filter(|word| word.chars().any(|character| character.is_ascii_alphabetic()))
        .any(|word| !FILLER_WORDS.contains(&word.to_ascii_lowercase().as_str()))
}
