use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use navigator_core::domain::agent::AgentId;

static LOCATION_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i:\b(?:near|in|around|close\s+to|outside(?:\s+of)?|within\s+\d+\s+miles\s+of)\s+)",
        r"([A-Z][a-zA-Z.'-]+(?:\s+[A-Z][a-zA-Z.'-]+){0,3}(?:,\s*[A-Z]{2}\b)?)",
    ))
    .expect("invalid LOCATION_PHRASE regex")
});

static BARE_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][a-zA-Z.'-]+(?:\s+[A-Z][a-zA-Z.'-]+){0,3}(?:,\s*[A-Za-z]{2})?)\.?$")
        .expect("invalid BARE_LOCATION regex")
});

static ZIP_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{5}(?:-\d{4})?\b").expect("invalid ZIP_CODE regex"));

static PREFERRED_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:
            (?:next\s+)?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday)
          | tomorrow
          | today
        )
        (?:\s+(?:morning|afternoon|evening))?
        (?:\s+(?:at\s+)?\d{1,2}(?::\d{2})?\s*(?:am|pm))?
        | \b\d{1,2}(?::\d{2})?\s*(?:am|pm)\b
        | \b\d{1,2}/\d{1,2}\b",
    )
    .expect("invalid PREFERRED_TIME regex")
});

static NUMBERED_CHOICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:option|number|no\.|#)\s*([1-5])\b")
        .expect("invalid NUMBERED_CHOICE regex")
});

const NON_LOCATION_WORDS: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "january",
    "february", "march", "april", "may", "june", "july", "august", "september", "october",
    "november", "december", "yes", "no", "hi", "hello", "hey", "thanks", "ok", "okay", "sure",
    "aetna", "cigna", "medicaid", "medicare", "humana", "kaiser", "tricare", "anthem",
];

const GREETINGS: &[&str] =
    &["hi", "hello", "hey", "good", "morning", "afternoon", "evening", "there", "howdy"];

const WRAP_UP_PHRASES: &[&str] = &[
    "that's all",
    "thats all",
    "that is all",
    "that's it",
    "i'm done",
    "im done",
    "all set",
    "no thanks",
    "nothing else",
    "goodbye",
    "bye",
];

const AFFIRMATIONS: &[&str] = &["yes", "yeah", "yep", "sure", "ok", "okay", "please", "definitely"];

const NEGATIONS: &[&str] = &["no", "not", "don't", "dont", "nope"];

const REQUEST_VERBS: &[&str] = &[
    "find", "search", "locate", "look", "looking", "book", "schedule", "reschedule", "verify",
    "check", "remind", "send", "message", "contact", "fill", "start",
];

/// What the user is asking the navigator to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceNeed {
    FindFacility,
    VerifyInsurance,
    Schedule,
    Intake,
    Reminder,
    Communicate,
}

impl ServiceNeed {
    pub fn agent(&self) -> AgentId {
        match self {
            Self::FindFacility => AgentId::FacilitySearch,
            Self::VerifyInsurance => AgentId::InsuranceVerification,
            Self::Schedule => AgentId::Scheduler,
            Self::Intake => AgentId::IntakeForm,
            Self::Reminder => AgentId::Reminder,
            Self::Communicate => AgentId::Communication,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FindFacility => "find_facility",
            Self::VerifyInsurance => "verify_insurance",
            Self::Schedule => "schedule",
            Self::Intake => "intake",
            Self::Reminder => "reminder",
            Self::Communicate => "communicate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedIntent {
    pub need: Option<ServiceNeed>,
    pub location: Option<String>,
    pub service_filters: Vec<String>,
    pub payers: Vec<String>,
    pub preferred_time: Option<String>,
    pub urgency: Option<String>,
    /// Zero-based pick from a previously listed set of results.
    pub facility_choice: Option<usize>,
    pub wraps_up: bool,
    pub is_greeting: bool,
    /// The message contains an action verb, not just a topic.
    pub is_explicit_request: bool,
    /// A plain "yes" or "ok" to the last question.
    pub affirms: bool,
}

impl ExtractedIntent {
    /// A different specialist should take over from `current`.
    pub fn redirect_from(&self, current: AgentId) -> Option<AgentId> {
        let target = self.need?.agent();
        (self.is_explicit_request && target != current).then_some(target)
    }
}

#[derive(Clone, Debug, Default)]
pub struct IntentExtractor;

impl IntentExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> ExtractedIntent {
        let normalized_text = normalize_text(text);
        let tokens = tokenize(&normalized_text);

        let location = extract_location(text);
        let service_filters = extract_service_filters(&normalized_text, &tokens);
        let payers = extract_payers(&normalized_text, &tokens);
        let preferred_time = extract_preferred_time(text);
        let urgency = extract_urgency(&normalized_text);
        let facility_choice = extract_facility_choice(text, &tokens);
        let need = classify_need(&normalized_text, &tokens, location.is_some(), &service_filters);
        let wraps_up = WRAP_UP_PHRASES.iter().any(|phrase| contains_phrase(&tokens, phrase));
        let is_greeting =
            !tokens.is_empty() && tokens.iter().all(|token| GREETINGS.contains(&token.as_str()));
        let is_explicit_request =
            need.is_some() && tokens.iter().any(|token| REQUEST_VERBS.contains(&token.as_str()));

        let affirms = !wraps_up
            && any_token(&tokens, AFFIRMATIONS)
            && !any_token(&tokens, NEGATIONS);

        ExtractedIntent {
            need,
            location,
            service_filters,
            payers,
            preferred_time,
            urgency,
            facility_choice,
            wraps_up,
            is_greeting,
            is_explicit_request,
            affirms,
        }
    }

    /// Reads a reply that is nothing but a place, e.g. "Decatur, GA" or "30303".
    pub fn parse_bare_location(&self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if let Some(zip) = ZIP_CODE.find(trimmed) {
            if zip.as_str().len() + 1 >= trimmed.len() {
                return Some(zip.as_str().to_string());
            }
        }
        let captures = BARE_LOCATION.captures(trimmed)?;
        let place = captures.get(1)?.as_str().trim();
        let first_word = place.split_whitespace().next().unwrap_or_default().to_ascii_lowercase();
        if NON_LOCATION_WORDS.contains(&first_word.trim_end_matches(',')) {
            return None;
        }
        Some(place.to_string())
    }
}

fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase().replace('’', "'")
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() || matches!(character, '\'' | '-' | '/') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let words = phrase.split_whitespace().collect::<Vec<_>>();
    if words.is_empty() || words.len() > tokens.len() {
        return false;
    }
    tokens.windows(words.len()).any(|window| window.iter().zip(&words).all(|(a, b)| a == b))
}

fn any_token(tokens: &[String], candidates: &[&str]) -> bool {
    tokens.iter().any(|token| candidates.contains(&token.as_str()))
}

fn extract_location(text: &str) -> Option<String> {
    let from_phrase = LOCATION_PHRASE.captures_iter(text).find_map(|captures| {
        let place = captures.get(1)?.as_str().trim().trim_end_matches('.');
        let first_word = place.split_whitespace().next()?.to_ascii_lowercase();
        (!NON_LOCATION_WORDS.contains(&first_word.trim_end_matches(',')))
            .then(|| place.to_string())
    });
    from_phrase.or_else(|| ZIP_CODE.find(text).map(|zip| zip.as_str().to_string()))
}

fn extract_service_filters(normalized_text: &str, tokens: &[String]) -> Vec<String> {
    let mut filters = BTreeSet::new();

    if any_token(tokens, &["detox", "detoxification", "withdrawal", "withdrawals"]) {
        filters.insert("detox");
    }
    if any_token(tokens, &["outpatient", "iop", "php"]) {
        filters.insert("outpatient");
    }
    if any_token(tokens, &["residential", "inpatient", "live-in"]) {
        filters.insert("residential");
    }
    if any_token(tokens, &["mat", "suboxone", "methadone", "buprenorphine", "vivitrol"])
        || normalized_text.contains("medication-assisted")
        || normalized_text.contains("medication assisted")
    {
        filters.insert("mat");
    }
    if normalized_text.contains("mental health")
        || any_token(tokens, &["therapy", "counseling", "psychiatric", "depression", "anxiety"])
    {
        filters.insert("mental_health");
    }
    if any_token(tokens, &["teen", "teens", "adolescent", "adolescents", "youth"]) {
        filters.insert("adolescent");
    }

    filters.into_iter().map(str::to_string).collect()
}

fn extract_payers(normalized_text: &str, tokens: &[String]) -> Vec<String> {
    let mut payers = BTreeSet::new();
    let aliases: [(&str, &[&str]); 9] = [
        ("aetna", &["aetna"]),
        ("cigna", &["cigna"]),
        ("unitedhealthcare", &["unitedhealthcare", "uhc", "united"]),
        ("humana", &["humana"]),
        ("kaiser", &["kaiser"]),
        ("medicaid", &["medicaid"]),
        ("medicare", &["medicare"]),
        ("tricare", &["tricare"]),
        ("anthem", &["anthem"]),
    ];
    for (payer, names) in aliases {
        if any_token(tokens, names) {
            payers.insert(payer);
        }
    }
    if any_token(tokens, &["bcbs"])
        || normalized_text.contains("blue cross")
        || normalized_text.contains("blue shield")
    {
        payers.insert("bcbs");
    }
    payers.into_iter().map(str::to_string).collect()
}

fn extract_preferred_time(text: &str) -> Option<String> {
    PREFERRED_TIME.find(text).map(|found| found.as_str().trim().to_string())
}

fn extract_urgency(normalized_text: &str) -> Option<String> {
    let patterns: [(&str, &[&str]); 3] = [
        ("urgent", &["urgent", "asap", "right away", "immediately", "as soon as possible"]),
        ("soon", &["soon", "this week", "next week"]),
        ("flexible", &["flexible", "no rush", "whenever", "not in a hurry"]),
    ];
    patterns
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|phrase| normalized_text.contains(phrase)))
        .map(|(urgency, _)| (*urgency).to_string())
}

fn extract_facility_choice(text: &str, tokens: &[String]) -> Option<usize> {
    let ordinals: [&[&str]; 5] = [
        &["first", "1st"],
        &["second", "2nd"],
        &["third", "3rd"],
        &["fourth", "4th"],
        &["fifth", "5th"],
    ];
    if let Some(index) = ordinals.iter().position(|names| any_token(tokens, names)) {
        return Some(index);
    }
    NUMBERED_CHOICE
        .captures(text)
        .and_then(|captures| captures.get(1)?.as_str().parse::<usize>().ok())
        .map(|number| number - 1)
}

fn classify_need(
    normalized_text: &str,
    tokens: &[String],
    has_location: bool,
    service_filters: &[String],
) -> Option<ServiceNeed> {
    if any_token(tokens, &["remind", "reminder", "reminders"]) {
        return Some(ServiceNeed::Reminder);
    }
    if any_token(tokens, &["message", "contact", "email"])
        || normalized_text.contains("let them know")
        || normalized_text.contains("reach out")
    {
        return Some(ServiceNeed::Communicate);
    }
    if any_token(tokens, &["schedule", "book", "appointment", "appt", "reschedule"]) {
        return Some(ServiceNeed::Schedule);
    }
    if any_token(tokens, &["intake", "form", "forms", "paperwork", "questionnaire"]) {
        return Some(ServiceNeed::Intake);
    }

    let asks_insurance = any_token(
        tokens,
        &["insurance", "insured", "covered", "coverage", "accept", "accepts", "in-network"],
    ) || normalized_text.contains("take my")
        || !extract_payers(normalized_text, tokens).is_empty();
    let asks_facility = has_location
        || !service_filters.is_empty()
        || any_token(
            tokens,
            &[
                "facility", "facilities", "center", "centers", "clinic", "clinics", "rehab",
                "program", "programs", "treatment", "provider", "providers", "sober",
            ],
        );

    match (asks_insurance, asks_facility) {
        (true, true) if has_location => Some(ServiceNeed::FindFacility),
        (true, _) => Some(ServiceNeed::VerifyInsurance),
        (false, true) => Some(ServiceNeed::FindFacility),
        (false, false) => None,
    }
}
