//! Stateless text validators. Each one inspects text and returns a fresh
//! [`SafetyVerdict`]; none of them hold conversation state.

pub mod crisis;
pub mod pii;
pub mod relevance;
pub mod response;

use navigator_core::domain::agent::AgentId;
use navigator_core::domain::safety::{SafetyVerdict, ValidatorKind};

pub use crisis::CrisisDetector;
pub use pii::{PiiRedactor, PiiScope, Redaction};
pub use relevance::TopicRelevanceClassifier;
pub use response::ResponseSafetyChecker;

pub const SAFE_FALLBACK_REPLY: &str = "I want to make sure I give you safe, accurate information. \
     I can't offer medical advice, but I can help you find treatment facilities, check insurance \
     coverage, or schedule an appointment with a provider who can.";

pub const TOPIC_REDIRECT_MESSAGE: &str = "I'm here to help with finding mental health or \
     substance use treatment: searching for facilities, checking insurance, scheduling \
     appointments, intake forms, reminders, and messaging providers. What can I help you with?";

pub const PRIVACY_NOTICE: &str = "For your privacy I removed personal details from your message, \
     and nothing else was left for me to work with. Please tell me what kind of help you're \
     looking for without including names, phone numbers, or ID numbers.";

/// Which way text is travelling through the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone, Debug)]
pub struct SafetyContext<'a> {
    pub direction: Direction,
    pub current_agent: AgentId,
    /// Identifiers the user disclosed earlier in the session.
    pub known_identifiers: &'a [String],
}

impl<'a> SafetyContext<'a> {
    pub fn inbound(current_agent: AgentId) -> Self {
        Self { direction: Direction::Inbound, current_agent, known_identifiers: &[] }
    }

    pub fn outbound(current_agent: AgentId, known_identifiers: &'a [String]) -> Self {
        Self { direction: Direction::Outbound, current_agent, known_identifiers }
    }
}

pub trait SafetyValidator: Send + Sync {
    fn kind(&self) -> ValidatorKind;
    fn evaluate(&self, text: &str, context: &SafetyContext<'_>) -> SafetyVerdict;
}
