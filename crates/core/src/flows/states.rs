use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    New,
    AwaitingInput,
    ValidatingPre,
    Dispatching,
    ValidatingPost,
    Responding,
    Intercepted,
    Closed,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::AwaitingInput => "awaiting_input",
            Self::ValidatingPre => "validating_pre",
            Self::Dispatching => "dispatching",
            Self::ValidatingPost => "validating_post",
            Self::Responding => "responding",
            Self::Intercepted => "intercepted",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "awaiting_input" => Some(Self::AwaitingInput),
            "validating_pre" => Some(Self::ValidatingPre),
            "dispatching" => Some(Self::Dispatching),
            "validating_post" => Some(Self::ValidatingPost),
            "responding" => Some(Self::Responding),
            "intercepted" => Some(Self::Intercepted),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    SessionOpened,
    InputReceived,
    PreChecksPassed,
    PreCheckIntercepted,
    AgentReturned,
    AgentFailed,
    PostChecksPassed,
    PostCheckIntercepted,
    TurnCommitted,
    InterceptEmitted,
    CloseRequested,
}

/// Facts the transition guards need about the turn in flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub has_sanitized_input: bool,
    pub has_draft: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnPhase,
    pub to: TurnPhase,
    pub event: TurnEvent,
}
