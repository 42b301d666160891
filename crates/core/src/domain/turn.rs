use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::safety::SafetyVerdict;
use crate::domain::tool::ToolResult;
use crate::flows::TurnPhase;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

/// User text as originally typed, kept only inside the turn record. It is
/// never serialized and its `Debug` output is masked.
#[derive(Clone)]
pub struct PrivateText(SecretString);

impl PrivateText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(SecretString::from(text.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for PrivateText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateText([private])")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDisposition {
    Responded,
    Escalated,
    Intercepted,
    AgentFailed,
}

impl TurnDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Responded => "responded",
            Self::Escalated => "escalated",
            Self::Intercepted => "intercepted",
            Self::AgentFailed => "agent_failed",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub number: u32,
    pub user_text: String,
    #[serde(skip)]
    pub private_original: Option<PrivateText>,
    pub reply: String,
    pub handled_by: Vec<AgentId>,
    pub pre_verdicts: Vec<SafetyVerdict>,
    pub post_verdicts: Vec<SafetyVerdict>,
    pub tool_results: Vec<ToolResult>,
    pub phase_trace: Vec<TurnPhase>,
    pub disposition: TurnDisposition,
    pub recorded_at: DateTime<Utc>,
}

impl Turn {
    pub fn has_private_original(&self) -> bool {
        self.private_original.is_some()
    }
}
