use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    Crisis,
    Pii,
    TopicRelevance,
    ResponseSafety,
}

impl ValidatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crisis => "crisis",
            Self::Pii => "pii",
            Self::TopicRelevance => "topic_relevance",
            Self::ResponseSafety => "response_safety",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOutcome {
    Pass,
    Intercept,
    Escalate,
}

impl VerdictOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Intercept => "intercept",
            Self::Escalate => "escalate",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiClass {
    Name,
    Phone,
    Email,
    InsuranceId,
    Ssn,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Remediation {
    CrisisResources { version: String, message: String },
    Redacted { text: String, classes: Vec<PiiClass> },
    Message { text: String },
}

/// Result of one validator evaluation. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub validator: ValidatorKind,
    pub outcome: VerdictOutcome,
    pub reason_code: String,
    pub remediation: Option<Remediation>,
    pub evaluated_at: DateTime<Utc>,
}

impl SafetyVerdict {
    pub fn pass(validator: ValidatorKind) -> Self {
        Self {
            validator,
            outcome: VerdictOutcome::Pass,
            reason_code: "clear".to_string(),
            remediation: None,
            evaluated_at: Utc::now(),
        }
    }

    pub fn intercept(
        validator: ValidatorKind,
        reason_code: impl Into<String>,
        remediation: Remediation,
    ) -> Self {
        Self {
            validator,
            outcome: VerdictOutcome::Intercept,
            reason_code: reason_code.into(),
            remediation: Some(remediation),
            evaluated_at: Utc::now(),
        }
    }

    pub fn escalate(
        validator: ValidatorKind,
        reason_code: impl Into<String>,
        remediation: Remediation,
    ) -> Self {
        Self {
            validator,
            outcome: VerdictOutcome::Escalate,
            reason_code: reason_code.into(),
            remediation: Some(remediation),
            evaluated_at: Utc::now(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.outcome == VerdictOutcome::Pass
    }

    /// The user-facing text carried by the remediation, if any.
    pub fn remediation_text(&self) -> Option<&str> {
        match self.remediation.as_ref()? {
            Remediation::CrisisResources { message, .. } => Some(message),
            Remediation::Redacted { text, .. } => Some(text),
            Remediation::Message { text } => Some(text),
        }
    }
}

/// Versioned crisis-resources block returned on every escalation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisResources {
    pub version: String,
    pub message: String,
    pub hotline: String,
    pub text_line: String,
}

impl Default for CrisisResources {
    fn default() -> Self {
        Self {
            version: "2024.1".to_string(),
            message: "It sounds like you are going through something really painful, and you \
                      deserve support right now. If you are in immediate danger, call 911."
                .to_string(),
            hotline: "Call or text 988 to reach the 988 Suicide & Crisis Lifeline (24/7)."
                .to_string(),
            text_line: "Text HOME to 741741 to reach the Crisis Text Line (24/7).".to_string(),
        }
    }
}

impl CrisisResources {
    pub fn payload(&self) -> String {
        format!("{}\n- {}\n- {}", self.message.trim(), self.hotline.trim(), self.text_line.trim())
    }

    pub fn is_complete(&self) -> bool {
        [&self.version, &self.message, &self.hotline, &self.text_line]
            .iter()
            .all(|value| !value.trim().is_empty())
    }
}
