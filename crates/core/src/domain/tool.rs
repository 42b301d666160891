use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    FacilitySearch,
    InsuranceVerification,
    ScheduleAppointment,
    DocumentAnalysis,
    CreateReminder,
    SendMessage,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::FacilitySearch,
        ToolName::InsuranceVerification,
        ToolName::ScheduleAppointment,
        ToolName::DocumentAnalysis,
        ToolName::CreateReminder,
        ToolName::SendMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FacilitySearch => "facility_search",
            Self::InsuranceVerification => "insurance_verification",
            Self::ScheduleAppointment => "schedule_appointment",
            Self::DocumentAnalysis => "document_analysis",
            Self::CreateReminder => "create_reminder",
            Self::SendMessage => "send_message",
        }
    }

    /// Lookups can be repeated freely; actions that book, remind or send must
    /// not be duplicated.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::FacilitySearch | Self::InsuranceVerification | Self::DocumentAnalysis)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolInvocationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: ToolInvocationId,
    pub tool: ToolName,
    pub arguments: Value,
    pub idempotency_key: Option<OperationKey>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ToolStatus {
    Succeeded { payload: Value },
    Failed { retryable: bool, reason: String },
    Indeterminate { reason: String },
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Indeterminate { .. } => "indeterminate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub invocation: ToolInvocation,
    pub status: ToolStatus,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl ToolResult {
    pub fn payload(&self) -> Option<&Value> {
        match &self.status {
            ToolStatus::Succeeded { payload } => Some(payload),
            _ => None,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self.status, ToolStatus::Indeterminate { .. })
    }
}

/// A record returned by the facility search collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub phone: String,
    #[serde(default)]
    pub services: Vec<String>,
}
