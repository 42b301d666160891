use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::session::SlotKey;
use crate::domain::tool::ToolResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    Triage,
    FacilitySearch,
    InsuranceVerification,
    Scheduler,
    IntakeForm,
    Reminder,
    Communication,
}

impl AgentId {
    pub const ALL: [AgentId; 7] = [
        AgentId::Triage,
        AgentId::FacilitySearch,
        AgentId::InsuranceVerification,
        AgentId::Scheduler,
        AgentId::IntakeForm,
        AgentId::Reminder,
        AgentId::Communication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::FacilitySearch => "facility_search",
            Self::InsuranceVerification => "insurance_verification",
            Self::Scheduler => "scheduler",
            Self::IntakeForm => "intake_form",
            Self::Reminder => "reminder",
            Self::Communication => "communication",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|agent| agent.as_str() == normalized)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative control-transfer request returned by an agent. The orchestrator
/// is the only component that applies it to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "target")]
pub enum Handoff {
    Remain,
    Complete,
    To(AgentId),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub draft: String,
    pub handoff: Handoff,
    pub tool_results: Vec<ToolResult>,
    pub slot_updates: BTreeMap<SlotKey, String>,
    pub task_complete: bool,
}

impl AgentResponse {
    pub fn reply(draft: impl Into<String>) -> Self {
        Self {
            draft: draft.into(),
            handoff: Handoff::Remain,
            tool_results: Vec::new(),
            slot_updates: BTreeMap::new(),
            task_complete: false,
        }
    }

    pub fn with_handoff(mut self, handoff: Handoff) -> Self {
        self.handoff = handoff;
        self
    }

    pub fn with_slot(mut self, key: SlotKey, value: impl Into<String>) -> Self {
        self.slot_updates.insert(key, value.into());
        self
    }

    pub fn with_slots(mut self, slots: BTreeMap<SlotKey, String>) -> Self {
        self.slot_updates.extend(slots);
        self
    }

    pub fn with_tool_result(mut self, result: ToolResult) -> Self {
        self.tool_results.push(result);
        self
    }

    pub fn completed(mut self) -> Self {
        self.task_complete = true;
        self
    }

    pub fn has_usable_draft(&self) -> bool {
        !self.draft.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentId, AgentResponse, Handoff};
    use crate::domain::session::SlotKey;

    #[test]
    fn agent_ids_round_trip_from_storage_encoding() {
        for agent in AgentId::ALL {
            assert_eq!(AgentId::parse(agent.as_str()), Some(agent));
        }
        assert_eq!(AgentId::parse("Facility Search"), Some(AgentId::FacilitySearch));
        assert_eq!(AgentId::parse("billing"), None);
    }

    #[test]
    fn builder_collects_slots_and_handoff() {
        let response = AgentResponse::reply("Where should I search?")
            .with_slot(SlotKey::ServiceFilters, "detox")
            .with_handoff(Handoff::To(AgentId::FacilitySearch));

        assert_eq!(response.handoff, Handoff::To(AgentId::FacilitySearch));
        assert_eq!(
            response.slot_updates.get(&SlotKey::ServiceFilters).map(String::as_str),
            Some("detox")
        );
        assert!(response.has_usable_draft());
        assert!(!AgentResponse::reply("   ").has_usable_draft());
    }
}
