//! The closed set of conversational agents and the registry that dispatches
//! to them. Agents never touch the session; they return proposals.

pub mod communication;
pub mod facility_search;
pub mod insurance;
pub mod intake;
pub mod reminder;
pub mod scheduler;
pub mod triage;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use navigator_core::domain::agent::{AgentId, AgentResponse, Handoff};
use navigator_core::domain::session::{Session, SlotKey};
use navigator_core::domain::tool::{FacilityRecord, ToolResult, ToolStatus};

use crate::conversation::ExtractedIntent;
use crate::llm::LlmClient;
use crate::tools::ToolGateway;

pub use communication::CommunicationAgent;
pub use facility_search::FacilitySearchAgent;
pub use insurance::InsuranceVerificationAgent;
pub use intake::IntakeFormAgent;
pub use reminder::ReminderAgent;
pub use scheduler::SchedulerAgent;
pub use triage::TriageAgent;

#[derive(Clone, Debug, PartialEq)]
pub struct AgentSettings {
    pub agent_timeout: Duration,
    pub llm_timeout: Duration,
    pub search_distance_miles: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(20),
            llm_timeout: Duration::from_secs(5),
            search_distance_miles: 25,
        }
    }
}

/// Everything an agent may read for one hop of a turn.
pub struct AgentContext<'a> {
    /// The turn's working copy, including slots proposed by earlier hops.
    pub session: &'a Session,
    /// Redacted user text.
    pub input: &'a str,
    pub intent: &'a ExtractedIntent,
    pub tools: &'a ToolGateway,
    pub llm: Option<&'a dyn LlmClient>,
    /// Zero for the agent that received the message, then one per handoff.
    pub hop: u32,
    pub settings: &'a AgentSettings,
}

impl AgentContext<'_> {
    pub fn slot(&self, key: SlotKey) -> Option<&str> {
        self.session.slot(key)
    }

    pub fn slot_list(&self, key: SlotKey) -> Vec<String> {
        self.slot(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The previous reply came from `agent`, so this message answers it.
    pub fn spoke_last(&self, agent: AgentId) -> bool {
        self.hop == 0
            && self
                .session
                .turns
                .last()
                .and_then(|turn| turn.handled_by.last())
                .is_some_and(|last| *last == agent)
    }

    pub fn last_search_results(&self) -> Vec<FacilityRecord> {
        self.slot(SlotKey::LastSearchResults)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub fn selected_facility_name(&self) -> String {
        self.slot(SlotKey::SelectedFacilityName).unwrap_or("the facility").to_string()
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum AgentFailure {
    #[error("agent `{0}` is not registered")]
    NotRegistered(AgentId),
    #[error("tool `{}` failed: {reason}", result.invocation.tool)]
    ToolFailure { result: Box<ToolResult>, reason: String },
    #[error("agent did not answer within {0:?}")]
    Timeout(Duration),
    #[error("agent returned an empty draft")]
    EmptyDraft,
    #[error("agent `{0}` cannot regenerate a reply")]
    RegenerationUnsupported(AgentId),
    #[error("handoff to unregistered agent `{0}`")]
    UnregisteredHandoff(AgentId),
}

impl AgentFailure {
    pub fn tool(result: ToolResult) -> Self {
        let reason = match &result.status {
            ToolStatus::Failed { reason, .. } | ToolStatus::Indeterminate { reason } => {
                reason.clone()
            }
            ToolStatus::Succeeded { .. } => "unexpected payload".to_string(),
        };
        Self::ToolFailure { result: Box::new(result), reason }
    }

    /// Tool results gathered before the failure, kept for the turn record.
    pub fn tool_results(&self) -> Vec<ToolResult> {
        match self {
            Self::ToolFailure { result, .. } => vec![result.as_ref().clone()],
            _ => Vec::new(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRegistered(_) => "not_registered",
            Self::ToolFailure { .. } => "tool_failure",
            Self::Timeout(_) => "timeout",
            Self::EmptyDraft => "empty_draft",
            Self::RegenerationUnsupported(_) => "regeneration_unsupported",
            Self::UnregisteredHandoff(_) => "unregistered_handoff",
        }
    }
}

#[async_trait]
pub trait AgentHandler: Send + Sync {
    fn id(&self) -> AgentId;

    async fn handle(&self, context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure>;

    /// Rewrites a rejected draft from the tool results it already holds.
    /// Tools are never called again here.
    async fn regenerate(
        &self,
        _context: &AgentContext<'_>,
        _rejected: &AgentResponse,
    ) -> Result<AgentResponse, AgentFailure> {
        Err(AgentFailure::RegenerationUnsupported(self.id()))
    }
}

#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Arc<dyn AgentHandler>>,
}

impl AgentRegistry {
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register(TriageAgent::new());
        registry.register(FacilitySearchAgent::new());
        registry.register(InsuranceVerificationAgent::new());
        registry.register(SchedulerAgent::new());
        registry.register(IntakeFormAgent::new());
        registry.register(ReminderAgent::new());
        registry.register(CommunicationAgent::new());
        registry
    }

    pub fn register<A>(&mut self, agent: A)
    where
        A: AgentHandler + 'static,
    {
        self.agents.insert(agent.id(), Arc::new(agent));
    }

    pub fn remove(&mut self, agent: AgentId) {
        self.agents.remove(&agent);
    }

    pub fn get(&self, agent: AgentId) -> Option<Arc<dyn AgentHandler>> {
        self.agents.get(&agent).cloned()
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.agents.contains_key(&agent)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Runs one agent under the configured timeout and checks what it returned.
    pub async fn dispatch(
        &self,
        agent: AgentId,
        context: &AgentContext<'_>,
    ) -> Result<AgentResponse, AgentFailure> {
        let handler = self.get(agent).ok_or(AgentFailure::NotRegistered(agent))?;
        let timeout = context.settings.agent_timeout;
        let response = tokio::time::timeout(timeout, handler.handle(context))
            .await
            .map_err(|_| AgentFailure::Timeout(timeout))??;
        self.check(response)
    }

    pub async fn regenerate(
        &self,
        agent: AgentId,
        context: &AgentContext<'_>,
        rejected: &AgentResponse,
    ) -> Result<AgentResponse, AgentFailure> {
        let handler = self.get(agent).ok_or(AgentFailure::NotRegistered(agent))?;
        let timeout = context.settings.agent_timeout;
        let response = tokio::time::timeout(timeout, handler.regenerate(context, rejected))
            .await
            .map_err(|_| AgentFailure::Timeout(timeout))??;
        self.check(response)
    }

    fn check(&self, response: AgentResponse) -> Result<AgentResponse, AgentFailure> {
        if let Handoff::To(target) = response.handoff {
            if !self.contains(target) {
                return Err(AgentFailure::UnregisteredHandoff(target));
            }
        }
        if !response.has_usable_draft() {
            return Err(AgentFailure::EmptyDraft);
        }
        Ok(response)
    }
}

/// Slots every agent records from what the user just said.
pub fn intent_slots(intent: &ExtractedIntent) -> BTreeMap<SlotKey, String> {
    let mut slots = BTreeMap::new();
    if let Some(location) = &intent.location {
        slots.insert(SlotKey::Location, location.clone());
    }
    if !intent.service_filters.is_empty() {
        slots.insert(SlotKey::ServiceFilters, intent.service_filters.join(","));
    }
    if !intent.payers.is_empty() {
        slots.insert(SlotKey::InsurancePayers, intent.payers.join(","));
    }
    if let Some(time) = &intent.preferred_time {
        slots.insert(SlotKey::PreferredTime, time.clone());
    }
    if let Some(urgency) = &intent.urgency {
        slots.insert(SlotKey::Urgency, urgency.clone());
    }
    slots
}

/// Shared handling for the two cases every specialist checks first.
pub(crate) fn wrap_up_or_redirect(
    current: AgentId,
    context: &AgentContext<'_>,
) -> Option<AgentResponse> {
    let intent = context.intent;
    if intent.wraps_up {
        return Some(
            AgentResponse::reply(
                "Glad I could help. If you need anything else about treatment options, \
                 just send a message.",
            )
            .with_handoff(Handoff::Complete)
            .completed(),
        );
    }
    let target = intent.redirect_from(current)?;
    Some(
        AgentResponse::reply(format!("Sure, let's switch to {}.", describe_agent(target)))
            .with_handoff(Handoff::To(target))
            .with_slots(intent_slots(intent)),
    )
}

pub fn describe_agent(agent: AgentId) -> &'static str {
    match agent {
        AgentId::Triage => "the main menu",
        AgentId::FacilitySearch => "finding a facility",
        AgentId::InsuranceVerification => "checking your insurance",
        AgentId::Scheduler => "scheduling an appointment",
        AgentId::IntakeForm => "your intake form",
        AgentId::Reminder => "setting a reminder",
        AgentId::Communication => "messaging the facility",
    }
}

pub fn display_filters(filters: &[String]) -> String {
    filters.iter().map(|filter| filter.replace('_', " ")).collect::<Vec<_>>().join(", ")
}
