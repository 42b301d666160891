use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use navigator_core::domain::agent::{AgentId, AgentResponse, Handoff};
use navigator_core::domain::session::SlotKey;
use navigator_core::domain::tool::{ToolName, ToolStatus};

use super::{intent_slots, wrap_up_or_redirect, AgentContext, AgentFailure, AgentHandler};

static MESSAGE_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?is)\b(?:saying|that\s+says|to\s+say|tell\s+them|let\s+them\s+know)\b",
        r"\s*(?:that\s+)?[:,]?\s*(.+)$",
    ))
    .expect("invalid MESSAGE_BODY regex")
});

const AWAITING_BODY: &str = "awaiting_body";

/// Sends a message to the selected facility on the user's behalf.
#[derive(Clone, Debug, Default)]
pub struct CommunicationAgent;

impl CommunicationAgent {
    pub fn new() -> Self {
        Self
    }

    fn body(context: &AgentContext<'_>) -> Option<String> {
        if let Some(captures) = MESSAGE_BODY.captures(context.input) {
            let body = captures.get(1)?.as_str().trim().trim_matches('"');
            return (!body.is_empty()).then(|| body.to_string());
        }
        let awaiting = context.slot(SlotKey::MessageStatus) == Some(AWAITING_BODY);
        let body = context.input.trim();
        (awaiting && context.spoke_last(AgentId::Communication) && !body.is_empty())
            .then(|| body.to_string())
    }
}

#[async_trait]
impl AgentHandler for CommunicationAgent {
    fn id(&self) -> AgentId {
        AgentId::Communication
    }

    async fn handle(&self, context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        if let Some(response) = wrap_up_or_redirect(self.id(), context) {
            return Ok(response);
        }
        let response = AgentResponse::reply(String::new()).with_slots(intent_slots(context.intent));

        let Some(facility_id) = context.slot(SlotKey::SelectedFacilityId) else {
            return Ok(AgentResponse {
                draft: "Which facility should I message? Let's find it first.".to_string(),
                ..response.with_handoff(Handoff::To(AgentId::FacilitySearch))
            });
        };
        let facility = context.selected_facility_name();

        let Some(body) = Self::body(context) else {
            return Ok(AgentResponse {
                draft: format!("What would you like me to say to {facility}?"),
                ..response
            }
            .with_slot(SlotKey::MessageStatus, AWAITING_BODY));
        };

        let result = context
            .tools
            .call(ToolName::SendMessage, json!({ "facility_id": facility_id, "body": body }))
            .await;
        if matches!(result.status, ToolStatus::Failed { retryable: true, .. }) {
            return Err(AgentFailure::tool(result));
        }

        let response = match &result.status {
            ToolStatus::Succeeded { .. } => AgentResponse {
                draft: format!("Your message was delivered to {facility}."),
                ..response
            }
            .with_slot(SlotKey::MessageStatus, "delivered")
            .completed(),
            ToolStatus::Indeterminate { .. } => AgentResponse {
                draft: format!(
                    "I sent your message to {facility}, but I couldn't confirm delivery, so it's \
                     unconfirmed. Please don't resend it yet, since that could deliver it twice."
                ),
                ..response
            }
            .with_slot(SlotKey::MessageStatus, "unconfirmed"),
            ToolStatus::Failed { .. } => AgentResponse {
                draft: format!(
                    "{facility} couldn't accept that message. Would you like to rephrase it?"
                ),
                ..response
            }
            .with_slot(SlotKey::MessageStatus, AWAITING_BODY),
        };
        Ok(response.with_tool_result(result))
    }
}
