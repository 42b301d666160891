use async_trait::async_trait;
use serde_json::json;

use navigator_core::domain::agent::{AgentId, AgentResponse, Handoff};
use navigator_core::domain::session::SlotKey;
use navigator_core::domain::tool::{ToolName, ToolStatus};

use super::{intent_slots, wrap_up_or_redirect, AgentContext, AgentFailure, AgentHandler};

#[derive(Clone, Debug, Default)]
pub struct ReminderAgent;

impl ReminderAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentHandler for ReminderAgent {
    fn id(&self) -> AgentId {
        AgentId::Reminder
    }

    async fn handle(&self, context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        if let Some(response) = wrap_up_or_redirect(self.id(), context) {
            return Ok(response);
        }
        let intent = context.intent;
        let response = AgentResponse::reply(String::new()).with_slots(intent_slots(intent));

        if let Some(status) = context.slot(SlotKey::ReminderStatus) {
            if intent.preferred_time.is_none() {
                let draft = if status == "unconfirmed" {
                    "Your earlier reminder request is still unconfirmed, so I won't set it again."
                } else {
                    "Your reminder is already set."
                };
                return Ok(AgentResponse { draft: draft.to_string(), ..response }
                    .with_handoff(Handoff::Complete));
            }
        }

        let appointment_id = context.slot(SlotKey::AppointmentId);
        let time = intent
            .preferred_time
            .clone()
            .or_else(|| context.slot(SlotKey::PreferredTime).map(str::to_string))
            .or_else(|| context.slot(SlotKey::AppointmentTime).map(str::to_string));
        let Some(time) = time else {
            return Ok(AgentResponse {
                draft: "When would you like me to remind you? For example \"Monday morning\" \
                        or \"tomorrow at 9am\"."
                    .to_string(),
                ..response
            });
        };

        let result = context
            .tools
            .call(
                ToolName::CreateReminder,
                json!({
                    "time": time,
                    "appointment_id": appointment_id,
                    "facility_name": context.slot(SlotKey::SelectedFacilityName),
                }),
            )
            .await;
        if matches!(result.status, ToolStatus::Failed { retryable: true, .. }) {
            return Err(AgentFailure::tool(result));
        }

        let response = match &result.status {
            ToolStatus::Succeeded { .. } => AgentResponse {
                draft: format!("Done. I've set a reminder for {time}."),
                ..response
            }
            .with_slot(SlotKey::ReminderStatus, "scheduled")
            .with_handoff(Handoff::Complete)
            .completed(),
            ToolStatus::Indeterminate { .. } => AgentResponse {
                draft: format!(
                    "I tried to set a reminder for {time}, but I couldn't confirm it was saved, \
                     so it's unconfirmed. Please don't set it again yet."
                ),
                ..response
            }
            .with_slot(SlotKey::ReminderStatus, "unconfirmed"),
            ToolStatus::Failed { .. } => AgentResponse {
                draft: format!(
                    "I couldn't set a reminder for {time}. Could you give me a different time?"
                ),
                ..response
            },
        };
        Ok(response.with_slot(SlotKey::PreferredTime, "").with_tool_result(result))
    }
}
