use async_trait::async_trait;
use serde_json::{json, Map, Value};

use navigator_core::domain::agent::{AgentId, AgentResponse, Handoff};
use navigator_core::domain::session::SlotKey;
use navigator_core::domain::tool::ToolName;

use super::{wrap_up_or_redirect, AgentContext, AgentFailure, AgentHandler};

/// Intake questions, asked one per turn in this order.
pub static QUESTIONS: [(SlotKey, &str, &str); 4] = [
    (
        SlotKey::IntakeAgeRange,
        "age_range",
        "Let's start your intake form. What is the age range of the person seeking care \
         (under 18, 18-25, 26-40, 41-64, or 65+)?",
    ),
    (
        SlotKey::IntakeConcern,
        "primary_concern",
        "What is the main concern you'd like help with, for example alcohol, opioids, other \
         substances, or mental health?",
    ),
    (
        SlotKey::IntakePriorTreatment,
        "prior_treatment",
        "Have you had treatment before? If so, what kind?",
    ),
    (
        SlotKey::IntakeUrgency,
        "urgency",
        "How soon do you need to start care: right away, within a few weeks, or flexible?",
    ),
];

#[derive(Clone, Debug, Default)]
pub struct IntakeFormAgent;

impl IntakeFormAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentHandler for IntakeFormAgent {
    fn id(&self) -> AgentId {
        AgentId::IntakeForm
    }

    async fn handle(&self, context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        if context.intent.wraps_up {
            return Ok(AgentResponse::reply(
                "No problem. Your answers so far are saved and we can finish the form later.",
            )
            .with_handoff(Handoff::Complete));
        }
        if let Some(response) = wrap_up_or_redirect(self.id(), context) {
            return Ok(response);
        }

        let mut response = AgentResponse::reply(String::new());
        let answered = |key: SlotKey, response: &AgentResponse| {
            response.slot_updates.contains_key(&key) || context.slot(key).is_some()
        };

        if context.spoke_last(self.id()) {
            let pending = QUESTIONS.iter().find(|(key, _, _)| !answered(*key, &response));
            if let Some((key, _, _)) = pending {
                let answer = context.input.trim();
                if !answer.is_empty() {
                    response = response.with_slot(*key, answer);
                }
            }
        }

        if let Some((_, _, question)) =
            QUESTIONS.iter().find(|(key, _, _)| !answered(*key, &response))
        {
            return Ok(AgentResponse { draft: (*question).to_string(), ..response });
        }

        let mut fields = Map::new();
        for &(key, field, _) in QUESTIONS.iter() {
            let value = response
                .slot_updates
                .get(&key)
                .cloned()
                .or_else(|| context.slot(key).map(str::to_string))
                .unwrap_or_default();
            fields.insert(field.to_string(), Value::String(value));
        }

        let result = context
            .tools
            .call(ToolName::DocumentAnalysis, json!({ "form": "intake", "fields": fields }))
            .await;
        let Some(summary) = result
            .payload()
            .and_then(|payload| payload.get("summary"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Err(AgentFailure::tool(result));
        };

        Ok(AgentResponse {
            draft: format!(
                "Thank you, your intake form is complete. Here's the summary I'll share with \
                 the facility: {summary}. Would you like help finding a facility or booking an \
                 appointment?"
            ),
            ..response
        }
        .with_slot(SlotKey::IntakeSummary, summary)
        .with_tool_result(result)
        .with_handoff(Handoff::Complete)
        .completed())
    }
}
