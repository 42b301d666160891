use async_trait::async_trait;
use tracing::debug;

use navigator_core::domain::agent::{AgentId, AgentResponse, Handoff};

use super::{describe_agent, intent_slots, AgentContext, AgentFailure, AgentHandler};
use crate::llm::classify_need;

pub const HELP_MENU: &str = "I can help you find a treatment facility near you, check whether \
    a facility accepts your insurance, schedule an appointment, fill out an intake form, set a \
    reminder, or send a message to a facility. What would you like to do?";

pub const GREETING_REPLY: &str = "Hi, I'm here to help you find substance use and mental health \
    treatment.";

/// Entry agent. Works out what the user needs and hands off to a specialist.
#[derive(Clone, Debug, Default)]
pub struct TriageAgent;

impl TriageAgent {
    pub fn new() -> Self {
        Self
    }

    fn route(target: AgentId, context: &AgentContext<'_>) -> AgentResponse {
        AgentResponse::reply(format!("I can help with {}.", describe_agent(target)))
            .with_handoff(Handoff::To(target))
            .with_slots(intent_slots(context.intent))
    }
}

#[async_trait]
impl AgentHandler for TriageAgent {
    fn id(&self) -> AgentId {
        AgentId::Triage
    }

    async fn handle(&self, context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        let intent = context.intent;
        if intent.wraps_up {
            return Ok(AgentResponse::reply(
                "Take care. You can come back any time if you need help finding treatment.",
            )
            .with_handoff(Handoff::Complete)
            .completed());
        }

        if let Some(need) = intent.need {
            debug!(event_name = "triage.routed", need = need.as_str(), "keyword routing matched");
            return Ok(Self::route(need.agent(), context));
        }

        if !intent.is_greeting {
            if let Some(llm) = context.llm {
                if let Some(target) =
                    classify_need(llm, context.input, context.settings.llm_timeout).await
                {
                    debug!(event_name = "triage.routed", need = %target, "classifier routing");
                    return Ok(Self::route(target, context));
                }
            }
        }

        let draft = if intent.is_greeting {
            format!("{GREETING_REPLY} {HELP_MENU}")
        } else {
            HELP_MENU.to_string()
        };
        Ok(AgentResponse::reply(draft).with_slots(intent_slots(intent)))
    }
}
