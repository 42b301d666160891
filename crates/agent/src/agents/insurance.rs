use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};

use navigator_core::domain::agent::{AgentId, AgentResponse};
use navigator_core::domain::session::SlotKey;
use navigator_core::domain::tool::{ToolName, ToolResult, ToolStatus};

use super::{intent_slots, wrap_up_or_redirect, AgentContext, AgentFailure, AgentHandler};

const ASK_PAYER: &str = "Which insurance do you have? For example Aetna, Cigna, Medicaid, \
    or Blue Cross Blue Shield.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coverage {
    Accepted,
    Declined,
    Unconfirmed,
}

impl Coverage {
    fn from_result(result: &ToolResult) -> Self {
        match &result.status {
            ToolStatus::Succeeded { payload } => match payload.get("accepted") {
                Some(Value::Bool(true)) => Self::Accepted,
                Some(Value::Bool(false)) => Self::Declined,
                _ => Self::Unconfirmed,
            },
            _ => Self::Unconfirmed,
        }
    }
}

pub fn payer_display_name(payer: &str) -> String {
    match payer {
        "bcbs" => "Blue Cross Blue Shield".to_string(),
        "unitedhealthcare" => "UnitedHealthcare".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

/// Checks each payer the user named against the selected facility, concurrently.
#[derive(Clone, Debug, Default)]
pub struct InsuranceVerificationAgent;

impl InsuranceVerificationAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentHandler for InsuranceVerificationAgent {
    fn id(&self) -> AgentId {
        AgentId::InsuranceVerification
    }

    async fn handle(&self, context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        if let Some(response) = wrap_up_or_redirect(self.id(), context) {
            return Ok(response);
        }

        let intent = context.intent;
        let payers = if intent.payers.is_empty() {
            context.slot_list(SlotKey::InsurancePayers)
        } else {
            intent.payers.clone()
        };
        if payers.is_empty() {
            return Ok(AgentResponse::reply(ASK_PAYER).with_slots(intent_slots(intent)));
        }

        let facility_id = context.slot(SlotKey::SelectedFacilityId);
        let results = join_all(payers.iter().map(|payer| {
            context.tools.call(
                ToolName::InsuranceVerification,
                json!({ "payer": payer, "facility_id": facility_id }),
            )
        }))
        .await;

        let facility = facility_id.map(|_| context.selected_facility_name());
        let mut response = AgentResponse::reply(render_coverage(
            &payers,
            &results,
            facility.as_deref(),
            true,
        ))
        .with_slots(intent_slots(intent))
        .with_slot(SlotKey::InsurancePayers, payers.join(","))
        .completed();
        for result in results {
            response = response.with_tool_result(result);
        }
        Ok(response)
    }

    async fn regenerate(
        &self,
        context: &AgentContext<'_>,
        rejected: &AgentResponse,
    ) -> Result<AgentResponse, AgentFailure> {
        let results = rejected
            .tool_results
            .iter()
            .filter(|result| result.invocation.tool == ToolName::InsuranceVerification)
            .cloned()
            .collect::<Vec<_>>();
        if results.is_empty() {
            return Err(AgentFailure::RegenerationUnsupported(self.id()));
        }
        let payers = results
            .iter()
            .map(|result| {
                result
                    .invocation
                    .arguments
                    .get("payer")
                    .and_then(Value::as_str)
                    .unwrap_or("your plan")
                    .to_string()
            })
            .collect::<Vec<_>>();
        let facility = context.slot(SlotKey::SelectedFacilityId).map(|_| {
            context.selected_facility_name()
        });
        Ok(AgentResponse {
            draft: render_coverage(&payers, &results, facility.as_deref(), false),
            ..rejected.clone()
        })
    }
}

fn render_coverage(
    payers: &[String],
    results: &[ToolResult],
    facility: Option<&str>,
    detailed: bool,
) -> String {
    let header = match facility {
        Some(name) => format!("Here's what I found for {name}:"),
        None => "Here's what I found:".to_string(),
    };
    let mut lines = vec![header];
    let mut any_unconfirmed = false;
    for (payer, result) in payers.iter().zip(results) {
        let coverage = Coverage::from_result(result);
        let status = match coverage {
            Coverage::Accepted => "accepted",
            Coverage::Declined => "not accepted",
            Coverage::Unconfirmed => {
                any_unconfirmed = true;
                "unconfirmed, I couldn't verify this one"
            }
        };
        lines.push(format!("- {}: {status}", payer_display_name(payer)));
    }
    if detailed && any_unconfirmed {
        lines.push(
            "For anything unconfirmed, please call the facility or your insurer to check \
             coverage before your visit."
                .to_string(),
        );
    }
    lines.join("\n")
}
