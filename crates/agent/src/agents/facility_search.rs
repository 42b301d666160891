use async_trait::async_trait;
use serde_json::{json, Value};

use navigator_core::domain::agent::{AgentId, AgentResponse, Handoff};
use navigator_core::domain::session::SlotKey;
use navigator_core::domain::tool::{FacilityRecord, ToolName, ToolResult};

use super::{
    display_filters, intent_slots, wrap_up_or_redirect, AgentContext, AgentFailure, AgentHandler,
};
use crate::conversation::{IntentExtractor, ServiceNeed};

pub const MAX_LISTED: usize = 5;

const ASK_LOCATION: &str = "I can search for treatment facilities. What city and state, or ZIP \
    code, should I search near?";

/// Finds facilities near a location and lets the user pick one.
#[derive(Clone, Debug, Default)]
pub struct FacilitySearchAgent {
    extractor: IntentExtractor,
}

impl FacilitySearchAgent {
    pub fn new() -> Self {
        Self { extractor: IntentExtractor::new() }
    }

    fn select(
        &self,
        context: &AgentContext<'_>,
        facility: &FacilityRecord,
    ) -> AgentResponse {
        let intent = context.intent;
        let base = AgentResponse::reply(String::new())
            .with_slots(intent_slots(intent))
            .with_slot(SlotKey::SelectedFacilityId, facility.id.clone())
            .with_slot(SlotKey::SelectedFacilityName, facility.name.clone())
            .with_slot(SlotKey::SelectedFacilityPhone, facility.phone.clone());

        let next = match intent.need {
            Some(ServiceNeed::FindFacility) | None => None,
            Some(need) => Some(need.agent()),
        };
        match next {
            Some(target) => AgentResponse {
                draft: format!("{} it is.", facility.name),
                ..base.with_handoff(Handoff::To(target))
            },
            None => AgentResponse {
                draft: format!(
                    "{} is a good choice. You can reach them at {}. Would you like me to \
                     check your insurance, book an appointment, or send them a message?",
                    facility.name, facility.phone
                ),
                ..base
            },
        }
    }

    fn chosen<'a>(
        &self,
        context: &AgentContext<'_>,
        results: &'a [FacilityRecord],
    ) -> Option<&'a FacilityRecord> {
        if let Some(index) = context.intent.facility_choice {
            return results.get(index);
        }
        let lowered = context.input.to_ascii_lowercase();
        results.iter().find(|facility| lowered.contains(&facility.name.to_ascii_lowercase()))
    }
}

#[async_trait]
impl AgentHandler for FacilitySearchAgent {
    fn id(&self) -> AgentId {
        AgentId::FacilitySearch
    }

    async fn handle(&self, context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        let intent = context.intent;
        let previous = context.last_search_results();
        if intent.location.is_none() {
            if let Some(facility) = self.chosen(context, &previous) {
                return Ok(self.select(context, facility));
            }
        }
        if intent.wraps_up || intent.location.is_none() {
            if let Some(response) = wrap_up_or_redirect(self.id(), context) {
                return Ok(response);
            }
        }

        let location = intent
            .location
            .clone()
            .or_else(|| self.extractor.parse_bare_location(context.input))
            .or_else(|| context.slot(SlotKey::Location).map(str::to_string));
        let Some(location) = location else {
            return Ok(AgentResponse::reply(ASK_LOCATION).with_slots(intent_slots(intent)));
        };

        let filters = if intent.service_filters.is_empty() {
            context.slot_list(SlotKey::ServiceFilters)
        } else {
            intent.service_filters.clone()
        };

        let result = context
            .tools
            .call(
                ToolName::FacilitySearch,
                json!({
                    "address": location,
                    "distance": context.settings.search_distance_miles,
                    "service_filters": filters,
                }),
            )
            .await;
        let Some(facilities) = result.payload().map(parse_facilities) else {
            return Err(AgentFailure::tool(result));
        };

        let response = AgentResponse::reply(render_results(&location, &filters, &facilities, true))
            .with_slots(intent_slots(intent))
            .with_slot(SlotKey::Location, location.clone())
            .with_slot(SlotKey::ServiceFilters, filters.join(","))
            .with_slot(SlotKey::LastSearchResults, results_slot(&facilities))
            .with_slot(SlotKey::SelectedFacilityId, "")
            .with_slot(SlotKey::SelectedFacilityName, "")
            .with_slot(SlotKey::SelectedFacilityPhone, "")
            .with_tool_result(result);
        Ok(if facilities.is_empty() { response } else { response.completed() })
    }

    async fn regenerate(
        &self,
        context: &AgentContext<'_>,
        rejected: &AgentResponse,
    ) -> Result<AgentResponse, AgentFailure> {
        let Some(payload) = last_search_payload(&rejected.tool_results) else {
            return Err(AgentFailure::RegenerationUnsupported(self.id()));
        };
        let facilities = parse_facilities(payload);
        let location = rejected
            .slot_updates
            .get(&SlotKey::Location)
            .cloned()
            .or_else(|| context.slot(SlotKey::Location).map(str::to_string))
            .unwrap_or_else(|| "your area".to_string());
        Ok(AgentResponse {
            draft: render_results(&location, &[], &facilities, false),
            ..rejected.clone()
        })
    }
}

fn last_search_payload(results: &[ToolResult]) -> Option<&Value> {
    results
        .iter()
        .rev()
        .find(|result| result.invocation.tool == ToolName::FacilitySearch)
        .and_then(ToolResult::payload)
}

pub fn parse_facilities(payload: &Value) -> Vec<FacilityRecord> {
    payload
        .get("facilities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .take(MAX_LISTED)
                .collect()
        })
        .unwrap_or_default()
}

fn results_slot(facilities: &[FacilityRecord]) -> String {
    if facilities.is_empty() {
        return String::new();
    }
    serde_json::to_string(facilities).unwrap_or_default()
}

/// `detailed` adds services and addresses; the plain form lists names and phones only.
fn render_results(
    location: &str,
    filters: &[String],
    facilities: &[FacilityRecord],
    detailed: bool,
) -> String {
    if facilities.is_empty() {
        let services = if filters.is_empty() {
            String::new()
        } else {
            format!(" offering {}", display_filters(filters))
        };
        return format!(
            "I couldn't find any facilities{services} near {location}. You could try a nearby \
             city or fewer service types."
        );
    }

    let mut lines = vec![format!("I found {} facilities near {location}:", facilities.len())];
    for (index, facility) in facilities.iter().enumerate() {
        let line = if detailed && !facility.services.is_empty() {
            format!(
                "{}. {} ({}) - {} - {}",
                index + 1,
                facility.name,
                display_filters(&facility.services),
                facility.address,
                facility.phone
            )
        } else {
            format!("{}. {} - {}", index + 1, facility.name, facility.phone)
        };
        lines.push(line);
    }
    lines.push(
        "Tell me which one you'd like, for example \"the first one\", and I can check your \
         insurance or book an appointment."
            .to_string(),
    );
    lines.join("\n")
}
