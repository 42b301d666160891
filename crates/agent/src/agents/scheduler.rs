use async_trait::async_trait;
use serde_json::{json, Value};

use navigator_core::domain::agent::{AgentId, AgentResponse, Handoff};
use navigator_core::domain::session::SlotKey;
use navigator_core::domain::tool::{ToolName, ToolStatus};

use super::{intent_slots, wrap_up_or_redirect, AgentContext, AgentFailure, AgentHandler};

/// Books an appointment at the selected facility.
///
/// Booking is not idempotent. When the collaborator's answer is lost the
/// appointment is reported as unconfirmed and the user is asked not to book
/// again, never as booked.
#[derive(Clone, Debug, Default)]
pub struct SchedulerAgent;

impl SchedulerAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentHandler for SchedulerAgent {
    fn id(&self) -> AgentId {
        AgentId::Scheduler
    }

    async fn handle(&self, context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        if let Some(response) = wrap_up_or_redirect(self.id(), context) {
            return Ok(response);
        }
        let intent = context.intent;
        let mut response = AgentResponse::reply(String::new()).with_slots(intent_slots(intent));

        let mut facility_id = context.slot(SlotKey::SelectedFacilityId).map(str::to_string);
        let mut facility_name = context.selected_facility_name();
        let mut facility_phone = context.slot(SlotKey::SelectedFacilityPhone).map(str::to_string);
        if let Some(choice) = intent.facility_choice {
            if let Some(picked) = context.last_search_results().get(choice) {
                facility_id = Some(picked.id.clone());
                facility_name = picked.name.clone();
                facility_phone = Some(picked.phone.clone());
                response = response
                    .with_slot(SlotKey::SelectedFacilityId, picked.id.clone())
                    .with_slot(SlotKey::SelectedFacilityName, picked.name.clone())
                    .with_slot(SlotKey::SelectedFacilityPhone, picked.phone.clone());
            }
        }

        let Some(facility_id) = facility_id else {
            return Ok(AgentResponse {
                draft: "Before booking, let's pick a facility.".to_string(),
                ..response.with_handoff(Handoff::To(AgentId::FacilitySearch))
            });
        };
        let call_ahead = facility_phone
            .as_deref()
            .map(|phone| format!(" You can call them at {phone} to check."))
            .unwrap_or_default();

        if let Some(booked) = existing_booking(context, &facility_id) {
            return Ok(follow_up(context, booked, &facility_name, &call_ahead, response));
        }

        let time = intent
            .preferred_time
            .clone()
            .or_else(|| context.slot(SlotKey::PreferredTime).map(str::to_string));
        let Some(time) = time else {
            return Ok(AgentResponse {
                draft: format!("What day and time would work best for you at {facility_name}?"),
                ..response
            });
        };

        let result = context
            .tools
            .call(
                ToolName::ScheduleAppointment,
                json!({ "facility_id": facility_id, "preferred_time": time }),
            )
            .await;
        if matches!(result.status, ToolStatus::Failed { retryable: true, .. }) {
            return Err(AgentFailure::tool(result));
        }

        let response = match &result.status {
            ToolStatus::Succeeded { payload } => {
                let appointment_id =
                    payload.get("appointment_id").and_then(Value::as_str).unwrap_or_default();
                let confirmation = if appointment_id.is_empty() {
                    String::new()
                } else {
                    format!(" Your confirmation number is {appointment_id}.")
                };
                AgentResponse {
                    draft: format!(
                        "You're booked at {facility_name} for {time}.{confirmation} Would you \
                         like a reminder before the appointment?"
                    ),
                    ..response
                }
                .with_slot(SlotKey::AppointmentId, appointment_id)
                .with_slot(SlotKey::AppointmentStatus, CONFIRMED)
                .with_slot(SlotKey::AppointmentTime, time.clone())
                .with_slot(SlotKey::ReminderStatus, "")
                .completed()
            }
            ToolStatus::Indeterminate { .. } => AgentResponse {
                draft: format!(
                    "I sent your booking request to {facility_name} for {time}, but I couldn't \
                     confirm that it went through, so the appointment is unconfirmed. Please \
                     don't book again yet.{call_ahead}"
                ),
                ..response
            }
            .with_slot(SlotKey::AppointmentStatus, UNCONFIRMED)
            .with_slot(SlotKey::AppointmentTime, time.clone()),
            ToolStatus::Failed { .. } => AgentResponse {
                draft: format!(
                    "{facility_name} couldn't take a booking for {time}. Would you like to try \
                     a different day or time?"
                ),
                ..response
            },
        };
        Ok(response.with_slot(SlotKey::PreferredTime, "").with_tool_result(result))
    }
}

const CONFIRMED: &str = "confirmed";
const UNCONFIRMED: &str = "unconfirmed";

struct Booking {
    status: String,
    time: String,
}

/// The booking already made at this facility, unless the user asked for a
/// different time.
fn existing_booking(context: &AgentContext<'_>, facility_id: &str) -> Option<Booking> {
    let status = context.slot(SlotKey::AppointmentStatus)?;
    if status != CONFIRMED && status != UNCONFIRMED {
        return None;
    }
    if context.slot(SlotKey::SelectedFacilityId) != Some(facility_id) {
        return None;
    }
    let time = context.slot(SlotKey::AppointmentTime)?;
    match context.intent.preferred_time.as_deref() {
        Some(asked) if !asked.eq_ignore_ascii_case(time) => None,
        _ => Some(Booking { status: status.to_string(), time: time.to_string() }),
    }
}

/// Answers a follow-up about a booking without calling the collaborator again.
fn follow_up(
    context: &AgentContext<'_>,
    booked: Booking,
    facility_name: &str,
    call_ahead: &str,
    response: AgentResponse,
) -> AgentResponse {
    let Booking { status, time } = booked;
    if status == UNCONFIRMED {
        return AgentResponse {
            draft: format!(
                "Your booking request at {facility_name} for {time} is still unconfirmed, so \
                 I won't send it again.{call_ahead}"
            ),
            ..response
        }
        .with_handoff(Handoff::Complete);
    }
    if context.intent.affirms {
        return AgentResponse {
            draft: "Setting up your reminder.".to_string(),
            ..response.with_handoff(Handoff::To(AgentId::Reminder))
        };
    }
    AgentResponse {
        draft: format!(
            "You're all set at {facility_name} for {time}. Let me know if there's anything \
             else I can help with."
        ),
        ..response
    }
    .with_handoff(Handoff::Complete)
    .completed()
}
