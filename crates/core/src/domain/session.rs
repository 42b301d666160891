use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::turn::Turn;
use crate::errors::DomainError;
use crate::flows::TurnPhase;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("sess-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Facts collected during a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    Location,
    ServiceFilters,
    InsurancePayers,
    Urgency,
    LastSearchResults,
    SelectedFacilityId,
    SelectedFacilityName,
    SelectedFacilityPhone,
    PreferredTime,
    AppointmentId,
    AppointmentTime,
    AppointmentStatus,
    ReminderStatus,
    MessageStatus,
    IntakeAgeRange,
    IntakeConcern,
    IntakePriorTreatment,
    IntakeUrgency,
    IntakeSummary,
}

impl SlotKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::ServiceFilters => "service_filters",
            Self::InsurancePayers => "insurance_payers",
            Self::Urgency => "urgency",
            Self::LastSearchResults => "last_search_results",
            Self::SelectedFacilityId => "selected_facility_id",
            Self::SelectedFacilityName => "selected_facility_name",
            Self::SelectedFacilityPhone => "selected_facility_phone",
            Self::PreferredTime => "preferred_time",
            Self::AppointmentId => "appointment_id",
            Self::AppointmentTime => "appointment_time",
            Self::AppointmentStatus => "appointment_status",
            Self::ReminderStatus => "reminder_status",
            Self::MessageStatus => "message_status",
            Self::IntakeAgeRange => "intake_age_range",
            Self::IntakeConcern => "intake_concern",
            Self::IntakePriorTreatment => "intake_prior_treatment",
            Self::IntakeUrgency => "intake_urgency",
            Self::IntakeSummary => "intake_summary",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Explicit,
    Inactivity,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Inactivity => "inactivity",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub phase: TurnPhase,
    pub current_agent: AgentId,
    pub turns: Vec<Turn>,
    pub slots: BTreeMap<SlotKey, String>,
    pub consecutive_failures: u32,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
}

impl Session {
    /// A fresh session always starts with triage as its entry agent.
    pub fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_activity_at: now,
            phase: TurnPhase::New,
            current_agent: AgentId::Triage,
            turns: Vec::new(),
            slots: BTreeMap::new(),
            consecutive_failures: 0,
            closed_at: None,
            close_reason: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == TurnPhase::Closed
    }

    pub fn slot(&self, key: SlotKey) -> Option<&str> {
        self.slots.get(&key).map(String::as_str)
    }

    pub fn next_turn_number(&self) -> u32 {
        u32::try_from(self.turns.len()).unwrap_or(u32::MAX).saturating_add(1)
    }

    pub fn apply_slots(&mut self, updates: &BTreeMap<SlotKey, String>) {
        for (key, value) in updates {
            if value.trim().is_empty() {
                self.slots.remove(key);
            } else {
                self.slots.insert(*key, value.clone());
            }
        }
    }

    pub fn ensure_open(&self) -> Result<(), DomainError> {
        if self.is_closed() {
            return Err(DomainError::SessionClosed(self.id.clone()));
        }
        Ok(())
    }

    pub fn close(&mut self, reason: CloseReason, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_open()?;
        self.phase = TurnPhase::Closed;
        self.closed_at = Some(now);
        self.close_reason = Some(reason);
        Ok(())
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        !self.is_closed() && self.last_activity_at < cutoff
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};

    use super::{CloseReason, Session, SessionId, SlotKey};
    use crate::domain::agent::AgentId;
    use crate::errors::DomainError;
    use crate::flows::TurnPhase;

    #[test]
    fn new_session_starts_at_triage() {
        let session = Session::new(SessionId("sess-1".to_string()), Utc::now());
        assert_eq!(session.current_agent, AgentId::Triage);
        assert_eq!(session.phase, TurnPhase::New);
        assert_eq!(session.next_turn_number(), 1);
    }

    #[test]
    fn empty_slot_values_clear_the_slot() {
        let mut session = Session::new(SessionId("sess-2".to_string()), Utc::now());
        let mut updates = BTreeMap::new();
        updates.insert(SlotKey::Location, "Atlanta, GA".to_string());
        session.apply_slots(&updates);
        assert_eq!(session.slot(SlotKey::Location), Some("Atlanta, GA"));

        updates.insert(SlotKey::Location, String::new());
        session.apply_slots(&updates);
        assert_eq!(session.slot(SlotKey::Location), None);
    }

    #[test]
    fn closing_twice_is_rejected() {
        let now = Utc::now();
        let mut session = Session::new(SessionId("sess-3".to_string()), now);
        session.close(CloseReason::Explicit, now).expect("first close");

        assert!(session.is_closed());
        assert_eq!(session.close_reason, Some(CloseReason::Explicit));
        assert!(matches!(
            session.close(CloseReason::Inactivity, now),
            Err(DomainError::SessionClosed(_))
        ));
    }

    #[test]
    fn idle_detection_ignores_closed_sessions() {
        let now = Utc::now();
        let mut session = Session::new(SessionId("sess-4".to_string()), now - Duration::hours(2));
        assert!(session.is_idle_since(now - Duration::minutes(30)));

        session.close(CloseReason::Inactivity, now).expect("close");
        assert!(!session.is_idle_since(now - Duration::minutes(30)));
    }
}
