//! Deterministic in-process collaborators used when no collaborator base URL
//! is configured. They back the CLI, local server runs and pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use navigator_core::domain::tool::{FacilityRecord, ToolInvocation, ToolName};

use super::{Tool, ToolCallError, ToolRegistry};

const ACCEPTED_PAYERS: [&str; 5] = ["aetna", "bcbs", "cigna", "medicaid", "unitedhealthcare"];
const DECLINED_PAYERS: [&str; 3] = ["anthem", "humana", "medicare"];

struct DirectoryEntry {
    id: &'static str,
    name: &'static str,
    street: &'static str,
    city: &'static str,
    state: &'static str,
    zip: &'static str,
    phone: &'static str,
    services: &'static [&'static str],
}

impl DirectoryEntry {
    fn record(&self) -> FacilityRecord {
        FacilityRecord {
            id: self.id.to_string(),
            name: self.name.to_string(),
            address: format!("{}, {}, {} {}", self.street, self.city, self.state, self.zip),
            phone: self.phone.to_string(),
            services: self.services.iter().map(|service| service.to_string()).collect(),
        }
    }

    fn is_near(&self, address: &str) -> bool {
        let address = address.trim();
        if address.len() >= 5 && address.chars().all(|c| c.is_ascii_digit() || c == '-') {
            return self.zip.get(..3) == address.get(..3);
        }

        let mut parts = address.split(',').map(str::trim);
        let city = parts.next().unwrap_or_default();
        let state = parts.next().unwrap_or_default();
        self.city.eq_ignore_ascii_case(city)
            && (state.is_empty() || self.state.eq_ignore_ascii_case(state))
    }

    fn offers_all(&self, filters: &[String]) -> bool {
        filters.iter().all(|filter| self.services.contains(&filter.as_str()))
    }
}

static DIRECTORY: [DirectoryEntry; 7] = [
    DirectoryEntry {
        id: "fac-atl-001",
        name: "Peachtree Recovery Center",
        street: "1200 Peachtree St NE",
        city: "Atlanta",
        state: "GA",
        zip: "30309",
        phone: "(404) 555-0142",
        services: &["detox", "residential", "mat"],
    },
    DirectoryEntry {
        id: "fac-atl-002",
        name: "Midtown Outpatient Services",
        street: "845 Spring St NW",
        city: "Atlanta",
        state: "GA",
        zip: "30308",
        phone: "(404) 555-0178",
        services: &["outpatient", "mental_health", "mat"],
    },
    DirectoryEntry {
        id: "fac-atl-003",
        name: "Grant Park Detox & Stabilization",
        street: "520 Boulevard SE",
        city: "Atlanta",
        state: "GA",
        zip: "30312",
        phone: "(404) 555-0191",
        services: &["detox", "outpatient"],
    },
    DirectoryEntry {
        id: "fac-dec-001",
        name: "Decatur Family Counseling",
        street: "315 W Ponce de Leon Ave",
        city: "Decatur",
        state: "GA",
        zip: "30030",
        phone: "(404) 555-0123",
        services: &["outpatient", "mental_health", "adolescent"],
    },
    DirectoryEntry {
        id: "fac-aus-001",
        name: "Hill Country Recovery",
        street: "2100 S Lamar Blvd",
        city: "Austin",
        state: "TX",
        zip: "78704",
        phone: "(512) 555-0110",
        services: &["detox", "residential"],
    },
    DirectoryEntry {
        id: "fac-aus-002",
        name: "Eastside Outpatient Austin",
        street: "1801 E 6th St",
        city: "Austin",
        state: "TX",
        zip: "78702",
        phone: "(512) 555-0135",
        services: &["outpatient", "mat"],
    },
    DirectoryEntry {
        id: "fac-den-001",
        name: "Front Range Treatment Center",
        street: "1400 Colfax Ave",
        city: "Denver",
        state: "CO",
        zip: "80218",
        phone: "(303) 555-0188",
        services: &["detox", "outpatient", "mental_health"],
    },
];

fn string_arg<'a>(invocation: &'a ToolInvocation, key: &str) -> Option<&'a str> {
    invocation.arguments.get(key).and_then(Value::as_str).map(str::trim).filter(|v| !v.is_empty())
}

fn required_arg<'a>(invocation: &'a ToolInvocation, key: &str) -> Result<&'a str, ToolCallError> {
    string_arg(invocation, key)
        .ok_or_else(|| ToolCallError::Rejected(format!("missing required argument `{key}`")))
}

/// Results of non-idempotent operations keyed by idempotency key, so a
/// retried request returns the original outcome instead of acting twice.
#[derive(Default)]
struct OperationLedger {
    completed: Mutex<HashMap<String, Value>>,
    sequence: AtomicU32,
}

impl OperationLedger {
    async fn apply<F>(&self, invocation: &ToolInvocation, perform: F) -> Value
    where
        F: FnOnce(u32) -> Value,
    {
        let key = invocation.idempotency_key.as_ref().map(|key| key.0.clone());
        let mut completed = self.completed.lock().await;
        if let Some(previous) = key.as_ref().and_then(|key| completed.get(key)) {
            return previous.clone();
        }
        let outcome = perform(self.sequence.fetch_add(1, Ordering::SeqCst) + 1001);
        if let Some(key) = key {
            completed.insert(key, outcome.clone());
        }
        outcome
    }

    fn performed(&self) -> u32 {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct DemoFacilitySearch;

#[async_trait]
impl Tool for DemoFacilitySearch {
    fn name(&self) -> ToolName {
        ToolName::FacilitySearch
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError> {
        let address = required_arg(invocation, "address")?;
        let filters = invocation
            .arguments
            .get("service_filters")
            .and_then(Value::as_array)
            .map(|values| {
                values.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let facilities = DIRECTORY
            .iter()
            .filter(|entry| entry.is_near(address) && entry.offers_all(&filters))
            .map(DirectoryEntry::record)
            .collect::<Vec<_>>();
        Ok(json!({ "facilities": facilities }))
    }
}

#[derive(Default)]
pub struct DemoInsuranceVerification;

#[async_trait]
impl Tool for DemoInsuranceVerification {
    fn name(&self) -> ToolName {
        ToolName::InsuranceVerification
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError> {
        let payer = required_arg(invocation, "payer")?.to_ascii_lowercase();
        let facility_id = string_arg(invocation, "facility_id");
        let accepted = if ACCEPTED_PAYERS.contains(&payer.as_str()) {
            Value::Bool(true)
        } else if DECLINED_PAYERS.contains(&payer.as_str()) {
            Value::Bool(false)
        } else {
            Value::Null
        };
        Ok(json!({ "payer": payer, "facility_id": facility_id, "accepted": accepted }))
    }
}

#[derive(Default)]
pub struct DemoScheduler {
    ledger: OperationLedger,
}

impl DemoScheduler {
    pub fn bookings_made(&self) -> u32 {
        self.ledger.performed()
    }
}

#[async_trait]
impl Tool for DemoScheduler {
    fn name(&self) -> ToolName {
        ToolName::ScheduleAppointment
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError> {
        let facility_id = required_arg(invocation, "facility_id")?.to_string();
        let preferred_time = required_arg(invocation, "preferred_time")?.to_string();
        Ok(self
            .ledger
            .apply(invocation, |sequence| {
                json!({
                    "appointment_id": format!("appt-{sequence}"),
                    "status": "confirmed",
                    "facility_id": facility_id,
                    "time": preferred_time,
                })
            })
            .await)
    }
}

#[derive(Default)]
pub struct DemoReminders {
    ledger: OperationLedger,
}

#[async_trait]
impl Tool for DemoReminders {
    fn name(&self) -> ToolName {
        ToolName::CreateReminder
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError> {
        let time = required_arg(invocation, "time")?.to_string();
        let appointment_id = string_arg(invocation, "appointment_id").map(str::to_string);
        Ok(self
            .ledger
            .apply(invocation, |sequence| {
                json!({
                    "reminder_id": format!("rem-{sequence}"),
                    "status": "scheduled",
                    "time": time,
                    "appointment_id": appointment_id,
                })
            })
            .await)
    }
}

#[derive(Default)]
pub struct DemoMessaging {
    ledger: OperationLedger,
}

#[async_trait]
impl Tool for DemoMessaging {
    fn name(&self) -> ToolName {
        ToolName::SendMessage
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError> {
        let facility_id = required_arg(invocation, "facility_id")?.to_string();
        required_arg(invocation, "body")?;
        Ok(self
            .ledger
            .apply(invocation, |sequence| {
                json!({
                    "message_id": format!("msg-{sequence}"),
                    "status": "delivered",
                    "facility_id": facility_id,
                })
            })
            .await)
    }
}

#[derive(Default)]
pub struct DemoDocumentAnalysis;

#[async_trait]
impl Tool for DemoDocumentAnalysis {
    fn name(&self) -> ToolName {
        ToolName::DocumentAnalysis
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError> {
        let form = required_arg(invocation, "form")?;
        let fields = invocation
            .arguments
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| ToolCallError::Rejected("missing required argument `fields`".into()))?;

        let missing = fields
            .iter()
            .filter(|(_, value)| value.as_str().map_or(true, |text| text.trim().is_empty()))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        let summary = fields
            .iter()
            .filter_map(|(key, value)| {
                value.as_str().map(|text| format!("{}: {}", key.replace('_', " "), text))
            })
            .collect::<Vec<_>>()
            .join("; ");
        let status = if missing.is_empty() { "complete" } else { "incomplete" };

        Ok(json!({
            "form": form,
            "status": status,
            "missing": missing,
            "summary": summary,
        }))
    }
}

pub fn demo_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(DemoFacilitySearch);
    registry.register(DemoInsuranceVerification);
    registry.register(DemoScheduler::default());
    registry.register(DemoReminders::default());
    registry.register(DemoMessaging::default());
    registry.register(DemoDocumentAnalysis);
    registry
}
