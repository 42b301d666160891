use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use navigator_agent::runtime::{AGENT_FAILURE_REPLY, CIRCUIT_RESET_REPLY};
use navigator_agent::safety::SAFE_FALLBACK_REPLY;
use navigator_agent::tools::{demo_registry, RetryPolicy};
use navigator_agent::{
    AgentContext, AgentFailure, AgentHandler, AgentRegistry, Orchestrator, OrchestratorSettings,
    SafetyGate, Tool, ToolCallError, ToolGateway, ToolRegistry, TurnRequest,
};
use navigator_core::audit::InMemoryAuditSink;
use navigator_core::{
    AgentId, AgentResponse, ApplicationError, CloseReason, CrisisResources, DomainError, Handoff,
    InMemoryConversationArchive, OperationKey, Session, SessionId, SlotKey, ToolInvocation,
    ToolName, ToolStatus, TurnDisposition, TurnPhase,
};

fn fast_policy() -> RetryPolicy {
    RetryPolicy { initial_backoff_ms: 1, max_backoff_ms: 5, backoff_multiplier: 2.0 }
}

fn gateway(registry: ToolRegistry) -> ToolGateway {
    ToolGateway::new(registry, fast_policy(), Duration::from_millis(500), 2)
}

struct Harness {
    orchestrator: Orchestrator,
    audit: InMemoryAuditSink,
    archive: InMemoryConversationArchive,
}

fn harness_with(agents: AgentRegistry, tools: ToolGateway) -> Harness {
    let audit = InMemoryAuditSink::default();
    let archive = InMemoryConversationArchive::new();
    let orchestrator =
        Orchestrator::new(agents, tools, SafetyGate::default(), OrchestratorSettings::default())
            .with_audit_sink(Arc::new(audit.clone()))
            .with_archive(Arc::new(archive.clone()));
    Harness { orchestrator, audit, archive }
}

fn harness() -> Harness {
    harness_with(AgentRegistry::with_builtin(), gateway(demo_registry()))
}

/// Puts an open session straight into the store with `agent` already active.
async fn seeded(orchestrator: &Orchestrator, agent: AgentId) -> SessionId {
    let mut session = Session::new(SessionId::generate(), Utc::now());
    session.phase = TurnPhase::AwaitingInput;
    session.current_agent = agent;
    let id = session.id.clone();
    orchestrator.store().insert(session).await;
    id
}

struct EchoAgent {
    id: AgentId,
    delay: Duration,
    seen: Arc<Mutex<Vec<String>>>,
}

impl EchoAgent {
    fn new(id: AgentId, delay: Duration) -> (Self, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Self { id, delay, seen: Arc::clone(&seen) }, seen)
    }
}

#[async_trait]
impl AgentHandler for EchoAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    async fn handle(&self, context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(context.input.to_string());
        }
        tokio::time::sleep(self.delay).await;
        Ok(AgentResponse::reply(format!("Noted: {}", context.input)))
    }
}

struct BrokenAgent(AgentId);

#[async_trait]
impl AgentHandler for BrokenAgent {
    fn id(&self) -> AgentId {
        self.0
    }

    async fn handle(&self, _context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        Err(AgentFailure::EmptyDraft)
    }
}

struct BouncingAgent {
    id: AgentId,
    target: AgentId,
}

#[async_trait]
impl AgentHandler for BouncingAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    async fn handle(&self, _context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        Ok(AgentResponse::reply(format!("Passing you to {}.", self.target))
            .with_handoff(Handoff::To(self.target)))
    }
}

/// Drafts a diagnosis first; `safe_rewrite` decides what regeneration offers.
struct DiagnosingAgent {
    safe_rewrite: bool,
}

#[async_trait]
impl AgentHandler for DiagnosingAgent {
    fn id(&self) -> AgentId {
        AgentId::FacilitySearch
    }

    async fn handle(&self, _context: &AgentContext<'_>) -> Result<AgentResponse, AgentFailure> {
        Ok(AgentResponse::reply(
            "You likely have alcohol use disorder, so Peachtree Recovery Center is a fit."
                .to_string(),
        )
        .with_slot(SlotKey::Location, "Atlanta, GA")
        .with_handoff(Handoff::Complete))
    }

    async fn regenerate(
        &self,
        _context: &AgentContext<'_>,
        rejected: &AgentResponse,
    ) -> Result<AgentResponse, AgentFailure> {
        let draft = if self.safe_rewrite {
            "Peachtree Recovery Center in Atlanta offers detox and residential care."
        } else {
            "You probably have an alcohol use disorder."
        };
        Ok(AgentResponse { draft: draft.to_string(), ..rejected.clone() })
    }
}

struct SlowScheduler {
    keys: Arc<Mutex<Vec<Option<OperationKey>>>>,
}

#[async_trait]
impl Tool for SlowScheduler {
    fn name(&self) -> ToolName {
        ToolName::ScheduleAppointment
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError> {
        if let Ok(mut keys) = self.keys.lock() {
            keys.push(invocation.idempotency_key.clone());
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!({ "appointment_id": "appt-late", "status": "confirmed" }))
    }
}

#[tokio::test]
async fn detox_request_in_atlanta_lists_matching_facilities() {
    let harness = harness();
    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(None, "I want to find a detox center near Atlanta, GA"))
        .await
        .expect("turn handled");

    assert_eq!(reply.disposition, TurnDisposition::Responded);
    assert_eq!(reply.turn_number, 1);
    assert_eq!(reply.agent, AgentId::FacilitySearch);
    assert!(!reply.closed);
    assert!(reply.reply.contains("Peachtree Recovery Center"));
    assert!(reply.reply.contains("Grant Park Detox & Stabilization"));

    let session = harness.orchestrator.session_snapshot(&reply.session_id).await.expect("session");
    let turn = &session.turns[0];
    assert_eq!(turn.handled_by, vec![AgentId::Triage, AgentId::FacilitySearch]);
    assert_eq!(turn.tool_results.len(), 1);
    let arguments = &turn.tool_results[0].invocation.arguments;
    assert_eq!(arguments["address"], "Atlanta, GA");
    assert_eq!(arguments["service_filters"], json!(["detox"]));
    assert_eq!(session.phase, TurnPhase::AwaitingInput);
    assert_eq!(
        turn.phase_trace,
        vec![
            TurnPhase::AwaitingInput,
            TurnPhase::ValidatingPre,
            TurnPhase::Dispatching,
            TurnPhase::ValidatingPost,
            TurnPhase::Responding,
            TurnPhase::AwaitingInput,
        ]
    );

    let archived = harness.archive.turns(&reply.session_id).await;
    assert_eq!(archived.len(), 1);
    assert!(harness.archive.session(&reply.session_id).await.is_some());
}

#[tokio::test]
async fn crisis_language_escalates_without_dispatch() {
    let harness = harness();
    let id = seeded(&harness.orchestrator, AgentId::FacilitySearch).await;

    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(id.clone()), "I want to kill myself"))
        .await
        .expect("turn handled");

    assert_eq!(reply.reply, CrisisResources::default().payload());
    assert_eq!(reply.disposition, TurnDisposition::Escalated);
    assert_eq!(reply.agent, AgentId::FacilitySearch);

    let session = harness.orchestrator.session_snapshot(&id).await.expect("session");
    let turn = &session.turns[0];
    assert_eq!(session.phase, TurnPhase::AwaitingInput);
    assert!(turn.handled_by.is_empty());
    assert!(turn.tool_results.is_empty());
    assert_eq!(turn.pre_verdicts.len(), 1);
    assert!(harness.audit.events_of_type("tool.result").is_empty());
    assert!(turn.phase_trace.contains(&TurnPhase::Intercepted));
}

#[tokio::test]
async fn over_long_crisis_messages_still_escalate() {
    let harness = harness();
    let id = seeded(&harness.orchestrator, AgentId::FacilitySearch).await;
    let text = format!("{}I want to kill myself", "I keep thinking about it. ".repeat(170));
    assert!(text.chars().count() > OrchestratorSettings::default().max_input_chars);

    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(id.clone()), text))
        .await
        .expect("crisis turn handled");

    assert_eq!(reply.disposition, TurnDisposition::Escalated);
    assert_eq!(reply.reply, CrisisResources::default().payload());

    let ordinary = "I keep thinking about detox. ".repeat(170);
    let rejected = harness.orchestrator.handle_turn(TurnRequest::new(Some(id), ordinary)).await;
    assert!(matches!(rejected, Err(ApplicationError::InvalidInput(_))));
}

#[tokio::test]
async fn abandoned_turns_leave_the_session_untouched() {
    let (echo, seen) = EchoAgent::new(AgentId::Triage, Duration::from_millis(300));
    let mut agents = AgentRegistry::with_builtin();
    agents.register(echo);
    let harness = harness_with(agents, gateway(demo_registry()));
    let id = seeded(&harness.orchestrator, AgentId::Triage).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(30),
        harness
            .orchestrator
            .handle_turn(TurnRequest::new(Some(id.clone()), "question about treatment")),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(seen.lock().expect("seen").len(), 1);

    let session = harness.orchestrator.session_snapshot(&id).await.expect("session");
    assert!(session.turns.is_empty());
    assert_eq!(session.phase, TurnPhase::AwaitingInput);
    assert!(harness.archive.turns(&id).await.is_empty());

    let next = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(id.clone()), "another question about treatment"))
        .await
        .expect("next turn");
    assert_eq!(next.turn_number, 1);
}

#[tokio::test]
async fn a_close_during_a_turn_is_archived_last() {
    let (echo, _) = EchoAgent::new(AgentId::Triage, Duration::from_millis(80));
    let mut agents = AgentRegistry::with_builtin();
    agents.register(echo);
    let harness = harness_with(agents, gateway(demo_registry()));
    let id = seeded(&harness.orchestrator, AgentId::Triage).await;

    let (turn, closed) = tokio::join!(
        harness
            .orchestrator
            .handle_turn(TurnRequest::new(Some(id.clone()), "question about treatment")),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            harness.orchestrator.close_session(&id, "req-close").await
        },
    );
    assert_eq!(turn.expect("turn").turn_number, 1);
    assert!(closed.expect("closed").is_closed());

    let archived = harness.archive.session(&id).await.expect("archived");
    assert_eq!(archived.phase, TurnPhase::Closed);
    assert_eq!(archived.close_reason, Some(CloseReason::Explicit));
    assert_eq!(harness.archive.turns(&id).await.len(), 1);
}

#[tokio::test]
async fn resumed_sessions_continue_from_redacted_history() {
    let before = harness();
    let first = before
        .orchestrator
        .handle_turn(TurnRequest::new(None, "My name is Jane Doe, I need outpatient care"))
        .await
        .expect("first turn");
    let mut archived = before.archive.session(&first.session_id).await.expect("archived");
    archived.turns = before.archive.turns(&first.session_id).await;
    assert!(archived.turns.iter().all(|turn| !turn.has_private_original()));

    let after = harness();
    let id = after.orchestrator.resume_session(archived, "req-resume").await;
    let second = after
        .orchestrator
        .handle_turn(TurnRequest::new(Some(id.clone()), "Somewhere near Atlanta, GA"))
        .await
        .expect("resumed turn");

    assert_eq!(second.turn_number, 2);
    let resumed = after.audit.events_of_type("session.resumed");
    assert_eq!(resumed.len(), 1);
    assert_eq!(
        resumed[0].metadata.get("prior_identifiers").map(String::as_str),
        Some("not_restored")
    );
    let session = after.orchestrator.session_snapshot(&id).await.expect("session");
    assert!(!serde_json::to_string(&session).expect("serialize").contains("Jane Doe"));
}

#[tokio::test]
async fn agents_only_ever_see_redacted_text() {
    let (echo, seen) = EchoAgent::new(AgentId::Triage, Duration::ZERO);
    let mut agents = AgentRegistry::with_builtin();
    agents.register(echo);
    let harness = harness_with(agents, gateway(demo_registry()));

    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(
            None,
            "My name is Jane Doe, phone 555-111-2222, I need outpatient care",
        ))
        .await
        .expect("turn handled");

    let redacted = "My name is [REDACTED], phone [REDACTED], I need outpatient care";
    assert_eq!(seen.lock().expect("seen").as_slice(), [redacted.to_string()]);

    let session = harness.orchestrator.session_snapshot(&reply.session_id).await.expect("session");
    let turn = &session.turns[0];
    assert_eq!(turn.user_text, redacted);
    assert!(turn.private_original.is_some());

    let serialized = serde_json::to_string(&session).expect("serialize session");
    assert!(!serialized.contains("Jane Doe"));
    assert!(!serialized.contains("555-111-2222"));
    let audit = serde_json::to_string(&harness.audit.events()).expect("serialize audit");
    assert!(!audit.contains("Jane Doe"));
}

#[tokio::test]
async fn personal_details_never_reach_tool_arguments() {
    let harness = harness();
    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(
            None,
            "My name is Jane Doe, reach me at jane.doe@example.com. I want a detox center \
             near Atlanta, GA",
        ))
        .await
        .expect("turn handled");

    let session = harness.orchestrator.session_snapshot(&reply.session_id).await.expect("session");
    let turn = &session.turns[0];
    assert!(!turn.tool_results.is_empty());
    for result in &turn.tool_results {
        let arguments = result.invocation.arguments.to_string();
        assert!(!arguments.contains("Jane"), "{arguments}");
        assert!(!arguments.contains("example.com"), "{arguments}");
    }
}

#[tokio::test]
async fn lost_booking_confirmation_is_reported_as_unconfirmed() {
    let keys = Arc::new(Mutex::new(Vec::new()));
    let mut registry = demo_registry();
    registry.register(SlowScheduler { keys: Arc::clone(&keys) });
    let tools = ToolGateway::new(registry, fast_policy(), Duration::from_millis(40), 3);
    let harness = harness_with(AgentRegistry::with_builtin(), tools);

    let first = harness
        .orchestrator
        .handle_turn(TurnRequest::new(None, "detox near Atlanta, GA"))
        .await
        .expect("search turn");
    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(
            Some(first.session_id.clone()),
            "Book the first one for Tuesday at 3pm",
        ))
        .await
        .expect("booking turn");

    assert_eq!(reply.disposition, TurnDisposition::Responded);
    assert!(reply.reply.contains("unconfirmed"), "{}", reply.reply);
    assert!(!reply.reply.contains("You're booked"));

    let session = harness.orchestrator.session_snapshot(&first.session_id).await.expect("session");
    let turn = session.turns.last().expect("booking turn recorded");
    let booking = turn
        .tool_results
        .iter()
        .find(|result| result.invocation.tool == ToolName::ScheduleAppointment)
        .expect("booking attempted");
    assert!(matches!(booking.status, ToolStatus::Indeterminate { .. }));
    assert_eq!(booking.attempts, 2);
    assert_eq!(session.slot(SlotKey::AppointmentStatus), Some("unconfirmed"));

    let keys_after_booking = keys.lock().expect("keys").clone();
    assert_eq!(keys_after_booking.len(), 2);
    assert!(keys_after_booking[0].is_some());
    assert_eq!(keys_after_booking[0], keys_after_booking[1]);

    let follow_up = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(first.session_id.clone()), "ok"))
        .await
        .expect("follow-up turn");
    assert!(follow_up.reply.contains("still unconfirmed"), "{}", follow_up.reply);
    assert_eq!(keys.lock().expect("keys").len(), 2);
}

#[tokio::test]
async fn follow_ups_after_a_booking_never_book_twice() {
    let harness = harness();
    let first = harness
        .orchestrator
        .handle_turn(TurnRequest::new(None, "detox near Atlanta, GA"))
        .await
        .expect("search turn");
    let id = first.session_id;

    let mut replies = Vec::new();
    for text in ["Book the first one for Tuesday at 3pm", "ok", "ok"] {
        let reply = harness
            .orchestrator
            .handle_turn(TurnRequest::new(Some(id.clone()), text))
            .await
            .expect("turn handled");
        replies.push(reply);
    }

    assert!(replies[0].reply.starts_with("You're booked"), "{}", replies[0].reply);
    assert_eq!(replies[1].reply, "Done. I've set a reminder for Tuesday at 3pm.");
    assert_eq!(replies[2].agent, AgentId::Triage);

    let session = harness.orchestrator.session_snapshot(&id).await.expect("session");
    let calls = |tool: ToolName| {
        session
            .turns
            .iter()
            .flat_map(|turn| &turn.tool_results)
            .filter(|result| result.invocation.tool == tool)
            .count()
    };
    assert_eq!(calls(ToolName::ScheduleAppointment), 1);
    assert_eq!(calls(ToolName::CreateReminder), 1);
    assert_eq!(session.slot(SlotKey::PreferredTime), None);
    assert_eq!(session.slot(SlotKey::AppointmentTime), Some("Tuesday at 3pm"));
    assert_eq!(session.slot(SlotKey::ReminderStatus), Some("scheduled"));
}

#[tokio::test]
async fn overlapping_turns_on_one_session_commit_in_arrival_order() {
    let (echo, _) = EchoAgent::new(AgentId::Triage, Duration::from_millis(50));
    let mut agents = AgentRegistry::with_builtin();
    agents.register(echo);
    let harness = harness_with(agents, gateway(demo_registry()));
    let id = seeded(&harness.orchestrator, AgentId::Triage).await;

    let (first, second) = tokio::join!(
        harness
            .orchestrator
            .handle_turn(TurnRequest::new(Some(id.clone()), "first question about treatment")),
        harness
            .orchestrator
            .handle_turn(TurnRequest::new(Some(id.clone()), "second question about treatment")),
    );
    let first = first.expect("first turn");
    let second = second.expect("second turn");

    assert_eq!(first.turn_number, 1);
    assert_eq!(second.turn_number, 2);
    assert_eq!(first.reply, "Noted: first question about treatment");

    let session = harness.orchestrator.session_snapshot(&id).await.expect("session");
    let texts: Vec<&str> = session.turns.iter().map(|turn| turn.user_text.as_str()).collect();
    assert_eq!(texts, ["first question about treatment", "second question about treatment"]);
}

#[tokio::test]
async fn closed_sessions_reject_further_turns() {
    let harness = harness();
    let opened = harness
        .orchestrator
        .handle_turn(TurnRequest::new(None, "I need help finding treatment"))
        .await
        .expect("turn handled");
    let id = opened.session_id;

    let closed = harness.orchestrator.close_session(&id, "req-close").await.expect("closed");
    assert_eq!(closed.phase, TurnPhase::Closed);
    assert_eq!(closed.close_reason, Some(CloseReason::Explicit));

    let rejected =
        harness.orchestrator.handle_turn(TurnRequest::new(Some(id.clone()), "hello again")).await;
    assert!(matches!(
        rejected,
        Err(ApplicationError::Domain(DomainError::SessionClosed(ref closed_id))) if *closed_id == id
    ));
    assert!(matches!(
        harness.orchestrator.close_session(&id, "req-close-again").await,
        Err(ApplicationError::Domain(DomainError::SessionClosed(_)))
    ));

    let session = harness.orchestrator.session_snapshot(&id).await.expect("session");
    assert_eq!(session.turns.len(), 1);
    assert_eq!(harness.audit.events_of_type("turn.rejected").len(), 1);
}

#[tokio::test]
async fn unknown_sessions_and_empty_text_are_rejected() {
    let harness = harness();

    let missing = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(SessionId("sess-missing".to_string())), "hi"))
        .await;
    assert!(matches!(missing, Err(ApplicationError::SessionNotFound(_))));

    let empty = harness.orchestrator.handle_turn(TurnRequest::new(None, "   ")).await;
    assert!(matches!(empty, Err(ApplicationError::InvalidInput(_))));
    assert!(harness.orchestrator.store().is_empty().await);
}

#[tokio::test]
async fn repeated_agent_failures_return_the_session_to_triage() {
    let mut agents = AgentRegistry::with_builtin();
    agents.register(BrokenAgent(AgentId::Reminder));
    let harness = harness_with(agents, gateway(demo_registry()));
    let id = seeded(&harness.orchestrator, AgentId::Reminder).await;

    let first = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(id.clone()), "tomorrow at 9am please"))
        .await
        .expect("first turn");
    assert_eq!(first.reply, AGENT_FAILURE_REPLY);
    assert_eq!(first.disposition, TurnDisposition::AgentFailed);
    assert_eq!(first.agent, AgentId::Reminder);

    let second = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(id.clone()), "tomorrow at 9am please"))
        .await
        .expect("second turn");
    assert_eq!(second.reply, CIRCUIT_RESET_REPLY);
    assert_eq!(second.agent, AgentId::Triage);

    let session = harness.orchestrator.session_snapshot(&id).await.expect("session");
    assert_eq!(session.consecutive_failures, 0);
    assert_eq!(session.phase, TurnPhase::AwaitingInput);
    assert_eq!(harness.audit.events_of_type("agent.circuit_open").len(), 1);
}

#[tokio::test]
async fn unsafe_draft_is_regenerated_once() {
    let mut agents = AgentRegistry::with_builtin();
    agents.register(DiagnosingAgent { safe_rewrite: true });
    let harness = harness_with(agents, gateway(demo_registry()));
    let id = seeded(&harness.orchestrator, AgentId::FacilitySearch).await;

    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(id.clone()), "which one would suit me?"))
        .await
        .expect("turn handled");

    assert_eq!(
        reply.reply,
        "Peachtree Recovery Center in Atlanta offers detox and residential care."
    );
    assert_eq!(reply.disposition, TurnDisposition::Responded);
    assert_eq!(reply.agent, AgentId::Triage);

    let session = harness.orchestrator.session_snapshot(&id).await.expect("session");
    let verdicts = &session.turns[0].post_verdicts;
    assert!(verdicts.iter().any(|verdict| verdict.reason_code == "diagnosis"));
    assert!(verdicts.last().is_some_and(|verdict| verdict.is_pass()));
    assert_eq!(session.slot(SlotKey::Location), Some("Atlanta, GA"));
}

#[tokio::test]
async fn unsafe_regeneration_falls_back_and_discards_proposals() {
    let mut agents = AgentRegistry::with_builtin();
    agents.register(DiagnosingAgent { safe_rewrite: false });
    let harness = harness_with(agents, gateway(demo_registry()));
    let id = seeded(&harness.orchestrator, AgentId::FacilitySearch).await;

    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(id.clone()), "which one would suit me?"))
        .await
        .expect("turn handled");

    assert_eq!(reply.reply, SAFE_FALLBACK_REPLY);
    assert_eq!(reply.disposition, TurnDisposition::Intercepted);
    assert_eq!(reply.agent, AgentId::FacilitySearch);

    let session = harness.orchestrator.session_snapshot(&id).await.expect("session");
    assert_eq!(session.phase, TurnPhase::AwaitingInput);
    assert_eq!(session.slot(SlotKey::Location), None);
    assert!(session.turns[0].phase_trace.contains(&TurnPhase::Intercepted));
}

#[tokio::test]
async fn handoff_chains_stop_at_the_hop_limit() {
    let mut agents = AgentRegistry::with_builtin();
    agents.register(BouncingAgent { id: AgentId::Triage, target: AgentId::Reminder });
    agents.register(BouncingAgent { id: AgentId::Reminder, target: AgentId::Triage });
    let harness = harness_with(agents, gateway(demo_registry()));
    let id = seeded(&harness.orchestrator, AgentId::Triage).await;

    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(Some(id.clone()), "I need help with treatment"))
        .await
        .expect("turn handled");

    let session = harness.orchestrator.session_snapshot(&id).await.expect("session");
    let handled_by = &session.turns[0].handled_by;
    assert_eq!(handled_by.len(), 4);
    assert_eq!(
        handled_by.as_slice(),
        [AgentId::Triage, AgentId::Reminder, AgentId::Triage, AgentId::Reminder]
    );
    assert_eq!(reply.agent, AgentId::Triage);
    assert_eq!(harness.audit.events_of_type("agent.handoff").len(), 3);
}

#[tokio::test]
async fn idle_sessions_are_closed_by_the_sweep() {
    let harness = harness();
    let reply = harness
        .orchestrator
        .handle_turn(TurnRequest::new(None, "I need help finding treatment"))
        .await
        .expect("turn handled");

    assert!(harness.orchestrator.close_idle_sessions(Utc::now()).await.is_empty());

    let later = Utc::now() + chrono::Duration::hours(1);
    let closed = harness.orchestrator.close_idle_sessions(later).await;
    assert_eq!(closed, vec![reply.session_id.clone()]);

    let session = harness.orchestrator.session_snapshot(&reply.session_id).await.expect("session");
    assert_eq!(session.close_reason, Some(CloseReason::Inactivity));
    let archived = harness.archive.session(&reply.session_id).await.expect("archived");
    assert_eq!(archived.phase, TurnPhase::Closed);

    assert!(harness.orchestrator.close_idle_sessions(later).await.is_empty());
}
