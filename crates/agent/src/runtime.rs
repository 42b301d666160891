use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use navigator_core::archive::{ConversationArchive, InMemoryConversationArchive};
use navigator_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use navigator_core::config::AppConfig;
use navigator_core::domain::agent::{AgentId, AgentResponse, Handoff};
use navigator_core::domain::safety::SafetyVerdict;
use navigator_core::domain::session::{CloseReason, Session, SessionId};
use navigator_core::domain::tool::ToolResult;
use navigator_core::domain::turn::{PrivateText, Turn, TurnDisposition, TurnId};
use navigator_core::errors::{ApplicationError, DomainError};
use navigator_core::flows::{
    FlowContext, FlowEngine, FlowTransitionError, TurnEvent, TurnFlow, TurnPhase,
};

use crate::agents::{AgentContext, AgentFailure, AgentRegistry, AgentSettings};
use crate::conversation::{ExtractedIntent, IntentExtractor};
use crate::guardrails::{GateDecision, SafetyGate};
use crate::llm::{HttpLlmClient, LlmClient};
use crate::store::{SessionHandle, SessionStore};
use crate::tools::{registry_from_config, ToolGateway};

pub const AGENT_FAILURE_REPLY: &str = "Sorry, something went wrong on my side while working on \
    that. Could you try again, or rephrase what you need?";

pub const CIRCUIT_RESET_REPLY: &str = "Sorry, I'm having trouble with that right now. Let's \
    start fresh: I can help you find a facility, check insurance, or schedule an appointment.";

pub const INTERNAL_FAULT_REPLY: &str = "Sorry, I ran into an unexpected problem. Please \
    rephrase your message, or ask to speak with a person.";

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub max_consecutive_failures: u32,
    pub max_handoffs_per_turn: u32,
    pub max_input_chars: usize,
    pub session_idle_timeout: Duration,
    pub agents: AgentSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 2,
            max_handoffs_per_turn: 3,
            max_input_chars: 4_000,
            session_idle_timeout: Duration::from_secs(1_800),
            agents: AgentSettings::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_consecutive_failures: config.orchestrator.max_consecutive_failures,
            max_handoffs_per_turn: config.orchestrator.max_handoffs_per_turn,
            max_input_chars: config.orchestrator.max_input_chars,
            session_idle_timeout: config.orchestrator.session_idle_timeout(),
            agents: AgentSettings {
                agent_timeout: config.orchestrator.agent_timeout(),
                llm_timeout: config.llm.timeout(),
                search_distance_miles: config.tools.default_search_distance_miles,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct TurnRequest {
    /// `None` opens a new session that starts with triage.
    pub session_id: Option<SessionId>,
    pub text: String,
    pub correlation_id: String,
}

impl TurnRequest {
    pub fn new(session_id: Option<SessionId>, text: impl Into<String>) -> Self {
        Self { session_id, text: text.into(), correlation_id: format!("req-{}", Uuid::new_v4()) }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    pub session_id: SessionId,
    pub reply: String,
    pub closed: bool,
    pub disposition: TurnDisposition,
    pub turn_number: u32,
    pub agent: AgentId,
}

struct Dispatched {
    agent: AgentId,
    response: AgentResponse,
    hop: u32,
}

/// The phases one turn walks through, audited as they happen.
struct PhaseWalk {
    phase: TurnPhase,
    trace: Vec<TurnPhase>,
    audit: AuditContext,
}

struct DispatchError {
    agent: AgentId,
    failure: AgentFailure,
}

/// What one turn produced, before it is written into the working copy.
struct TurnDraft {
    reply: String,
    disposition: TurnDisposition,
    handled_by: Vec<AgentId>,
    post_verdicts: Vec<SafetyVerdict>,
    tool_results: Vec<ToolResult>,
}

/// Sequences the safety gates, agents and tools for every turn and owns all
/// session mutation.
pub struct Orchestrator {
    store: SessionStore,
    agents: AgentRegistry,
    gate: SafetyGate,
    tools: ToolGateway,
    llm: Option<Arc<dyn LlmClient>>,
    audit: Arc<dyn AuditSink>,
    archive: Arc<dyn ConversationArchive>,
    flow: FlowEngine<TurnFlow>,
    extractor: IntentExtractor,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        agents: AgentRegistry,
        tools: ToolGateway,
        gate: SafetyGate,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store: SessionStore::new(),
            agents,
            gate,
            tools,
            llm: None,
            audit: Arc::new(NoopAuditSink),
            archive: Arc::new(InMemoryConversationArchive::new()),
            flow: FlowEngine::default(),
            extractor: IntentExtractor::new(),
            settings,
        }
    }

    /// Built-in agents, configured collaborators and the optional classifier.
    pub fn from_config(config: &AppConfig) -> Self {
        let tools = ToolGateway::from_config(registry_from_config(&config.tools), &config.tools);
        let mut orchestrator = Self::new(
            AgentRegistry::with_builtin(),
            tools,
            SafetyGate::new(config.safety.crisis.clone()),
            OrchestratorSettings::from_config(config),
        );
        if let Some(client) = HttpLlmClient::from_config(&config.llm) {
            orchestrator.llm = Some(Arc::new(client));
        }
        orchestrator
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn ConversationArchive>) -> Self {
        self.archive = archive;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnReply, ApplicationError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(ApplicationError::InvalidInput("text must not be empty".to_string()));
        }
        if text.chars().count() > self.settings.max_input_chars && !self.gate.signals_crisis(text) {
            return Err(ApplicationError::InvalidInput(format!(
                "text must be at most {} characters",
                self.settings.max_input_chars
            )));
        }

        let (session_id, handle) = match &request.session_id {
            Some(id) => {
                let handle = self
                    .store
                    .get(id)
                    .await
                    .ok_or_else(|| ApplicationError::SessionNotFound(id.clone()))?;
                (id.clone(), handle)
            }
            None => self.open_session(&request.correlation_id).await?,
        };

        let span = info_span!(
            "turn",
            session_id = %session_id,
            correlation_id = %request.correlation_id
        );
        self.run_turn(handle, text, &request.correlation_id).instrument(span).await
    }

    async fn open_session(
        &self,
        correlation_id: &str,
    ) -> Result<(SessionId, SessionHandle), ApplicationError> {
        let mut session = Session::new(SessionId::generate(), Utc::now());
        let audit = AuditContext::new(Some(session.id.clone()), correlation_id, "orchestrator");
        let opened = self
            .flow
            .apply_with_audit(
                &session.phase,
                &TurnEvent::SessionOpened,
                &FlowContext::default(),
                self.audit.as_ref(),
                &audit,
            )
            .map_err(DomainError::from)?;
        session.phase = opened.to;

        let id = session.id.clone();
        info!(event_name = "session.opened", session_id = %id, "opened session");
        Ok((id, self.store.insert(session).await))
    }

    async fn run_turn(
        &self,
        handle: SessionHandle,
        text: &str,
        correlation_id: &str,
    ) -> Result<TurnReply, ApplicationError> {
        let mut guard = handle.lock().await;
        if let Err(closed) = guard.ensure_open() {
            self.audit.emit(
                AuditEvent::new(
                    &AuditContext::new(Some(guard.id.clone()), correlation_id, "orchestrator"),
                    "turn.rejected",
                    AuditCategory::Session,
                )
                .with_outcome(AuditOutcome::Rejected)
                .with_metadata("reason", "session_closed"),
            );
            return Err(closed.into());
        }

        let mut working = guard.clone();
        let turn = match self.process(&mut working, text, correlation_id).await {
            Ok(turn) => turn,
            Err(fault) => {
                error!(event_name = "turn.internal_fault", error = %fault, "turn aborted");
                return Ok(TurnReply {
                    session_id: guard.id.clone(),
                    reply: INTERNAL_FAULT_REPLY.to_string(),
                    closed: guard.is_closed(),
                    disposition: TurnDisposition::AgentFailed,
                    turn_number: guard.next_turn_number(),
                    agent: guard.current_agent,
                });
            }
        };

        *guard = working;
        let reply = TurnReply {
            session_id: guard.id.clone(),
            reply: turn.reply.clone(),
            closed: guard.is_closed(),
            disposition: turn.disposition,
            turn_number: turn.number,
            agent: guard.current_agent,
        };
        info!(
            event_name = "turn.committed",
            turn_number = turn.number,
            disposition = turn.disposition.as_str(),
            agent = %reply.agent,
            "turn committed"
        );
        // Archived under the session lock so a concurrent close lands after this turn.
        self.archive_turn(&guard, &turn, correlation_id).await;
        Ok(reply)
    }

    async fn process(
        &self,
        working: &mut Session,
        text: &str,
        correlation_id: &str,
    ) -> Result<Turn, FlowTransitionError> {
        let turn_id = TurnId(format!("turn-{}", Uuid::new_v4()));
        let mut walk = PhaseWalk {
            phase: working.phase,
            trace: vec![working.phase],
            audit: AuditContext::new(Some(working.id.clone()), correlation_id, "orchestrator")
                .with_turn(turn_id.0.clone()),
        };

        self.advance(&mut walk, TurnEvent::InputReceived)?;
        let pre = self.gate.pre_turn(text, working.current_agent);
        self.audit_verdicts(&walk.audit, &pre.verdicts);

        let draft = match pre.decision {
            GateDecision::Escalate { reason_code, user_message } => {
                warn!(event_name = "safety.escalated", reason_code = %reason_code);
                self.advance(&mut walk, TurnEvent::PreCheckIntercepted)?;
                self.advance(&mut walk, TurnEvent::InterceptEmitted)?;
                TurnDraft::gated(user_message, TurnDisposition::Escalated)
            }
            GateDecision::Intercept { reason_code, user_message } => {
                info!(event_name = "safety.intercepted", stage = "pre", reason_code = %reason_code);
                self.advance(&mut walk, TurnEvent::PreCheckIntercepted)?;
                self.advance(&mut walk, TurnEvent::InterceptEmitted)?;
                TurnDraft::gated(user_message, TurnDisposition::Intercepted)
            }
            GateDecision::Proceed { text: sanitized } => {
                let ready =
                    FlowContext { has_sanitized_input: !sanitized.is_empty(), has_draft: false };
                self.advance_with(&mut walk, TurnEvent::PreChecksPassed, &ready)?;
                let known = self.known_identifiers(working, pre.private_original.as_deref());
                self.respond(working, &sanitized, &known, &mut walk).await?
            }
        };

        let now = Utc::now();
        working.phase = walk.phase;
        working.last_activity_at = now;
        let turn = Turn {
            id: turn_id,
            number: working.next_turn_number(),
            user_text: pre.recorded_text,
            private_original: pre.private_original.map(PrivateText::new),
            reply: draft.reply,
            handled_by: draft.handled_by,
            pre_verdicts: pre.verdicts,
            post_verdicts: draft.post_verdicts,
            tool_results: draft.tool_results,
            phase_trace: walk.trace,
            disposition: draft.disposition,
            recorded_at: now,
        };
        working.turns.push(turn.clone());
        Ok(turn)
    }

    /// Dispatch, post-turn gate and commit of agent proposals.
    async fn respond(
        &self,
        working: &mut Session,
        sanitized: &str,
        known: &[String],
        walk: &mut PhaseWalk,
    ) -> Result<TurnDraft, FlowTransitionError> {
        let intent = self.extractor.extract(sanitized);
        let mut scratch = working.clone();
        let mut handled_by = Vec::new();
        let mut tool_results = Vec::new();

        let dispatched = self
            .dispatch(
                &mut scratch,
                sanitized,
                &intent,
                &walk.audit,
                &mut handled_by,
                &mut tool_results,
            )
            .await;
        let dispatched = match dispatched {
            Ok(dispatched) => dispatched,
            Err(DispatchError { agent, failure }) => {
                self.advance(walk, TurnEvent::AgentFailed)?;
                let reply = self.record_failure(working, agent, &failure, &walk.audit);
                self.advance(walk, TurnEvent::TurnCommitted)?;
                return Ok(TurnDraft {
                    reply,
                    disposition: TurnDisposition::AgentFailed,
                    handled_by,
                    post_verdicts: Vec::new(),
                    tool_results,
                });
            }
        };

        let returned = FlowContext {
            has_sanitized_input: true,
            has_draft: dispatched.response.has_usable_draft(),
        };
        self.advance_with(walk, TurnEvent::AgentReturned, &returned)?;

        let mut post = self.gate.post_turn(&dispatched.response.draft, dispatched.agent, known);
        self.audit_verdicts(&walk.audit, &post.verdicts);
        let mut post_verdicts = post.verdicts.clone();
        let mut response = dispatched.response;

        if !post.decision.is_proceed() {
            let context = AgentContext {
                session: &scratch,
                input: sanitized,
                intent: &intent,
                tools: &self.tools,
                llm: self.llm.as_deref(),
                hop: dispatched.hop,
                settings: &self.settings.agents,
            };
            match self.agents.regenerate(dispatched.agent, &context, &response).await {
                Ok(regenerated) => {
                    info!(event_name = "agent.regenerated", agent = %dispatched.agent);
                    post = self.gate.post_turn(&regenerated.draft, dispatched.agent, known);
                    self.audit_verdicts(&walk.audit, &post.verdicts);
                    post_verdicts.extend(post.verdicts.iter().cloned());
                    response = regenerated;
                }
                Err(failure) => {
                    info!(
                        event_name = "agent.regeneration_skipped",
                        agent = %dispatched.agent,
                        reason = failure.as_str()
                    );
                }
            }
        }

        let (reply, disposition) = match post.decision {
            GateDecision::Proceed { text } => {
                self.advance(walk, TurnEvent::PostChecksPassed)?;
                working.slots = scratch.slots;
                working.consecutive_failures = 0;
                self.apply_handoff(working, dispatched.agent, response.handoff, &walk.audit);
                self.advance(walk, TurnEvent::TurnCommitted)?;
                (text, TurnDisposition::Responded)
            }
            GateDecision::Intercept { reason_code, user_message }
            | GateDecision::Escalate { reason_code, user_message } => {
                info!(
                    event_name = "safety.intercepted",
                    stage = "post",
                    reason_code = %reason_code
                );
                self.advance(walk, TurnEvent::PostCheckIntercepted)?;
                working.consecutive_failures = 0;
                self.advance(walk, TurnEvent::InterceptEmitted)?;
                (user_message, TurnDisposition::Intercepted)
            }
        };
        Ok(TurnDraft { reply, disposition, handled_by, post_verdicts, tool_results })
    }

    /// Runs the current agent and follows handoffs up to the hop limit.
    async fn dispatch(
        &self,
        scratch: &mut Session,
        sanitized: &str,
        intent: &ExtractedIntent,
        audit: &AuditContext,
        handled_by: &mut Vec<AgentId>,
        tool_results: &mut Vec<ToolResult>,
    ) -> Result<Dispatched, DispatchError> {
        let mut agent = scratch.current_agent;
        let mut hop = 0u32;
        loop {
            handled_by.push(agent);
            info!(event_name = "agent.dispatch", agent = %agent, hop, "dispatching agent");
            let context = AgentContext {
                session: scratch,
                input: sanitized,
                intent,
                tools: &self.tools,
                llm: self.llm.as_deref(),
                hop,
                settings: &self.settings.agents,
            };
            let outcome = self.agents.dispatch(agent, &context).await;
            self.audit_tools(audit, agent, &outcome);
            let response = match outcome {
                Ok(response) => response,
                Err(failure) => {
                    tool_results.extend(failure.tool_results());
                    return Err(DispatchError { agent, failure });
                }
            };

            tool_results.extend(response.tool_results.iter().cloned());
            scratch.apply_slots(&response.slot_updates);

            match response.handoff {
                Handoff::To(target) if hop < self.settings.max_handoffs_per_turn => {
                    self.audit.emit(
                        AuditEvent::new(audit, "agent.handoff", AuditCategory::Dispatch)
                            .with_metadata("from", agent.as_str())
                            .with_metadata("to", target.as_str())
                            .with_metadata("hop", hop.to_string()),
                    );
                    agent = target;
                    scratch.current_agent = target;
                    hop += 1;
                }
                Handoff::To(target) => {
                    warn!(
                        event_name = "agent.handoff_limit",
                        agent = %agent,
                        target = %target,
                        max_hops = self.settings.max_handoffs_per_turn,
                        "hop limit reached; handoff applied without dispatch"
                    );
                    return Ok(Dispatched { agent, response, hop });
                }
                _ => return Ok(Dispatched { agent, response, hop }),
            }
        }
    }

    fn apply_handoff(
        &self,
        working: &mut Session,
        agent: AgentId,
        handoff: Handoff,
        audit: &AuditContext,
    ) {
        let next = match handoff {
            Handoff::Remain => agent,
            Handoff::Complete => AgentId::Triage,
            Handoff::To(target) => target,
        };
        if next != working.current_agent {
            self.audit.emit(
                AuditEvent::new(audit, "session.agent_changed", AuditCategory::Session)
                    .with_metadata("from", working.current_agent.as_str())
                    .with_metadata("to", next.as_str()),
            );
        }
        working.current_agent = next;
    }

    /// Counts the failure and trips the breaker back to triage when needed.
    fn record_failure(
        &self,
        working: &mut Session,
        agent: AgentId,
        failure: &AgentFailure,
        audit: &AuditContext,
    ) -> String {
        warn!(
            event_name = "agent.failed",
            agent = %agent,
            reason = failure.as_str(),
            error = %failure,
            "agent failed; sending fallback"
        );
        working.consecutive_failures = working.consecutive_failures.saturating_add(1);
        self.audit.emit(
            AuditEvent::new(audit, "agent.failed", AuditCategory::Dispatch)
                .with_outcome(AuditOutcome::Failed)
                .with_metadata("agent", agent.as_str())
                .with_metadata("reason", failure.as_str())
                .with_metadata("consecutive_failures", working.consecutive_failures.to_string()),
        );

        if working.consecutive_failures < self.settings.max_consecutive_failures {
            return AGENT_FAILURE_REPLY.to_string();
        }
        warn!(
            event_name = "agent.circuit_open",
            agent = %working.current_agent,
            failures = working.consecutive_failures,
            "returning session to triage"
        );
        self.audit.emit(
            AuditEvent::new(audit, "agent.circuit_open", AuditCategory::Dispatch)
                .with_outcome(AuditOutcome::Failed)
                .with_metadata("from", working.current_agent.as_str()),
        );
        working.current_agent = AgentId::Triage;
        working.consecutive_failures = 0;
        CIRCUIT_RESET_REPLY.to_string()
    }

    fn known_identifiers(&self, session: &Session, current_original: Option<&str>) -> Vec<String> {
        let mut known = self.gate.disclosed_identifiers(&session.turns);
        if let Some(original) = current_original {
            known.extend(self.gate.redactor().identifiers_in(original));
        }
        known.sort();
        known.dedup();
        known
    }

    fn advance(&self, walk: &mut PhaseWalk, event: TurnEvent) -> Result<(), FlowTransitionError> {
        self.advance_with(walk, event, &FlowContext::default())
    }

    fn advance_with(
        &self,
        walk: &mut PhaseWalk,
        event: TurnEvent,
        context: &FlowContext,
    ) -> Result<(), FlowTransitionError> {
        let outcome = self.flow.apply_with_audit(
            &walk.phase,
            &event,
            context,
            self.audit.as_ref(),
            &walk.audit,
        )?;
        walk.phase = outcome.to;
        walk.trace.push(outcome.to);
        Ok(())
    }

    fn audit_verdicts(&self, audit: &AuditContext, verdicts: &[SafetyVerdict]) {
        for verdict in verdicts {
            let outcome =
                if verdict.is_pass() { AuditOutcome::Success } else { AuditOutcome::Rejected };
            self.audit.emit(
                AuditEvent::new(audit, "safety.verdict", AuditCategory::Safety)
                    .with_outcome(outcome)
                    .with_metadata("validator", verdict.validator.as_str())
                    .with_metadata("outcome", verdict.outcome.as_str())
                    .with_metadata("reason_code", verdict.reason_code.clone()),
            );
        }
    }

    fn audit_tools(
        &self,
        audit: &AuditContext,
        agent: AgentId,
        outcome: &Result<AgentResponse, AgentFailure>,
    ) {
        let results = match outcome {
            Ok(response) => response.tool_results.clone(),
            Err(failure) => failure.tool_results(),
        };
        for result in results {
            let status = if result.payload().is_some() {
                AuditOutcome::Success
            } else {
                AuditOutcome::Failed
            };
            self.audit.emit(
                AuditEvent::new(audit, "tool.result", AuditCategory::Tool)
                    .with_outcome(status)
                    .with_metadata("agent", agent.as_str())
                    .with_metadata("tool", result.invocation.tool.as_str())
                    .with_metadata("invocation_id", result.invocation.id.0.clone())
                    .with_metadata("status", result.status.as_str())
                    .with_metadata("attempts", result.attempts.to_string()),
            );
        }
    }

    async fn archive_turn(&self, session: &Session, turn: &Turn, correlation_id: &str) {
        let recorded = match self.archive.record_session(session).await {
            Ok(()) => self.archive.record_turn(&session.id, turn).await,
            Err(error) => Err(error),
        };
        if let Err(error) = recorded {
            warn!(event_name = "archive.failed", error = %error, "archive write failed");
            self.audit.emit(
                AuditEvent::new(
                    &AuditContext::new(Some(session.id.clone()), correlation_id, "orchestrator"),
                    "archive.failed",
                    AuditCategory::System,
                )
                .with_outcome(AuditOutcome::Failed),
            );
        }
    }

    /// Closes the session once any in-flight turn has finished.
    pub async fn close_session(
        &self,
        id: &SessionId,
        correlation_id: &str,
    ) -> Result<Session, ApplicationError> {
        let handle =
            self.store.get(id).await.ok_or_else(|| ApplicationError::SessionNotFound(id.clone()))?;
        let mut guard = handle.lock().await;
        self.close_locked(&mut guard, CloseReason::Explicit, Utc::now(), correlation_id)?;
        self.archive_session(&guard, correlation_id).await;
        Ok(guard.clone())
    }

    /// Puts an archived session back into the store. Archived turns carry
    /// only redacted text, so identifiers from before the resume are not
    /// known to outbound redaction.
    pub async fn resume_session(&self, session: Session, correlation_id: &str) -> SessionId {
        let id = session.id.clone();
        self.audit.emit(
            AuditEvent::new(
                &AuditContext::new(Some(id.clone()), correlation_id, "orchestrator"),
                "session.resumed",
                AuditCategory::Session,
            )
            .with_metadata("turns", session.turns.len().to_string())
            .with_metadata("prior_identifiers", "not_restored"),
        );
        info!(
            event_name = "session.resumed",
            session_id = %id,
            turns = session.turns.len(),
            "resumed archived session"
        );
        self.store.insert(session).await;
        id
    }

    pub async fn session_snapshot(&self, id: &SessionId) -> Result<Session, ApplicationError> {
        let handle =
            self.store.get(id).await.ok_or_else(|| ApplicationError::SessionNotFound(id.clone()))?;
        let snapshot = handle.lock().await.clone();
        Ok(snapshot)
    }

    /// Closes open sessions idle since before `now - idle timeout`. Sessions
    /// with a turn in flight are skipped until the next sweep.
    pub async fn close_idle_sessions(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let idle = chrono::Duration::from_std(self.settings.session_idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = now - idle;
        let correlation_id = format!("sweep-{}", Uuid::new_v4());

        let mut closed = Vec::new();
        for (id, handle) in self.store.handles().await {
            let Ok(mut guard) = handle.try_lock() else {
                continue;
            };
            if !guard.is_idle_since(cutoff) {
                continue;
            }
            if let Err(fault) =
                self.close_locked(&mut guard, CloseReason::Inactivity, now, &correlation_id)
            {
                warn!(event_name = "session.sweep_failed", session_id = %id, error = %fault);
                continue;
            }
            self.archive_session(&guard, &correlation_id).await;
            drop(guard);
            closed.push(id);
        }
        if !closed.is_empty() {
            info!(event_name = "session.sweep", closed = closed.len(), "closed idle sessions");
        }
        closed
    }

    fn close_locked(
        &self,
        session: &mut Session,
        reason: CloseReason,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        session.ensure_open()?;
        let audit = AuditContext::new(Some(session.id.clone()), correlation_id, "orchestrator");
        self.flow
            .apply_with_audit(
                &session.phase,
                &TurnEvent::CloseRequested,
                &FlowContext::default(),
                self.audit.as_ref(),
                &audit,
            )
            .map_err(DomainError::from)?;
        session.close(reason, now)?;
        self.audit.emit(
            AuditEvent::new(&audit, "session.closed", AuditCategory::Session)
                .with_metadata("reason", reason.as_str()),
        );
        info!(
            event_name = "session.closed",
            session_id = %session.id,
            reason = reason.as_str(),
            "session closed"
        );
        Ok(())
    }

    async fn archive_session(&self, session: &Session, correlation_id: &str) {
        if let Err(error) = self.archive.record_session(session).await {
            warn!(event_name = "archive.failed", error = %error, "archive write failed");
            self.audit.emit(
                AuditEvent::new(
                    &AuditContext::new(Some(session.id.clone()), correlation_id, "orchestrator"),
                    "archive.failed",
                    AuditCategory::System,
                )
                .with_outcome(AuditOutcome::Failed),
            );
        }
    }
}

impl TurnDraft {
    fn gated(reply: String, disposition: TurnDisposition) -> Self {
        Self {
            reply,
            disposition,
            handled_by: Vec::new(),
            post_verdicts: Vec::new(),
            tool_results: Vec::new(),
        }
    }
}
