//! Turn pipeline for the treatment navigator.
//!
//! Every user message walks the same fixed path:
//! 1. **Pre-turn gate** (`guardrails`): crisis detection on the raw text, then
//!    PII redaction, then topic relevance on the redacted text.
//! 2. **Dispatch** (`agents`): the session's current agent handles the
//!    redacted text and may hand off to another agent within the same turn.
//! 3. **Tools** (`tools`): agents reach collaborators only through the
//!    gateway, which redacts arguments and applies the retry policy.
//! 4. **Post-turn gate**: outbound redaction, then response safety on the
//!    draft. An unsafe draft gets one regeneration before the safe fallback.
//!
//! The [`runtime::Orchestrator`] owns all session mutation. Agents, validators
//! and the optional language model only return proposals.

pub mod agents;
pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod runtime;
pub mod safety;
pub mod store;
pub mod tools;

pub use agents::{AgentContext, AgentFailure, AgentHandler, AgentRegistry, AgentSettings};
pub use guardrails::{GateDecision, SafetyGate};
pub use runtime::{Orchestrator, OrchestratorSettings, TurnReply, TurnRequest};
pub use store::SessionStore;
pub use tools::{Tool, ToolCallError, ToolGateway, ToolRegistry};
