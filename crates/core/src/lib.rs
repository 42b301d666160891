pub mod archive;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use archive::{ArchiveError, ConversationArchive, InMemoryConversationArchive};
pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::agent::{AgentId, AgentResponse, Handoff};
pub use domain::safety::{
    CrisisResources, PiiClass, Remediation, SafetyVerdict, ValidatorKind, VerdictOutcome,
};
pub use domain::session::{CloseReason, Session, SessionId, SlotKey};
pub use domain::tool::{
    FacilityRecord, OperationKey, ToolInvocation, ToolInvocationId, ToolName, ToolResult,
    ToolStatus,
};
pub use domain::turn::{PrivateText, Turn, TurnDisposition, TurnId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowEngine, TurnEvent, TurnFlow, TurnPhase};
