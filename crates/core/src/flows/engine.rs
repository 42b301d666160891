use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{FlowContext, TransitionOutcome, TurnEvent, TurnPhase};

pub trait FlowDefinition {
    fn initial_state(&self) -> TurnPhase;
    fn transition(
        &self,
        current: &TurnPhase,
        event: &TurnEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The per-turn pipeline: pre-turn gate, dispatch, post-turn gate, commit.
#[derive(Clone, Debug, Default)]
pub struct TurnFlow;

impl FlowDefinition for TurnFlow {
    fn initial_state(&self) -> TurnPhase {
        TurnPhase::New
    }

    fn transition(
        &self,
        current: &TurnPhase,
        event: &TurnEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_turn(current, event, context)
    }
}

#[derive(Clone, Debug)]
pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> TurnPhase {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &TurnPhase,
        event: &TurnEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &TurnPhase,
        event: &TurnEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(audit, "flow.transition_applied", AuditCategory::Flow)
                        .with_outcome(AuditOutcome::Success)
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(audit, "flow.transition_rejected", AuditCategory::Flow)
                        .with_outcome(AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<TurnFlow> {
    fn default() -> Self {
        Self::new(TurnFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("transition from {state:?} requires {requirement}")]
    MissingPrecondition { state: TurnPhase, requirement: &'static str },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TurnPhase, event: TurnEvent },
}

fn transition_turn(
    current: &TurnPhase,
    event: &TurnEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use TurnEvent::{
        AgentFailed, AgentReturned, CloseRequested, InputReceived, InterceptEmitted,
        PostCheckIntercepted, PostChecksPassed, PreCheckIntercepted, PreChecksPassed,
        SessionOpened, TurnCommitted,
    };
    use TurnPhase::{
        AwaitingInput, Closed, Dispatching, Intercepted, New, Responding, ValidatingPost,
        ValidatingPre,
    };

    let to = match (current, event) {
        (Closed, _) => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
        (_, CloseRequested) => Closed,
        (New, SessionOpened) => AwaitingInput,
        (AwaitingInput, InputReceived) => ValidatingPre,
        (ValidatingPre, PreChecksPassed) => {
            if !context.has_sanitized_input {
                return Err(FlowTransitionError::MissingPrecondition {
                    state: *current,
                    requirement: "sanitized input",
                });
            }
            Dispatching
        }
        (ValidatingPre, PreCheckIntercepted) | (ValidatingPost, PostCheckIntercepted) => {
            Intercepted
        }
        (Dispatching, AgentReturned) => {
            if !context.has_draft {
                return Err(FlowTransitionError::MissingPrecondition {
                    state: *current,
                    requirement: "a usable draft reply",
                });
            }
            ValidatingPost
        }
        (Dispatching, AgentFailed) | (ValidatingPost, PostChecksPassed) => Responding,
        (Responding, TurnCommitted) | (Intercepted, InterceptEmitted) => AwaitingInput,
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event })
}
