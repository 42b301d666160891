pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, TurnFlow};
pub use states::{FlowContext, TransitionOutcome, TurnEvent, TurnPhase};
