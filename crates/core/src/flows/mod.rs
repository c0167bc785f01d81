pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, QuoteLifecycleFlow, Transition, TransitionError};
pub use states::{
    FlowAction, LifecycleCommand, LifecycleEvent, LifecycleState, QuoteOutcome,
    TransitionContext, TransitionOutcome,
};
