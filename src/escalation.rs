//! Escalation state machine
//!
//! Pure transitions over a conversation's escalation record:
//! `NONE -> PENDING -> STARTED -> RESOLVED`, where resolved is derived from
//! the tracked thread messages rather than stored.

mod effect;
mod event;
mod transition;


pub use effect::{Effect, RESOLUTION_NOTICE};
pub use event::Event;
pub use transition::{
    transition, EscalationContext, Outcome, RecordChange, TransitionError, TransitionResult,
};
