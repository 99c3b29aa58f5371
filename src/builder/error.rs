//! Build errors for templates and transitions.

use crate::timer::TimerError;
use thiserror::Error;

/// Errors that can occur when building machine templates and transitions.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Initial state not specified. Call .initial(state) before .build()")]
    MissingInitialState,

    #[error("No transitions defined. Add at least one transition")]
    NoTransitions,

    #[error("Transition source state not specified. Call .from(state)")]
    MissingFromState,

    #[error("Transition input not specified. Call .on(input)")]
    MissingInput,

    #[error("Transition target state not specified. Call .to(state)")]
    MissingToState,

    #[error("Duplicate transition from '{state}' on '{input}'")]
    DuplicateTransition { state: String, input: String },

    #[error("Timer '{name}' is declared twice")]
    DuplicateTimer { name: String },

    #[error("Transition references undeclared timer '{name}'")]
    UnknownTimer { name: String },

    #[error("Transition starts thread with unregistered method '{name}'")]
    UnknownThreadMethod { name: String },

    #[error("State '{state}' does not appear in any transition")]
    UnknownState { state: String },

    #[error(transparent)]
    Timer(#[from] TimerError),
}
