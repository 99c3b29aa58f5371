use crate::action::ActionError;
use crate::builder::BuildError;
use crate::scheduler::SchedulerError;
use crate::timer::TimerError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while driving a machine.
#[derive(Debug, Error)]
pub enum FsmError {
    #[error("No transition from state '{state}' on input '{input}'")]
    UnexpectedInput { state: String, input: String },

    #[error("Action '{action}' failed in state '{state}' on input '{input}'")]
    ActionFailed {
        action: String,
        state: String,
        input: String,
        #[source]
        source: ActionError,
    },

    #[error("Timer '{timer}' action failed")]
    TimerFailed {
        timer: String,
        #[source]
        source: ActionError,
    },

    #[error("Timed out after {waited:?} waiting for a state condition")]
    Timeout { waited: Duration },

    #[error("Machine {machine} lock re-acquired by the thread that already holds it")]
    LockReentered { machine: Uuid },

    #[error("Action '{name}' resolves to neither a method nor a delegate method")]
    UnresolvedAction { name: String },

    #[error("Operation requires an asynchronous machine")]
    NotAsync,

    #[error("Machine has been released")]
    Detached,

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl FsmError {
    /// Whether this is the wait-helper timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
