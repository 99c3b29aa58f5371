//! Timer error types.

use thiserror::Error;

/// Errors raised by misuse of the timer API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimerError {
    /// A strict check was attempted on a disarmed timer
    #[error("Timer '{name}' is not running")]
    NotRunning { name: String },

    /// A backoff factory produced a cursor with no waits at all
    #[error("Backoff factory yields an exhausted cursor")]
    ExhaustedPolicy,

    /// A repeating policy was given a zero step
    #[error("Backoff interval must be greater than zero")]
    ZeroInterval,

    /// No timer with this name exists on the machine
    #[error("Unknown timer '{name}'")]
    Unknown { name: String },
}
