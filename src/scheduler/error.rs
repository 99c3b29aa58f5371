use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Errors raised by the background scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Input source {fd} is already registered")]
    DuplicateSource { fd: RawFd },

    #[error("Scheduler thread already started")]
    AlreadyStarted,
}
