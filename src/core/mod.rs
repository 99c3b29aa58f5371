//! Core tokens, time and history.
//!
//! This module contains the pieces every other layer leans on:
//! - State and input tokens via the `State` and `Input` traits
//! - Pluggable monotonic clocks
//! - Bounded transition history

mod clock;
mod history;
mod state;

pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use history::{StateHistory, StateTransition};
pub use state::{Input, State};
