//! Builder API for machine templates.
//!
//! A template is the per-type description of a machine: its transition
//! table, timers, entry actions and named methods. It is built once, then
//! shared by every instance of that machine type.

pub mod error;
pub mod macros;
pub mod template;
pub mod transition;

pub use error::BuildError;
pub use template::{Template, TemplateBuilder, TimerSpec};
pub use transition::{ThreadSpec, Transition, TransitionBuilder};

use crate::machine::Machine;

/// Create a transition with no actions, timers or threads.
///
/// # Example
///
/// ```
/// use sip_fsm::builder::simple_transition;
/// use sip_fsm::machine::Machine;
///
/// struct Registration;
///
/// impl Machine for Registration {
///     type State = &'static str;
///     type Input = &'static str;
///     type Arg = ();
/// }
///
/// let transition = simple_transition::<Registration>("registered", "expire", "idle");
/// assert_eq!(transition.to, "idle");
/// ```
pub fn simple_transition<M: Machine>(
    from: M::State,
    input: M::Input,
    to: M::State,
) -> Transition<M> {
    Transition {
        from,
        input,
        to,
        actions: Default::default(),
        stop_timers: Vec::new(),
        start_timers: Vec::new(),
        threads: Vec::new(),
    }
}
