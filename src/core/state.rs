//! State and input tokens.
//!
//! States and inputs are opaque, comparable tokens. A machine type only
//! knows the tokens its transitions mention; anything else is a
//! configuration error rather than a runtime default.

use std::fmt::Debug;
use std::hash::Hash;

/// Trait for state machine states.
///
/// States are used as transition table keys, so they must be hashable
/// and cheap to clone.
///
/// # Example
///
/// ```rust
/// use sip_fsm::core::State;
///
/// #[derive(Clone, PartialEq, Eq, Hash, Debug)]
/// enum TxState {
///     Calling,
///     Proceeding,
///     Completed,
/// }
///
/// impl State for TxState {
///     fn name(&self) -> &str {
///         match self {
///             Self::Calling => "Calling",
///             Self::Proceeding => "Proceeding",
///             Self::Completed => "Completed",
///         }
///     }
/// }
///
/// assert_eq!(TxState::Proceeding.name(), "Proceeding");
/// ```
pub trait State: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Get the state's name for display/logging.
    fn name(&self) -> &str;
}

/// Trait for the inputs that drive a state machine.
///
/// Inputs carry no payload; per-hit data travels as the machine's
/// argument list.
pub trait Input: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Get the input's name for display/logging.
    fn name(&self) -> &str;
}

impl State for &'static str {
    fn name(&self) -> &str {
        self
    }
}

impl Input for &'static str {
    fn name(&self) -> &str {
        self
    }
}

impl State for String {
    fn name(&self) -> &str {
        self.as_str()
    }
}

impl Input for String {
    fn name(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Clone, PartialEq, Eq, Hash, Debug)]
    enum TestState {
        Trying,
        Proceeding,
        Completed,
    }

    impl State for TestState {
        fn name(&self) -> &str {
            match self {
                Self::Trying => "Trying",
                Self::Proceeding => "Proceeding",
                Self::Completed => "Completed",
            }
        }
    }

    #[test]
    fn state_name_returns_correct_value() {
        assert_eq!(TestState::Trying.name(), "Trying");
        assert_eq!(TestState::Proceeding.name(), "Proceeding");
        assert_eq!(TestState::Completed.name(), "Completed");
    }

    #[test]
    fn string_tokens_name_themselves() {
        assert_eq!(State::name(&"idle"), "idle");
        assert_eq!(Input::name(&String::from("timer_a")), "timer_a");
    }

    #[test]
    fn states_are_usable_as_keys() {
        let mut seen = HashSet::new();
        seen.insert(TestState::Trying);
        seen.insert(TestState::Trying.clone());
        seen.insert(TestState::Completed);

        assert_eq!(seen.len(), 2);
    }
}
