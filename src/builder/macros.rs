//! Macros for ergonomic token declarations.

#[doc(hidden)]
#[macro_export]
macro_rules! __token_enum {
    (
        $trait:ident;
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),*
        }

        impl $crate::core::$trait for $name {
            fn name(&self) -> &str {
                match self {
                    $(Self::$variant => stringify!($variant)),*
                }
            }
        }
    };
}

/// Generate a `State` implementation for a simple enum.
///
/// # Example
///
/// ```
/// use sip_fsm::core::State;
/// use sip_fsm::state_enum;
///
/// state_enum! {
///     pub enum TxState {
///         Calling,
///         Proceeding,
///         Completed,
///         Terminated,
///     }
/// }
///
/// assert_eq!(TxState::Proceeding.name(), "Proceeding");
/// ```
#[macro_export]
macro_rules! state_enum {
    ($($body:tt)*) => {
        $crate::__token_enum! { State; $($body)* }
    };
}

/// Generate an `Input` implementation for a simple enum.
///
/// # Example
///
/// ```
/// use sip_fsm::core::Input;
/// use sip_fsm::input_enum;
///
/// input_enum! {
///     pub enum TxInput {
///         Resp1xx,
///         Resp2xx,
///         TimerA,
///     }
/// }
///
/// assert_eq!(TxInput::TimerA.name(), "TimerA");
/// ```
#[macro_export]
macro_rules! input_enum {
    ($($body:tt)*) => {
        $crate::__token_enum! { Input; $($body)* }
    };
}

#[cfg(test)]
mod tests {
    use crate::core::{Input, State};
    use std::collections::HashSet;

    state_enum! {
        enum TestState {
            Idle,
            Running,
        }
    }

    input_enum! {
        /// Inputs of the test machine.
        enum TestInput {
            Start,
            Stop,
        }
    }

    #[test]
    fn state_enum_macro_generates_trait() {
        assert_eq!(TestState::Idle.name(), "Idle");
        assert_eq!(TestState::Running.name(), "Running");
    }

    #[test]
    fn input_enum_macro_generates_trait() {
        assert_eq!(TestInput::Start.name(), "Start");
        assert_eq!(TestInput::Stop.name(), "Stop");
    }

    #[test]
    fn generated_tokens_are_hashable() {
        let seen: HashSet<_> = [TestState::Idle, TestState::Idle, TestState::Running]
            .into_iter()
            .collect();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn state_enum_supports_visibility() {
        state_enum! {
            pub enum PublicState {
                A,
                B,
            }
        }

        assert_eq!(PublicState::B.name(), "B");
        assert_ne!(PublicState::A, PublicState::B);
    }
}
