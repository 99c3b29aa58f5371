//! Builder for constructing state transitions.

use crate::action::{ActionRegistry, ActionSpec};
use crate::builder::error::BuildError;
use crate::core::{Input, State};
use crate::machine::Machine;

/// A worker thread to start when a transition commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSpec {
    /// Thread name, unique among the machine's running workers.
    pub name: String,
    /// Registered thread method the worker runs.
    pub method: String,
}

/// A declared `(state, input)` rule.
pub struct Transition<M: Machine> {
    pub from: M::State,
    pub input: M::Input,
    pub to: M::State,
    pub actions: ActionSpec<M>,
    /// Stopped before the actions run.
    pub stop_timers: Vec<String>,
    /// Started after the actions succeed.
    pub start_timers: Vec<String>,
    pub threads: Vec<ThreadSpec>,
}

impl<M: Machine> Transition<M> {
    /// Check that every timer and thread method this transition mentions
    /// exists.
    pub(crate) fn validate<F>(
        &self,
        has_timer: F,
        registry: &ActionRegistry<M>,
    ) -> Result<(), BuildError>
    where
        F: Fn(&str) -> bool,
    {
        if let Some(name) = self
            .stop_timers
            .iter()
            .chain(&self.start_timers)
            .find(|name| !has_timer(name))
        {
            return Err(BuildError::UnknownTimer { name: name.clone() });
        }
        if let Some(thread) = self
            .threads
            .iter()
            .find(|thread| !registry.has_thread(&thread.method))
        {
            return Err(BuildError::UnknownThreadMethod {
                name: thread.method.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn duplicate_error(&self) -> BuildError {
        BuildError::DuplicateTransition {
            state: self.from.name().to_string(),
            input: self.input.name().to_string(),
        }
    }
}

impl<M: Machine> Clone for Transition<M> {
    fn clone(&self) -> Self {
        Self {
            from: self.from.clone(),
            input: self.input.clone(),
            to: self.to.clone(),
            actions: self.actions.clone(),
            stop_timers: self.stop_timers.clone(),
            start_timers: self.start_timers.clone(),
            threads: self.threads.clone(),
        }
    }
}

/// Builder for constructing transitions with a fluent API.
pub struct TransitionBuilder<M: Machine> {
    from: Option<M::State>,
    input: Option<M::Input>,
    to: Option<M::State>,
    actions: Vec<ActionSpec<M>>,
    stop_timers: Vec<String>,
    start_timers: Vec<String>,
    threads: Vec<ThreadSpec>,
}

impl<M: Machine> TransitionBuilder<M> {
    /// Create a new transition builder.
    pub fn new() -> Self {
        Self {
            from: None,
            input: None,
            to: None,
            actions: Vec::new(),
            stop_timers: Vec::new(),
            start_timers: Vec::new(),
            threads: Vec::new(),
        }
    }

    /// Set the source state (required).
    pub fn from(mut self, state: M::State) -> Self {
        self.from = Some(state);
        self
    }

    /// Set the triggering input (required).
    pub fn on(mut self, input: M::Input) -> Self {
        self.input = Some(input);
        self
    }

    /// Set the target state (required).
    pub fn to(mut self, state: M::State) -> Self {
        self.to = Some(state);
        self
    }

    /// Append an action. Actions run in the order they were added.
    pub fn action(mut self, action: impl Into<ActionSpec<M>>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn stop_timer(mut self, name: impl Into<String>) -> Self {
        self.stop_timers.push(name.into());
        self
    }

    pub fn start_timer(mut self, name: impl Into<String>) -> Self {
        self.start_timers.push(name.into());
        self
    }

    /// Start worker `name` running the registered thread `method`.
    pub fn start_thread(mut self, name: impl Into<String>, method: impl Into<String>) -> Self {
        self.threads.push(ThreadSpec {
            name: name.into(),
            method: method.into(),
        });
        self
    }

    /// Build the transition.
    pub fn build(self) -> Result<Transition<M>, BuildError> {
        let from = self.from.ok_or(BuildError::MissingFromState)?;
        let input = self.input.ok_or(BuildError::MissingInput)?;
        let to = self.to.ok_or(BuildError::MissingToState)?;

        let actions = match self.actions.len() {
            0 => ActionSpec::None,
            1 => self.actions.into_iter().next().unwrap_or_default(),
            _ => ActionSpec::List(self.actions),
        };

        Ok(Transition {
            from,
            input,
            to,
            actions,
            stop_timers: self.stop_timers,
            start_timers: self.start_timers,
            threads: self.threads,
        })
    }
}

impl<M: Machine> Default for TransitionBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tx;

    impl Machine for Tx {
        type State = &'static str;
        type Input = &'static str;
        type Arg = ();
    }

    #[test]
    fn builder_validates_required_fields() {
        let result = TransitionBuilder::<Tx>::new().from("calling").build();
        assert!(matches!(result, Err(BuildError::MissingInput)));

        let result = TransitionBuilder::<Tx>::new()
            .from("calling")
            .on("resp_1xx")
            .build();
        assert!(matches!(result, Err(BuildError::MissingToState)));

        let result = TransitionBuilder::<Tx>::new().on("resp_1xx").build();
        assert!(matches!(result, Err(BuildError::MissingFromState)));
    }

    #[test]
    fn actions_accumulate_in_order() {
        let transition = TransitionBuilder::<Tx>::new()
            .from("calling")
            .on("resp_2xx")
            .to("accepted")
            .action("pass_up")
            .action("start_timer_m")
            .build()
            .unwrap();

        match transition.actions {
            ActionSpec::List(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(&items[0], ActionSpec::Named(name) if name == "pass_up"));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn no_actions_builds_none() {
        let transition = TransitionBuilder::<Tx>::new()
            .from("completed")
            .on("timer_d")
            .to("terminated")
            .build()
            .unwrap();

        assert!(transition.actions.is_none());
    }

    #[test]
    fn validate_rejects_unknown_timer() {
        let transition = TransitionBuilder::<Tx>::new()
            .from("calling")
            .on("resp_1xx")
            .to("proceeding")
            .stop_timer("a")
            .build()
            .unwrap();
        let registry = ActionRegistry::new();

        let result = transition.validate(|name| name == "b", &registry);
        assert!(matches!(result, Err(BuildError::UnknownTimer { name }) if name == "a"));
        assert!(transition.validate(|_| true, &registry).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_thread_method() {
        let transition = TransitionBuilder::<Tx>::new()
            .from("idle")
            .on("resolve")
            .to("resolving")
            .start_thread("dns", "lookup")
            .build()
            .unwrap();

        let result = transition.validate(|_| true, &ActionRegistry::new());
        assert!(matches!(result, Err(BuildError::UnknownThreadMethod { .. })));
    }
}
