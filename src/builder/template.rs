//! Per-type machine templates.
//!
//! A [`Template`] is built once per machine type and shared by every
//! instance. Instances copy what they need out of it at construction, so
//! timers and bound actions are never shared between instances.

use crate::action::{ActionError, ActionRegistry, ActionResult, ActionSpec, Call, ThreadStep};
use crate::builder::error::BuildError;
use crate::builder::transition::{Transition, TransitionBuilder};
use crate::core::{Input, State};
use crate::machine::Machine;
use crate::timer::BackoffPolicy;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A declared timer: name, backoff policy and the action run on each pop.
pub struct TimerSpec<M: Machine> {
    pub name: String,
    pub policy: BackoffPolicy,
    pub action: ActionSpec<M>,
}

impl<M: Machine> Clone for TimerSpec<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            policy: self.policy.clone(),
            action: self.action.clone(),
        }
    }
}

/// Immutable transition table, timer set and method registry of a machine
/// type.
pub struct Template<M: Machine> {
    name: String,
    initial: M::State,
    transitions: HashMap<(M::State, M::Input), Transition<M>>,
    timers: Vec<TimerSpec<M>>,
    entry: HashMap<M::State, ActionSpec<M>>,
    registry: ActionRegistry<M>,
    states: HashSet<M::State>,
    inputs: HashSet<M::Input>,
}

impl<M: Machine> Template<M> {
    pub fn builder(name: impl Into<String>) -> TemplateBuilder<M> {
        TemplateBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial(&self) -> &M::State {
        &self.initial
    }

    pub fn transition(&self, state: &M::State, input: &M::Input) -> Option<&Transition<M>> {
        self.transitions.get(&(state.clone(), input.clone()))
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition<M>> {
        self.transitions.values()
    }

    pub fn timers(&self) -> &[TimerSpec<M>] {
        &self.timers
    }

    pub fn entry_actions(&self) -> impl Iterator<Item = (&M::State, &ActionSpec<M>)> {
        self.entry.iter()
    }

    pub fn registry(&self) -> &ActionRegistry<M> {
        &self.registry
    }

    pub fn states(&self) -> &HashSet<M::State> {
        &self.states
    }

    pub fn inputs(&self) -> &HashSet<M::Input> {
        &self.inputs
    }
}

impl<M: Machine> fmt::Debug for Template<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field("transitions", &self.transitions.len())
            .field("timers", &self.timers.iter().map(|t| &t.name).collect::<Vec<_>>())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Builder for constructing templates with a fluent API.
///
/// # Example
///
/// ```rust
/// use sip_fsm::builder::{Template, TransitionBuilder};
/// use sip_fsm::machine::Machine;
/// use sip_fsm::timer::BackoffPolicy;
/// use std::time::Duration;
///
/// struct Keepalive;
///
/// impl Machine for Keepalive {
///     type State = &'static str;
///     type Input = &'static str;
///     type Arg = ();
/// }
///
/// let template = Template::<Keepalive>::builder("keepalive")
///     .initial("idle")
///     .method("ping", |_, _| Ok(()))
///     .timer("tick", BackoffPolicy::constant(Duration::from_secs(30)).unwrap(), "ping")
///     .unwrap()
///     .transition(TransitionBuilder::new().from("idle").on("start").to("running").start_timer("tick"))
///     .unwrap()
///     .transition(TransitionBuilder::new().from("running").on("stop").to("idle").stop_timer("tick"))
///     .unwrap()
///     .build()
///     .unwrap();
///
/// assert_eq!(template.initial(), &"idle");
/// ```
pub struct TemplateBuilder<M: Machine> {
    name: String,
    initial: Option<M::State>,
    transitions: HashMap<(M::State, M::Input), Transition<M>>,
    timers: Vec<TimerSpec<M>>,
    entry: HashMap<M::State, ActionSpec<M>>,
    registry: ActionRegistry<M>,
}

impl<M: Machine> TemplateBuilder<M> {
    /// Create a new builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: None,
            transitions: HashMap::new(),
            timers: Vec::new(),
            entry: HashMap::new(),
            registry: ActionRegistry::new(),
        }
    }

    /// Set the initial state (required).
    pub fn initial(mut self, state: M::State) -> Self {
        self.initial = Some(state);
        self
    }

    /// Register a named action method.
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&M, &Call<'_, M>) -> ActionResult + Send + Sync + 'static,
    {
        self.registry.register(name, f);
        self
    }

    /// Register a worker thread method.
    pub fn thread_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&M, &Call<'_, M>) -> Result<ThreadStep, ActionError> + Send + Sync + 'static,
    {
        self.registry.register_thread(name, f);
        self
    }

    /// Declare a timer.
    pub fn timer(
        mut self,
        name: impl Into<String>,
        policy: BackoffPolicy,
        action: impl Into<ActionSpec<M>>,
    ) -> Result<Self, BuildError> {
        let name = name.into();
        if self.timers.iter().any(|timer| timer.name == name) {
            return Err(BuildError::DuplicateTimer { name });
        }
        self.timers.push(TimerSpec {
            name,
            policy,
            action: action.into(),
        });
        Ok(self)
    }

    /// Add a transition using a builder.
    /// Returns an error if the builder fails validation or the
    /// `(state, input)` pair already has a transition.
    pub fn transition(self, builder: TransitionBuilder<M>) -> Result<Self, BuildError> {
        let transition = builder.build()?;
        self.add_transition(transition)
    }

    /// Add a pre-built transition.
    pub fn add_transition(mut self, transition: Transition<M>) -> Result<Self, BuildError> {
        let key = (transition.from.clone(), transition.input.clone());
        if self.transitions.contains_key(&key) {
            return Err(transition.duplicate_error());
        }
        self.transitions.insert(key, transition);
        Ok(self)
    }

    /// Add multiple transitions at once.
    pub fn transitions(
        self,
        transitions: impl IntoIterator<Item = Transition<M>>,
    ) -> Result<Self, BuildError> {
        transitions
            .into_iter()
            .try_fold(self, |builder, transition| builder.add_transition(transition))
    }

    /// Run `action` every time the machine enters `state`.
    pub fn on_enter(mut self, state: M::State, action: impl Into<ActionSpec<M>>) -> Self {
        self.entry.insert(state, action.into());
        self
    }

    /// Build the template.
    /// Returns an error if required fields are missing or a transition
    /// references something that was never declared.
    pub fn build(self) -> Result<Template<M>, BuildError> {
        let initial = self.initial.ok_or(BuildError::MissingInitialState)?;

        if self.transitions.is_empty() {
            return Err(BuildError::NoTransitions);
        }

        let mut states = HashSet::new();
        let mut inputs = HashSet::new();
        for transition in self.transitions.values() {
            transition.validate(
                |name| self.timers.iter().any(|timer| timer.name == name),
                &self.registry,
            )?;
            states.insert(transition.from.clone());
            states.insert(transition.to.clone());
            inputs.insert(transition.input.clone());
        }

        if let Some(state) = std::iter::once(&initial)
            .chain(self.entry.keys())
            .find(|state| !states.contains(*state))
        {
            return Err(BuildError::UnknownState {
                state: state.name().to_string(),
            });
        }

        Ok(Template {
            name: self.name,
            initial,
            transitions: self.transitions,
            timers: self.timers,
            entry: self.entry,
            registry: self.registry,
            states,
            inputs,
        })
    }
}
