//! Transition actions and their resolution.
//!
//! Transitions declare their actions as [`ActionSpec`]s: nothing, a
//! callable, a symbolic name, a name with leading static arguments, or an
//! ordered list of those. Names are resolved once, when a machine instance
//! is built, against the machine type's [`ActionRegistry`] and the
//! instance's optional [`Delegate`].
//!
//! A name `x` binds independently to:
//! - the machine method registered as `x`, and
//! - `delegate_x` on the delegate, or, when no delegate is set, the
//!   machine method registered as `delegate_x`.
//!
//! Both run when both exist, machine first.

mod delegate;
mod resolve;

pub use delegate::{delegate_name, Delegate, DelegateActions, DELEGATE_PREFIX};
pub(crate) use resolve::{Bound, Resolver};

use crate::machine::{Handle, Machine};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Error type returned by action bodies.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by action bodies.
pub type ActionResult = Result<(), ActionError>;

/// A callable action bound to a machine type.
pub type Handler<M> = Arc<dyn Fn(&M, &Call<'_, M>) -> ActionResult + Send + Sync>;

/// Body of a worker thread, invoked repeatedly until it returns
/// [`ThreadStep::Done`].
pub type ThreadHandler<M> =
    Arc<dyn Fn(&M, &Call<'_, M>) -> Result<ThreadStep, ActionError> + Send + Sync>;

/// What a worker thread does after one run of its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStep {
    /// Exit the thread.
    Done,
    /// Sleep, then run the body again.
    Wait(Duration),
}

/// Everything an action can see while it runs.
pub struct Call<'a, M: Machine> {
    pub(crate) machine: &'a M,
    pub(crate) handle: &'a Handle<M>,
    pub(crate) state: &'a M::State,
    pub(crate) input: Option<&'a M::Input>,
    pub(crate) args: &'a [M::Arg],
}

impl<'a, M: Machine> Clone for Call<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: Machine> Copy for Call<'a, M> {}

impl<'a, M: Machine> Call<'a, M> {
    pub fn machine(&self) -> &'a M {
        self.machine
    }

    /// Non-owning handle for feeding inputs back into the machine.
    pub fn handle(&self) -> &'a Handle<M> {
        self.handle
    }

    /// State the machine was in when the action started.
    pub fn state(&self) -> &'a M::State {
        self.state
    }

    /// Input being dispatched; `None` for timer pops and worker threads.
    pub fn input(&self) -> Option<&'a M::Input> {
        self.input
    }

    pub fn args(&self) -> &'a [M::Arg] {
        self.args
    }

    pub(crate) fn with_args<'b>(&self, args: &'b [M::Arg]) -> Call<'b, M>
    where
        'a: 'b,
    {
        Call {
            machine: self.machine,
            handle: self.handle,
            state: self.state,
            input: self.input,
            args,
        }
    }
}

/// Declared action(s) of a transition, timer or state entry.
pub enum ActionSpec<M: Machine> {
    None,
    Named(Cow<'static, str>),
    /// A name called with `args` ahead of the hit's own arguments.
    Partial {
        name: Cow<'static, str>,
        args: Vec<M::Arg>,
    },
    Callable(Handler<M>),
    List(Vec<ActionSpec<M>>),
}

impl<M: Machine> ActionSpec<M> {
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Named(name.into())
    }

    pub fn partial(name: impl Into<Cow<'static, str>>, args: Vec<M::Arg>) -> Self {
        Self::Partial {
            name: name.into(),
            args,
        }
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&M, &Call<'_, M>) -> ActionResult + Send + Sync + 'static,
    {
        Self::Callable(Arc::new(f))
    }

    /// An action that feeds `input` back into the machine.
    ///
    /// Inside a running dispatch the input is queued and processed after
    /// the current transition completes.
    pub fn hit(input: M::Input) -> Self {
        Self::callable(move |_, call| {
            call.handle().hit(input.clone())?;
            Ok(())
        })
    }

    pub fn list(actions: impl IntoIterator<Item = ActionSpec<M>>) -> Self {
        Self::List(actions.into_iter().collect())
    }

    pub fn is_none(&self) -> bool {
        match self {
            Self::None => true,
            Self::List(items) => items.iter().all(Self::is_none),
            _ => false,
        }
    }
}

impl<M: Machine> Clone for ActionSpec<M> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Named(name) => Self::Named(name.clone()),
            Self::Partial { name, args } => Self::Partial {
                name: name.clone(),
                args: args.clone(),
            },
            Self::Callable(handler) => Self::Callable(Arc::clone(handler)),
            Self::List(items) => Self::List(items.clone()),
        }
    }
}

impl<M: Machine> Default for ActionSpec<M> {
    fn default() -> Self {
        Self::None
    }
}

impl<M: Machine> From<&'static str> for ActionSpec<M> {
    fn from(name: &'static str) -> Self {
        Self::named(name)
    }
}

impl<M: Machine> From<String> for ActionSpec<M> {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl<M: Machine> From<Vec<ActionSpec<M>>> for ActionSpec<M> {
    fn from(items: Vec<ActionSpec<M>>) -> Self {
        Self::List(items)
    }
}

impl<M: Machine> fmt::Debug for ActionSpec<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Partial { name, args } => f
                .debug_struct("Partial")
                .field("name", name)
                .field("args", args)
                .finish(),
            Self::Callable(_) => f.write_str("Callable(..)"),
            Self::List(items) => f.debug_list().entries(items).finish(),
        }
    }
}

/// Named methods of a machine type, looked up when actions are bound.
pub struct ActionRegistry<M: Machine> {
    actions: HashMap<String, Handler<M>>,
    threads: HashMap<String, ThreadHandler<M>>,
}

impl<M: Machine> ActionRegistry<M> {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            threads: HashMap::new(),
        }
    }

    /// Register an action method. A later registration replaces an
    /// earlier one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&M, &Call<'_, M>) -> ActionResult + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
    }

    /// Register a worker thread body.
    pub fn register_thread<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&M, &Call<'_, M>) -> Result<ThreadStep, ActionError> + Send + Sync + 'static,
    {
        self.threads.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&Handler<M>> {
        self.actions.get(name)
    }

    pub fn thread(&self, name: &str) -> Option<&ThreadHandler<M>> {
        self.threads.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn has_thread(&self, name: &str) -> bool {
        self.threads.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<M: Machine> Clone for ActionRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
            threads: self.threads.clone(),
        }
    }
}

impl<M: Machine> Default for ActionRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Machine> fmt::Debug for ActionRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<_> = self.actions.keys().collect();
        actions.sort();
        let mut threads: Vec<_> = self.threads.keys().collect();
        threads.sort();
        f.debug_struct("ActionRegistry")
            .field("actions", &actions)
            .field("threads", &threads)
            .finish()
    }
}
