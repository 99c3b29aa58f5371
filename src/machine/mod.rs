//! State machine instances.
//!
//! A [`StateMachine`] is one running instance of a [`Template`]: it owns
//! the current state, a FIFO input queue, private copies of the template's
//! timers and, in [`Mode::Async`], a [`Scheduler`] thread.
//!
//! Inputs are processed one at a time under the instance lock. An input
//! submitted from inside a running action is queued and processed after
//! the current one finishes, never recursively.
//!
//! # Example
//!
//! ```rust
//! use sip_fsm::builder::{Template, TransitionBuilder};
//! use sip_fsm::machine::{FsmError, Machine, StateMachine};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Registration {
//!     attempts: AtomicUsize,
//! }
//!
//! impl Machine for Registration {
//!     type State = &'static str;
//!     type Input = &'static str;
//!     type Arg = ();
//! }
//!
//! let template = Arc::new(
//!     Template::<Registration>::builder("registration")
//!         .initial("idle")
//!         .method("send_register", |m, _| {
//!             m.attempts.fetch_add(1, Ordering::SeqCst);
//!             Ok(())
//!         })
//!         .transition(TransitionBuilder::new().from("idle").on("register").to("pending").action("send_register"))
//!         .unwrap()
//!         .transition(TransitionBuilder::new().from("pending").on("ok").to("registered"))
//!         .unwrap()
//!         .build()
//!         .unwrap(),
//! );
//!
//! let mut machine = StateMachine::new(template, Registration::default()).unwrap();
//! machine.hit("register").unwrap();
//! assert_eq!(machine.state(), "pending");
//! assert!(matches!(machine.hit("register"), Err(FsmError::UnexpectedInput { .. })));
//! assert_eq!(machine.machine().attempts.load(Ordering::SeqCst), 1);
//! machine.shutdown().unwrap();
//! ```

mod config;
mod error;
mod handle;
mod inner;
mod worker;

pub use config::{MachineConfig, Mode};
pub use error::FsmError;
pub use handle::Handle;

use crate::action::{ActionError, ActionSpec, Delegate, Resolver};
use crate::builder::{Template, Transition};
use crate::core::{Input, MonotonicClock, SharedClock, State, StateHistory};
use crate::scheduler::Scheduler;
use crate::timer::BackoffPolicy;
use inner::{Bindings, Inner};
use std::fmt::{self, Debug};
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// The user context a machine type is built around.
///
/// Action methods receive `&Self`, so any state they mutate needs interior
/// mutability.
pub trait Machine: Send + Sync + Sized + 'static {
    type State: State;
    type Input: Input;
    /// Per-hit argument passed to actions.
    type Arg: Clone + Debug + Send + Sync + 'static;
}

/// A running machine instance.
///
/// Call [`shutdown`](Self::shutdown) before dropping an asynchronous
/// machine; dropping performs the same teardown but logs a warning.
pub struct StateMachine<M: Machine> {
    inner: Arc<Inner<M>>,
    scheduler: Option<Scheduler>,
    shut_down: bool,
}

impl<M: Machine> StateMachine<M> {
    /// A synchronous machine with default configuration.
    pub fn new(template: Arc<Template<M>>, machine: M) -> Result<Self, FsmError> {
        Self::builder(template, machine).build()
    }

    pub fn builder(template: Arc<Template<M>>, machine: M) -> MachineBuilder<M> {
        MachineBuilder::new(template, machine)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn machine(&self) -> &M {
        &self.inner.machine
    }

    pub fn template(&self) -> &Template<M> {
        &self.inner.template
    }

    pub fn state(&self) -> M::State {
        self.inner.state()
    }

    pub fn handle(&self) -> Handle<M> {
        self.inner.handle()
    }

    /// Submit `input` and process it, together with anything its actions
    /// queue, before returning.
    ///
    /// # Errors
    ///
    /// [`FsmError::UnexpectedInput`] if the current state has no transition
    /// for `input`; [`FsmError::ActionFailed`] if an action fails, in which
    /// case the state is left unchanged.
    pub fn hit(&self, input: M::Input) -> Result<(), FsmError> {
        self.inner.hit(input, Vec::new())
    }

    /// Like [`hit`](Self::hit), passing `args` to every action.
    pub fn hit_with(&self, input: M::Input, args: Vec<M::Arg>) -> Result<(), FsmError> {
        self.inner.hit(input, args)
    }

    /// Pop every due timer. Returns the number of pops.
    ///
    /// Synchronous machines must call this periodically.
    pub fn check_timers(&self) -> Result<usize, FsmError> {
        self.inner.check_timers()
    }

    /// Add a transition to this instance only.
    pub fn add_transition(&self, transition: Transition<M>) -> Result<(), FsmError> {
        self.inner.add_transition(transition)
    }

    /// Add a timer to this instance only.
    pub fn add_timer(
        &self,
        name: impl Into<String>,
        policy: BackoffPolicy,
        action: impl Into<ActionSpec<M>>,
    ) -> Result<(), FsmError> {
        self.inner.add_timer(name.into(), policy, action.into())
    }

    pub fn timer_running(&self, name: &str) -> Result<bool, FsmError> {
        self.inner.timer_running(name)
    }

    pub fn timer_names(&self) -> Result<Vec<String>, FsmError> {
        self.inner.timer_names()
    }

    pub fn worker_running(&self, name: &str) -> bool {
        self.inner.workers.is_running(name)
    }

    pub fn history(&self) -> StateHistory<M::State> {
        self.inner.history()
    }

    /// Block until `predicate` holds for the current state, or fail with
    /// [`FsmError::Timeout`].
    pub fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Result<M::State, FsmError>
    where
        F: Fn(&M::State) -> bool,
    {
        self.inner.wait_for(predicate, timeout)
    }

    pub fn wait_for_state(&self, state: &M::State, timeout: Duration) -> Result<M::State, FsmError> {
        self.inner.wait_for(|current| current == state, timeout)
    }

    /// Multiplex `source` through this machine's scheduler thread.
    pub fn add_input_source<F>(&self, source: &impl AsRawFd, callback: F) -> Result<(), FsmError>
    where
        F: FnMut() -> Result<(), ActionError> + Send + 'static,
    {
        let scheduler = self.inner.scheduler.as_ref().ok_or(FsmError::NotAsync)?;
        scheduler.add_input_source(source, callback)?;
        Ok(())
    }

    pub fn remove_input_source(&self, source: &impl AsRawFd) -> Result<bool, FsmError> {
        let scheduler = self.inner.scheduler.as_ref().ok_or(FsmError::NotAsync)?;
        Ok(scheduler.remove_input_source(source))
    }

    /// Stop the scheduler thread, the workers and every timer.
    ///
    /// Idempotent. Fails with [`FsmError::LockReentered`] when called from
    /// inside one of this machine's actions.
    pub fn shutdown(&mut self) -> Result<(), FsmError> {
        if self.shut_down {
            return Ok(());
        }
        self.inner.ensure_unlocked()?;
        self.teardown();
        self.inner.stop_timers()?;
        self.shut_down = true;
        debug!(machine = %self.inner.id, "machine shut down");
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn teardown(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
        self.inner.workers.stop_all();
    }
}

impl<M: Machine> Drop for StateMachine<M> {
    fn drop(&mut self) {
        if self.shut_down {
            return;
        }
        if self.scheduler.is_some() || !self.inner.workers.is_empty() {
            warn!(machine = %self.inner.id, "machine dropped without shutdown");
        }
        self.teardown();
    }
}

impl<M: Machine> fmt::Debug for StateMachine<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("id", &self.inner.id)
            .field("template", &self.inner.template.name())
            .field("mode", &self.inner.mode)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for machine instances.
pub struct MachineBuilder<M: Machine> {
    template: Arc<Template<M>>,
    machine: M,
    config: MachineConfig,
    clock: Option<SharedClock>,
    delegate: Option<Weak<dyn Delegate<M>>>,
}

impl<M: Machine> MachineBuilder<M> {
    pub fn new(template: Arc<Template<M>>, machine: M) -> Self {
        Self {
            template,
            machine,
            config: MachineConfig::default(),
            clock: None,
            delegate: None,
        }
    }

    pub fn config(mut self, config: MachineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Time source for timers. Defaults to a [`MonotonicClock`].
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Notify `delegate` alongside the machine's own actions.
    ///
    /// The machine only keeps a weak reference.
    pub fn delegate<D>(mut self, delegate: &Arc<D>) -> Self
    where
        D: Delegate<M> + 'static,
    {
        let weak: Weak<D> = Arc::downgrade(delegate);
        self.delegate = Some(weak as Weak<dyn Delegate<M>>);
        self
    }

    /// Resolve every action and start the scheduler in async mode.
    pub fn build(self) -> Result<StateMachine<M>, FsmError> {
        let clock = self.clock.unwrap_or_else(MonotonicClock::shared);
        let bindings = {
            let resolver = Resolver::new(self.template.registry(), self.delegate.as_ref());
            Bindings::resolve(&self.template, &resolver)?
        };

        let mut scheduler = match self.config.mode {
            Mode::Sync => None,
            Mode::Async => Some(Scheduler::new(
                self.config.scheduler.clone(),
                Arc::clone(&clock),
            )?),
        };

        let inner = Inner::new(
            self.template,
            self.machine,
            self.delegate,
            clock,
            &self.config,
            bindings,
            scheduler.as_ref().map(Scheduler::handle),
        );

        if let Some(scheduler) = scheduler.as_mut() {
            let owner = Arc::downgrade(&inner);
            let machine = Weak::clone(&owner);
            scheduler.start(owner, move || match machine.upgrade() {
                Some(inner) => inner
                    .check_timers()
                    .map(|_| ())
                    .map_err(ActionError::from),
                None => Ok(()),
            })?;
        }

        debug!(
            machine = %inner.id,
            template = inner.template.name(),
            mode = ?inner.mode,
            "machine created"
        );
        Ok(StateMachine {
            inner,
            scheduler,
            shut_down: false,
        })
    }
}

impl<M: Machine> fmt::Debug for MachineBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineBuilder")
            .field("template", &self.template.name())
            .field("config", &self.config)
            .field("delegate", &self.delegate.is_some())
            .finish()
    }
}
