//! Shared machine state and the dispatch algorithm.
//!
//! Everything that mutates a machine runs inside a [`Session`]: the
//! instance lock plus a record of which thread holds it. That record is
//! what turns a same-thread `hit` into a deferred queue entry and any other
//! same-thread acquisition into [`FsmError::LockReentered`].

use super::worker::Workers;
use super::{FsmError, Handle, Machine, MachineConfig, Mode};
use crate::action::{Bound, Call, Delegate, Resolver, ThreadHandler};
use crate::builder::{BuildError, Template, Transition};
use crate::core::{Input, SharedClock, State, StateHistory, StateTransition};
use crate::scheduler::SchedulerHandle;
use crate::timer::{BackoffPolicy, Timer, TimerError};
use chrono::Utc;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// A transition with its actions and worker methods already resolved.
pub(crate) struct BoundTransition<M: Machine> {
    to: M::State,
    actions: Vec<Bound<M>>,
    stop_timers: Vec<String>,
    start_timers: Vec<String>,
    threads: Vec<BoundThread<M>>,
}

struct BoundThread<M: Machine> {
    name: String,
    body: ThreadHandler<M>,
}

type TransitionKey<M> = (<M as Machine>::State, <M as Machine>::Input);

/// A template resolved against one instance's delegate.
pub(crate) struct Bindings<M: Machine> {
    transitions: HashMap<TransitionKey<M>, Arc<BoundTransition<M>>>,
    entry: HashMap<M::State, Arc<Vec<Bound<M>>>>,
    timers: Vec<(String, BackoffPolicy, Vec<Bound<M>>)>,
}

impl<M: Machine> Bindings<M> {
    pub(crate) fn resolve(template: &Template<M>, resolver: &Resolver<'_, M>) -> Result<Self, FsmError> {
        let mut transitions = HashMap::new();
        for transition in template.transitions() {
            let key = (transition.from.clone(), transition.input.clone());
            transitions.insert(key, Arc::new(bind_transition(template, resolver, transition)?));
        }

        let mut entry = HashMap::new();
        for (state, spec) in template.entry_actions() {
            entry.insert(state.clone(), Arc::new(resolver.bind(spec)?));
        }

        let mut timers = Vec::new();
        for spec in template.timers() {
            timers.push((spec.name.clone(), spec.policy.clone(), resolver.bind(&spec.action)?));
        }

        Ok(Self {
            transitions,
            entry,
            timers,
        })
    }
}

fn bind_transition<M: Machine>(
    template: &Template<M>,
    resolver: &Resolver<'_, M>,
    transition: &Transition<M>,
) -> Result<BoundTransition<M>, FsmError> {
    let mut threads = Vec::new();
    for spec in &transition.threads {
        let body = template
            .registry()
            .thread(&spec.method)
            .cloned()
            .ok_or_else(|| BuildError::UnknownThreadMethod {
                name: spec.method.clone(),
            })?;
        threads.push(BoundThread {
            name: spec.name.clone(),
            body,
        });
    }
    Ok(BoundTransition {
        to: transition.to.clone(),
        actions: resolver.bind(&transition.actions)?,
        stop_timers: transition.stop_timers.clone(),
        start_timers: transition.start_timers.clone(),
        threads,
    })
}

struct Pending<M: Machine> {
    input: M::Input,
    args: Vec<M::Arg>,
}

/// State guarded by the instance lock.
struct Core<M: Machine> {
    state: M::State,
    transitions: HashMap<TransitionKey<M>, Arc<BoundTransition<M>>>,
    entry: HashMap<M::State, Arc<Vec<Bound<M>>>>,
    timers: BTreeMap<String, Timer>,
    committed: usize,
}

/// Exclusive access to a machine's core.
struct Session<'a, M: Machine> {
    inner: &'a Inner<M>,
    core: MutexGuard<'a, Core<M>>,
}

impl<M: Machine> Drop for Session<'_, M> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.inner.queue.lock().clear();
        }
        *self.inner.holder.lock() = None;
    }
}

pub(crate) struct Inner<M: Machine> {
    pub(crate) id: Uuid,
    pub(crate) template: Arc<Template<M>>,
    pub(crate) machine: M,
    pub(crate) mode: Mode,
    delegate: Option<Weak<dyn Delegate<M>>>,
    clock: SharedClock,
    this: Weak<Inner<M>>,
    core: Mutex<Core<M>>,
    holder: Mutex<Option<ThreadId>>,
    queue: Mutex<VecDeque<Pending<M>>>,
    observed: Mutex<M::State>,
    changed: Condvar,
    history: Mutex<StateHistory<M::State>>,
    pub(crate) scheduler: Option<SchedulerHandle>,
    pub(crate) workers: Workers,
}

impl<M: Machine> Inner<M> {
    pub(crate) fn new(
        template: Arc<Template<M>>,
        machine: M,
        delegate: Option<Weak<dyn Delegate<M>>>,
        clock: SharedClock,
        config: &MachineConfig,
        bindings: Bindings<M>,
        scheduler: Option<SchedulerHandle>,
    ) -> Arc<Self> {
        let initial = template.initial().clone();
        let Bindings {
            transitions,
            entry,
            timers,
        } = bindings;

        Arc::new_cyclic(|this| {
            let timers = timers
                .into_iter()
                .map(|(name, policy, actions)| {
                    let timer = Timer::new(name.clone(), policy, timer_action(Weak::clone(this), actions));
                    (name, timer)
                })
                .collect();

            Inner {
                id: Uuid::new_v4(),
                template,
                machine,
                mode: config.mode,
                delegate,
                clock,
                this: Weak::clone(this),
                core: Mutex::new(Core {
                    state: initial.clone(),
                    transitions,
                    entry,
                    timers,
                    committed: 0,
                }),
                holder: Mutex::new(None),
                queue: Mutex::new(VecDeque::new()),
                observed: Mutex::new(initial),
                changed: Condvar::new(),
                history: Mutex::new(StateHistory::with_limit(config.history_limit)),
                scheduler,
                workers: Workers::default(),
            }
        })
    }

    pub(crate) fn handle(&self) -> Handle<M> {
        Handle::new(Weak::clone(&self.this))
    }

    pub(crate) fn state(&self) -> M::State {
        self.observed.lock().clone()
    }

    pub(crate) fn history(&self) -> StateHistory<M::State> {
        self.history.lock().clone()
    }

    fn holds_lock(&self) -> bool {
        *self.holder.lock() == Some(thread::current().id())
    }

    fn enter(&self) -> Result<Session<'_, M>, FsmError> {
        if self.holds_lock() {
            return Err(FsmError::LockReentered { machine: self.id });
        }
        let core = self.core.lock();
        *self.holder.lock() = Some(thread::current().id());
        Ok(Session { inner: self, core })
    }

    /// Queue `input` and, unless this thread is already dispatching, drain
    /// the queue.
    pub(crate) fn hit(&self, input: M::Input, args: Vec<M::Arg>) -> Result<(), FsmError> {
        if self.holds_lock() {
            debug!(machine = %self.id, input = input.name(), "deferring re-entrant input");
            self.queue.lock().push_back(Pending { input, args });
            return Ok(());
        }
        let mut session = self.enter()?;
        self.queue.lock().push_back(Pending { input, args });
        self.drain(&mut session)
    }

    fn drain(&self, session: &mut Session<'_, M>) -> Result<(), FsmError> {
        loop {
            let Some(pending) = self.queue.lock().pop_front() else {
                break;
            };
            if let Err(err) = self.dispatch(&mut session.core, pending) {
                let dropped = {
                    let mut queue = self.queue.lock();
                    let dropped = queue.len();
                    queue.clear();
                    dropped
                };
                if dropped > 0 {
                    warn!(machine = %self.id, dropped, "discarding queued inputs after failed dispatch");
                }
                self.workers.reap();
                return Err(err);
            }
        }
        self.workers.reap();
        Ok(())
    }

    fn dispatch(&self, core: &mut Core<M>, pending: Pending<M>) -> Result<(), FsmError> {
        let Pending { input, args } = pending;
        let from = core.state.clone();

        let Some(transition) = core.transitions.get(&(from.clone(), input.clone())).cloned() else {
            return Err(FsmError::UnexpectedInput {
                state: from.name().to_string(),
                input: input.name().to_string(),
            });
        };

        for name in &transition.stop_timers {
            if let Some(timer) = core.timers.get_mut(name) {
                timer.stop();
            }
        }

        let handle = self.handle();
        let call = Call {
            machine: &self.machine,
            handle: &handle,
            state: &from,
            input: Some(&input),
            args: &args,
        };
        self.run_actions(&transition.actions, &call)?;

        let now = self.clock.now();
        for name in &transition.start_timers {
            if let Some(deadline) = core.timers.get_mut(name).and_then(|timer| timer.start(now)) {
                self.schedule(deadline);
            }
        }
        for thread in &transition.threads {
            self.workers
                .spawn(Weak::clone(&self.this), self.id, &thread.name, Arc::clone(&thread.body));
        }

        core.state = transition.to.clone();
        core.committed += 1;
        self.history.lock().record(StateTransition {
            from: from.clone(),
            to: transition.to.clone(),
            input: input.name().to_string(),
            timestamp: Utc::now(),
            attempt: core.committed,
        });
        self.publish(&transition.to);
        debug!(
            machine = %self.id,
            template = self.template.name(),
            from = from.name(),
            to = transition.to.name(),
            input = input.name(),
            "transition committed"
        );

        if let Some(entry) = core.entry.get(&transition.to).cloned() {
            let call = Call {
                machine: &self.machine,
                handle: &handle,
                state: &transition.to,
                input: Some(&input),
                args: &args,
            };
            self.run_actions(&entry, &call)?;
        }
        Ok(())
    }

    fn run_actions(&self, actions: &[Bound<M>], call: &Call<'_, M>) -> Result<(), FsmError> {
        for action in actions {
            if let Err(source) = action.invoke(call) {
                let state = call.state.name().to_string();
                let input = call.input.map(|input| input.name().to_string()).unwrap_or_default();
                error!(
                    machine = %self.id,
                    template = self.template.name(),
                    action = action.label(),
                    state = %state,
                    input = %input,
                    error = %source,
                    "action failed"
                );
                return Err(FsmError::ActionFailed {
                    action: action.label().to_string(),
                    state,
                    input,
                    source,
                });
            }
        }
        Ok(())
    }

    fn publish(&self, state: &M::State) {
        *self.observed.lock() = state.clone();
        self.changed.notify_all();
    }

    fn schedule(&self, deadline: Duration) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.add_retry_time(deadline);
        }
    }

    /// Pop due deadlines one at a time in deadline order, draining the
    /// inputs each pop queued before the next one fires.
    ///
    /// The first error, from a timer action or a drained input, is returned
    /// once every due deadline has been handled. Later ones are logged.
    pub(crate) fn check_timers(&self) -> Result<usize, FsmError> {
        let mut session = self.enter()?;
        let now = self.clock.now();

        let mut popped = 0;
        let mut first: Option<FsmError> = None;
        // Timers whose next wait is zero fire once per check.
        let mut spent = HashSet::new();
        loop {
            let next = session
                .core
                .timers
                .iter()
                .filter(|(name, _)| !spent.contains(*name))
                .filter_map(|(name, timer)| {
                    timer
                        .next_deadline()
                        .filter(|deadline| *deadline <= now)
                        .map(|deadline| (deadline, name.clone()))
                })
                .min();
            let Some((_, name)) = next else {
                break;
            };
            let Some(pop) = session.core.timers.get_mut(&name).and_then(|timer| timer.pop(now)) else {
                break;
            };
            popped += 1;
            if pop.zero_wait {
                spent.insert(name.clone());
            }

            if let Err(source) = pop.outcome {
                warn!(machine = %self.id, timer = %name, error = %source, "timer action failed");
                let err = FsmError::TimerFailed { timer: name, source };
                if first.is_none() {
                    first = Some(err);
                }
            }
            if let Err(err) = self.drain(&mut session) {
                if first.is_none() {
                    first = Some(err);
                } else {
                    warn!(machine = %self.id, error = %err, "queued input failed after an earlier timer check error");
                }
            }
        }
        if popped > 0 {
            debug!(machine = %self.id, popped, "timers popped");
        }

        if let Some(next) = session.core.timers.values().filter_map(Timer::next_deadline).min() {
            self.schedule(next);
        }
        drop(session);

        match first {
            Some(err) => Err(err),
            None => Ok(popped),
        }
    }

    /// Block until `predicate` holds for the current state.
    pub(crate) fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Result<M::State, FsmError>
    where
        F: Fn(&M::State) -> bool,
    {
        if self.holds_lock() {
            return Err(FsmError::LockReentered { machine: self.id });
        }
        let deadline = Instant::now() + timeout;
        let mut observed = self.observed.lock();
        loop {
            if predicate(&observed) {
                return Ok(observed.clone());
            }
            if self.changed.wait_until(&mut observed, deadline).timed_out() {
                return if predicate(&observed) {
                    Ok(observed.clone())
                } else {
                    Err(FsmError::Timeout { waited: timeout })
                };
            }
        }
    }

    pub(crate) fn add_transition(&self, transition: Transition<M>) -> Result<(), FsmError> {
        let mut session = self.enter()?;
        let core = &mut *session.core;

        let key = (transition.from.clone(), transition.input.clone());
        if core.transitions.contains_key(&key) {
            return Err(transition.duplicate_error().into());
        }
        transition.validate(|name| core.timers.contains_key(name), self.template.registry())?;

        let resolver = Resolver::new(self.template.registry(), self.delegate.as_ref());
        let bound = bind_transition(&self.template, &resolver, &transition)?;

        core.transitions.insert(key, Arc::new(bound));
        debug!(
            machine = %self.id,
            from = transition.from.name(),
            input = transition.input.name(),
            "transition added"
        );
        Ok(())
    }

    pub(crate) fn add_timer(
        &self,
        name: String,
        policy: BackoffPolicy,
        action: crate::action::ActionSpec<M>,
    ) -> Result<(), FsmError> {
        let mut session = self.enter()?;
        if session.core.timers.contains_key(&name) {
            return Err(BuildError::DuplicateTimer { name }.into());
        }
        let resolver = Resolver::new(self.template.registry(), self.delegate.as_ref());
        let actions = resolver.bind(&action)?;
        let timer = Timer::new(name.clone(), policy, timer_action(Weak::clone(&self.this), actions));
        session.core.timers.insert(name, timer);
        Ok(())
    }

    pub(crate) fn timer_running(&self, name: &str) -> Result<bool, FsmError> {
        let session = self.enter()?;
        session
            .core
            .timers
            .get(name)
            .map(Timer::is_running)
            .ok_or_else(|| TimerError::Unknown { name: name.to_string() }.into())
    }

    pub(crate) fn timer_names(&self) -> Result<Vec<String>, FsmError> {
        let session = self.enter()?;
        Ok(session.core.timers.keys().cloned().collect())
    }

    pub(crate) fn stop_timers(&self) -> Result<(), FsmError> {
        let mut session = self.enter()?;
        for timer in session.core.timers.values_mut() {
            timer.stop();
        }
        Ok(())
    }

    pub(crate) fn ensure_unlocked(&self) -> Result<(), FsmError> {
        if self.holds_lock() {
            return Err(FsmError::LockReentered { machine: self.id });
        }
        Ok(())
    }
}

/// Build the closure a timer runs on each pop.
///
/// It sees the machine through a weak reference, so a timer never keeps
/// its own machine alive.
fn timer_action<M: Machine>(
    this: Weak<Inner<M>>,
    actions: Vec<Bound<M>>,
) -> impl FnMut() -> Result<(), crate::action::ActionError> + Send + 'static {
    move || {
        let Some(inner) = this.upgrade() else {
            return Ok(());
        };
        let state = inner.state();
        let handle = inner.handle();
        let call = Call {
            machine: &inner.machine,
            handle: &handle,
            state: &state,
            input: None,
            args: &[],
        };
        for action in &actions {
            action.invoke(&call)?;
        }
        Ok(())
    }
}
