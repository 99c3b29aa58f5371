use super::inner::Inner;
use super::{FsmError, Machine};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Non-owning reference to a running machine.
///
/// Handles are what actions, timers, workers and input-source callbacks
/// use to feed inputs back in. They never keep the machine alive; once it
/// is dropped every call fails with [`FsmError::Detached`].
pub struct Handle<M: Machine> {
    inner: Weak<Inner<M>>,
}

impl<M: Machine> Handle<M> {
    pub(crate) fn new(inner: Weak<Inner<M>>) -> Self {
        Self { inner }
    }

    /// A handle attached to nothing.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    fn upgrade(&self) -> Result<Arc<Inner<M>>, FsmError> {
        self.inner.upgrade().ok_or(FsmError::Detached)
    }

    /// Submit `input`. From inside a running action this queues the input
    /// behind the current one and returns immediately.
    pub fn hit(&self, input: M::Input) -> Result<(), FsmError> {
        self.upgrade()?.hit(input, Vec::new())
    }

    pub fn hit_with(&self, input: M::Input, args: Vec<M::Arg>) -> Result<(), FsmError> {
        self.upgrade()?.hit(input, args)
    }

    pub fn state(&self) -> Result<M::State, FsmError> {
        Ok(self.upgrade()?.state())
    }

    pub fn check_timers(&self) -> Result<usize, FsmError> {
        self.upgrade()?.check_timers()
    }

    pub fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Result<M::State, FsmError>
    where
        F: Fn(&M::State) -> bool,
    {
        self.upgrade()?.wait_for(predicate, timeout)
    }

    pub fn wait_for_state(&self, state: &M::State, timeout: Duration) -> Result<M::State, FsmError> {
        self.wait_for(|current| current == state, timeout)
    }

    pub fn id(&self) -> Option<Uuid> {
        self.inner.upgrade().map(|inner| inner.id)
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<M: Machine> Clone for Handle<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<M: Machine> fmt::Debug for Handle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("machine", &self.id())
            .finish()
    }
}
