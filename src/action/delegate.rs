//! Delegates: external owners notified alongside a machine's own actions.

use super::{ActionResult, Call};
use crate::machine::Machine;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Prefix that turns an action name into its delegate method name.
pub const DELEGATE_PREFIX: &str = "delegate_";

/// The delegate method name for `action`.
///
/// ```rust
/// assert_eq!(sip_fsm::action::delegate_name("timeout"), "delegate_timeout");
/// ```
pub fn delegate_name(action: &str) -> String {
    format!("{DELEGATE_PREFIX}{action}")
}

/// An object that wants to hear about a machine's actions.
///
/// A machine holds its delegate weakly; once the delegate is dropped its
/// bound methods are skipped.
pub trait Delegate<M: Machine>: Send + Sync {
    /// Whether this delegate implements `method` (a `delegate_` name).
    fn responds_to(&self, method: &str) -> bool;

    /// Run `method`. Only called for names `responds_to` accepted.
    fn perform(&self, method: &str, call: &Call<'_, M>) -> ActionResult;
}

type DelegateFn<M> = Arc<dyn Fn(&Call<'_, M>) -> ActionResult + Send + Sync>;

/// A [`Delegate`] assembled from closures.
///
/// # Example
///
/// ```rust,ignore
/// let owner = Arc::new(
///     DelegateActions::new()
///         .on("delegate_response", |call| {
///             println!("response in {:?}", call.state());
///             Ok(())
///         }),
/// );
/// ```
pub struct DelegateActions<M: Machine> {
    methods: HashMap<String, DelegateFn<M>>,
}

impl<M: Machine> DelegateActions<M> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Add a method under its full (`delegate_` prefixed) name.
    pub fn on<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Call<'_, M>) -> ActionResult + Send + Sync + 'static,
    {
        self.methods.insert(method.into(), Arc::new(f));
        self
    }
}

impl<M: Machine> Default for DelegateActions<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Machine> Delegate<M> for DelegateActions<M> {
    fn responds_to(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn perform(&self, method: &str, call: &Call<'_, M>) -> ActionResult {
        match self.methods.get(method) {
            Some(f) => f(call),
            None => Ok(()),
        }
    }
}

impl<M: Machine> fmt::Debug for DelegateActions<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("DelegateActions")
            .field("methods", &names)
            .finish()
    }
}
