//! Binding declared actions to concrete calls.

use super::{delegate_name, ActionRegistry, ActionResult, ActionSpec, Call, Delegate, Handler};
use crate::machine::{FsmError, Machine};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Where the delegate half of a named action goes.
pub(crate) enum DelegateTarget<M: Machine> {
    External {
        object: Weak<dyn Delegate<M>>,
        method: String,
    },
    /// No delegate is set; the machine's own `delegate_` method.
    Local(Handler<M>),
}

/// A resolved action, ready to run without further lookups.
pub(crate) enum Bound<M: Machine> {
    Direct {
        handler: Handler<M>,
        args: Vec<M::Arg>,
    },
    Named {
        name: String,
        own: Option<Handler<M>>,
        delegate: Option<DelegateTarget<M>>,
        args: Vec<M::Arg>,
    },
}

impl<M: Machine> Bound<M> {
    pub(crate) fn label(&self) -> &str {
        match self {
            Self::Direct { .. } => "<callable>",
            Self::Named { name, .. } => name,
        }
    }

    pub(crate) fn invoke(&self, call: &Call<'_, M>) -> ActionResult {
        let (args, own, delegate) = match self {
            Self::Direct { handler, args } => (args, Some(handler), None),
            Self::Named {
                own,
                delegate,
                args,
                ..
            } => (args, own.as_ref(), delegate.as_ref()),
        };

        let joined;
        let call = if args.is_empty() {
            *call
        } else {
            joined = args
                .iter()
                .chain(call.args.iter())
                .cloned()
                .collect::<Vec<_>>();
            call.with_args(&joined)
        };

        if let Some(handler) = own {
            handler(call.machine, &call)?;
        }
        match delegate {
            Some(DelegateTarget::Local(handler)) => handler(call.machine, &call),
            Some(DelegateTarget::External { object, method }) => match object.upgrade() {
                Some(object) => object.perform(method, &call),
                None => {
                    debug!(method = %method, "delegate released, skipping");
                    Ok(())
                }
            },
            None => Ok(()),
        }
    }
}

/// Resolves [`ActionSpec`]s against a registry and an optional delegate.
pub(crate) struct Resolver<'a, M: Machine> {
    registry: &'a ActionRegistry<M>,
    delegate: Option<&'a Weak<dyn Delegate<M>>>,
}

impl<'a, M: Machine> Resolver<'a, M> {
    pub(crate) fn new(
        registry: &'a ActionRegistry<M>,
        delegate: Option<&'a Weak<dyn Delegate<M>>>,
    ) -> Self {
        Self { registry, delegate }
    }

    /// Flatten `spec` into an ordered list of bound actions.
    pub(crate) fn bind(&self, spec: &ActionSpec<M>) -> Result<Vec<Bound<M>>, FsmError> {
        let mut bound = Vec::new();
        self.bind_into(spec, &mut bound)?;
        Ok(bound)
    }

    fn bind_into(&self, spec: &ActionSpec<M>, out: &mut Vec<Bound<M>>) -> Result<(), FsmError> {
        match spec {
            ActionSpec::None => {}
            ActionSpec::Callable(handler) => out.push(Bound::Direct {
                handler: Arc::clone(handler),
                args: Vec::new(),
            }),
            ActionSpec::Named(name) => out.push(self.bind_name(name, Vec::new())?),
            ActionSpec::Partial { name, args } => out.push(self.bind_name(name, args.clone())?),
            ActionSpec::List(items) => {
                for item in items {
                    self.bind_into(item, out)?;
                }
            }
        }
        Ok(())
    }

    fn bind_name(&self, name: &str, args: Vec<M::Arg>) -> Result<Bound<M>, FsmError> {
        let own = self.registry.get(name).cloned();
        let method = delegate_name(name);
        let delegate = match self.delegate {
            Some(weak) => weak
                .upgrade()
                .filter(|object| object.responds_to(&method))
                .map(|_| DelegateTarget::External {
                    object: weak.clone(),
                    method,
                }),
            None => self
                .registry
                .get(&method)
                .cloned()
                .map(DelegateTarget::Local),
        };

        if own.is_none() && delegate.is_none() {
            return Err(FsmError::UnresolvedAction {
                name: name.to_string(),
            });
        }
        Ok(Bound::Named {
            name: name.to_string(),
            own,
            delegate,
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DelegateActions;
    use crate::machine::Handle;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Machine for Recorder {
        type State = &'static str;
        type Input = &'static str;
        type Arg = i32;
    }

    fn registry() -> ActionRegistry<Recorder> {
        let mut registry = ActionRegistry::new();
        registry.register("ack", |m: &Recorder, call: &Call<'_, Recorder>| {
            m.log.lock().push(format!("ack{:?}", call.args()));
            Ok(())
        });
        registry.register("delegate_ack", |m: &Recorder, _call: &Call<'_, Recorder>| {
            m.log.lock().push("local delegate_ack".to_string());
            Ok(())
        });
        registry.register("delegate_only", |m: &Recorder, _call: &Call<'_, Recorder>| {
            m.log.lock().push("local delegate_only".to_string());
            Ok(())
        });
        registry
    }

    fn run(bound: &[Bound<Recorder>], machine: &Recorder, args: &[i32]) {
        let handle = Handle::detached();
        let call = Call {
            machine,
            handle: &handle,
            state: &"idle",
            input: Some(&"go"),
            args,
        };
        for action in bound {
            action.invoke(&call).unwrap();
        }
    }

    #[test]
    fn name_binds_own_and_local_delegate_method() {
        let registry = registry();
        let bound = Resolver::new(&registry, None)
            .bind(&ActionSpec::named("ack"))
            .unwrap();
        let machine = Recorder::default();

        run(&bound, &machine, &[]);

        assert_eq!(
            *machine.log.lock(),
            vec!["ack[]".to_string(), "local delegate_ack".to_string()]
        );
    }

    #[test]
    fn external_delegate_replaces_local_default() {
        let registry = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let delegate: Arc<dyn Delegate<Recorder>> = Arc::new(
            DelegateActions::new().on("delegate_ack", move |call: &Call<'_, Recorder>| {
                sink.lock().push(call.args().to_vec());
                Ok(())
            }),
        );
        let weak = Arc::downgrade(&delegate);

        let bound = Resolver::new(&registry, Some(&weak))
            .bind(&ActionSpec::partial("ack", vec![1]))
            .unwrap();
        let machine = Recorder::default();
        run(&bound, &machine, &[2, 3]);

        assert_eq!(*machine.log.lock(), vec!["ack[1, 2, 3]".to_string()]);
        assert_eq!(*seen.lock(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn delegate_without_method_does_not_fall_back() {
        let registry = registry();
        let delegate: Arc<dyn Delegate<Recorder>> = Arc::new(DelegateActions::new());
        let weak = Arc::downgrade(&delegate);

        let result = Resolver::new(&registry, Some(&weak)).bind(&ActionSpec::named("only"));

        assert!(matches!(result, Err(FsmError::UnresolvedAction { name }) if name == "only"));
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = registry();
        let result = Resolver::new(&registry, None).bind(&ActionSpec::named("missing"));

        assert!(matches!(result, Err(FsmError::UnresolvedAction { .. })));
    }

    #[test]
    fn lists_flatten_in_order() {
        let registry = registry();
        let spec = ActionSpec::list([
            ActionSpec::named("only"),
            ActionSpec::None,
            ActionSpec::callable(|m: &Recorder, _call: &Call<'_, Recorder>| {
                m.log.lock().push("callable".to_string());
                Ok(())
            }),
        ]);
        let bound = Resolver::new(&registry, None).bind(&spec).unwrap();
        let machine = Recorder::default();
        run(&bound, &machine, &[]);

        assert_eq!(bound.len(), 2);
        assert_eq!(
            *machine.log.lock(),
            vec!["local delegate_only".to_string(), "callable".to_string()]
        );
    }

    #[test]
    fn released_delegate_is_skipped() {
        let registry = registry();
        let delegate: Arc<dyn Delegate<Recorder>> =
            Arc::new(DelegateActions::new().on("delegate_ack", |_call: &Call<'_, Recorder>| {
                Err("should not run".into())
            }));
        let weak = Arc::downgrade(&delegate);
        let bound = Resolver::new(&registry, Some(&weak))
            .bind(&ActionSpec::named("ack"))
            .unwrap();
        drop(delegate);

        let machine = Recorder::default();
        run(&bound, &machine, &[]);
        assert_eq!(*machine.log.lock(), vec!["ack[]".to_string()]);
    }
}
