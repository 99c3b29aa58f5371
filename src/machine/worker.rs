//! Worker threads started by transitions.
//!
//! A worker repeatedly runs its thread method until the method returns
//! [`ThreadStep::Done`], fails, or the machine goes away. Finished workers
//! never join anything: they post their thread id to the retirement queue,
//! which the machine drains from its dispatch and timer paths.

use super::inner::Inner;
use super::Machine;
use crate::action::{Call, ThreadHandler, ThreadStep};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Cooperative stop flag with an interruptible sleep.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Signal {
    pub(crate) fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `duration` unless stopped first. Returns `false` if stopped.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        !*stopped
    }
}

struct Worker {
    handle: JoinHandle<()>,
    signal: Arc<Signal>,
}

/// The running workers of one machine and its retirement queue.
#[derive(Default)]
pub(crate) struct Workers {
    running: Mutex<HashMap<String, Worker>>,
    retired: Arc<Mutex<Vec<ThreadId>>>,
}

impl Workers {
    /// Start worker `name` unless a worker of that name is still running.
    pub(crate) fn spawn<M: Machine>(
        &self,
        this: Weak<Inner<M>>,
        machine: Uuid,
        name: &str,
        body: ThreadHandler<M>,
    ) {
        let mut running = self.running.lock();
        if let Some(worker) = running.get(name) {
            if !worker.handle.is_finished() {
                debug!(%machine, worker = name, "worker already running");
                return;
            }
        }
        if let Some(stale) = running.remove(name) {
            let _ = stale.handle.join();
        }

        let signal = Arc::new(Signal::default());
        let retired = Arc::clone(&self.retired);
        let stop = Arc::clone(&signal);
        let worker = name.to_string();
        let spawned = thread::Builder::new()
            .name(format!("fsm-{name}"))
            .spawn(move || {
                run(&this, machine, &worker, &body, &stop);
                retired.lock().push(thread::current().id());
            });

        match spawned {
            Ok(handle) => {
                debug!(%machine, worker = name, "worker started");
                running.insert(name.to_string(), Worker { handle, signal });
            }
            Err(err) => warn!(%machine, worker = name, error = %err, "failed to spawn worker"),
        }
    }

    /// Join workers that have retired. Does nothing on a worker thread.
    pub(crate) fn reap(&self) {
        if self.on_worker_thread() {
            return;
        }
        let retired = std::mem::take(&mut *self.retired.lock());
        if retired.is_empty() {
            return;
        }
        let finished: Vec<(String, Worker)> = {
            let mut running = self.running.lock();
            let names: Vec<String> = running
                .iter()
                .filter(|(_, worker)| retired.contains(&worker.handle.thread().id()))
                .map(|(name, _)| name.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|name| running.remove(&name).map(|worker| (name, worker)))
                .collect()
        };
        for (name, worker) in finished {
            if worker.handle.join().is_err() {
                warn!(worker = %name, "worker thread panicked");
            } else {
                debug!(worker = %name, "worker reaped");
            }
        }
    }

    /// Signal every worker to stop and join them.
    pub(crate) fn stop_all(&self) {
        let workers: Vec<(String, Worker)> = self.running.lock().drain().collect();
        for (_, worker) in &workers {
            worker.signal.stop();
        }
        let me = thread::current().id();
        for (name, worker) in workers {
            if worker.handle.thread().id() == me {
                continue;
            }
            if worker.handle.join().is_err() {
                warn!(worker = %name, "worker thread panicked");
            }
        }
        self.retired.lock().clear();
    }

    pub(crate) fn is_running(&self, name: &str) -> bool {
        self.running
            .lock()
            .get(name)
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.running.lock().is_empty()
    }

    fn on_worker_thread(&self) -> bool {
        let me = thread::current().id();
        self.running
            .lock()
            .values()
            .any(|worker| worker.handle.thread().id() == me)
    }
}

fn run<M: Machine>(
    this: &Weak<Inner<M>>,
    machine: Uuid,
    name: &str,
    body: &ThreadHandler<M>,
    signal: &Signal,
) {
    loop {
        if signal.is_stopped() {
            break;
        }
        let Some(inner) = this.upgrade() else {
            debug!(%machine, worker = name, "machine released, worker exiting");
            break;
        };
        let step = panic::catch_unwind(AssertUnwindSafe(|| {
            let state = inner.state();
            let handle = inner.handle();
            let call = Call {
                machine: &inner.machine,
                handle: &handle,
                state: &state,
                input: None,
                args: &[],
            };
            body(&inner.machine, &call)
        }));
        drop(inner);

        match step {
            Ok(Ok(ThreadStep::Done)) => break,
            Ok(Ok(ThreadStep::Wait(wait))) => {
                if !signal.sleep(wait) {
                    break;
                }
            }
            Ok(Err(err)) => {
                warn!(%machine, worker = name, error = %err, "worker failed");
                break;
            }
            Err(_) => {
                warn!(%machine, worker = name, "worker panicked");
                break;
            }
        }
    }
    debug!(%machine, worker = name, "worker exiting");
}
