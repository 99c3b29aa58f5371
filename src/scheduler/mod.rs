//! Background retry scheduler.
//!
//! A [`Scheduler`] owns one background thread that blocks on the readiness
//! of registered input sources with a timeout equal to the time left until
//! the nearest registered deadline. When a source becomes readable its
//! callback runs; when any deadline is due the single retry callback runs.
//! The scheduler keeps no per-timer identity: the retry callback is
//! expected to re-check every timer of its owner.
//!
//! Every mutation through a [`SchedulerHandle`] wakes the blocked thread so
//! a freshly added near deadline is never stuck behind a stale timeout.
//!
//! # Example
//!
//! ```rust
//! use sip_fsm::core::MonotonicClock;
//! use sip_fsm::scheduler::{Scheduler, SchedulerConfig};
//! use std::sync::mpsc;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = MonotonicClock::shared();
//! let mut scheduler = Scheduler::new(SchedulerConfig::default(), Arc::clone(&clock)).unwrap();
//! let owner = Arc::new(());
//! let (tx, rx) = mpsc::channel();
//!
//! scheduler
//!     .start(Arc::downgrade(&owner), move || {
//!         let _ = tx.send(());
//!         Ok(())
//!     })
//!     .unwrap();
//! scheduler.handle().add_retry_time(clock.now() + Duration::from_millis(20));
//!
//! rx.recv_timeout(Duration::from_secs(2)).unwrap();
//! scheduler.shutdown();
//! ```

mod config;
mod error;
mod poll;

pub use config::SchedulerConfig;
pub use error::SchedulerError;

use crate::action::ActionError;
use crate::core::SharedClock;
use parking_lot::Mutex;
use poll::Waker;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Callback run when an input source is readable.
pub type SourceCallback = Box<dyn FnMut() -> Result<(), ActionError> + Send>;

/// Callback run when at least one deadline is due.
pub type RetryCallback = Box<dyn FnMut() -> Result<(), ActionError> + Send>;

struct Source {
    callback: Arc<Mutex<SourceCallback>>,
    failures: usize,
}

#[derive(Default)]
struct Registry {
    deadlines: BTreeSet<Duration>,
    sources: HashMap<RawFd, Source>,
}

struct Shared {
    registry: Mutex<Registry>,
    cancelled: AtomicBool,
    waker: Waker,
    clock: SharedClock,
    config: SchedulerConfig,
    wakeups: AtomicU64,
}

/// The background retry thread and its registry.
///
/// Dropping a running scheduler cancels and joins it.
pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Create an idle scheduler. No thread runs until [`start`](Self::start).
    pub fn new(config: SchedulerConfig, clock: SharedClock) -> Result<Self, SchedulerError> {
        let shared = Shared {
            registry: Mutex::new(Registry::default()),
            cancelled: AtomicBool::new(false),
            waker: Waker::new()?,
            clock,
            config,
            wakeups: AtomicU64::new(0),
        };
        Ok(Self {
            shared: Arc::new(shared),
            thread: None,
        })
    }

    /// Spawn the background thread.
    ///
    /// The thread exits on [`cancel`](SchedulerHandle::cancel) or as soon as
    /// `owner` has no strong references left.
    pub fn start<O, F>(&mut self, owner: Weak<O>, on_retry: F) -> Result<(), SchedulerError>
    where
        O: ?Sized + Send + Sync + 'static,
        F: FnMut() -> Result<(), ActionError> + Send + 'static,
    {
        if self.thread.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }
        let shared = Arc::clone(&self.shared);
        let on_retry: RetryCallback = Box::new(on_retry);
        let thread = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || shared.run(owner, on_retry))?;
        self.thread = Some(thread);
        Ok(())
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Cancel the background thread and wait for it to exit.
    ///
    /// Idempotent. Called from the scheduler thread itself it only cancels.
    pub fn shutdown(&mut self) {
        self.shared.cancel();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            warn!("scheduler thread panicked");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.is_running())
            .field("handle", &self.handle())
            .finish()
    }
}

/// Cloneable, thread-safe access to a scheduler's registry.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Register an absolute deadline, in the scheduler clock's timeline.
    pub fn add_retry_time(&self, at: Duration) {
        self.shared.registry.lock().deadlines.insert(at);
        self.shared.waker.wake();
    }

    /// Multiplex `source` through the scheduler thread. `callback` runs on
    /// that thread whenever the source is readable.
    pub fn add_input_source<F>(&self, source: &impl AsRawFd, callback: F) -> Result<(), SchedulerError>
    where
        F: FnMut() -> Result<(), ActionError> + Send + 'static,
    {
        let fd = source.as_raw_fd();
        {
            let mut registry = self.shared.registry.lock();
            if registry.sources.contains_key(&fd) {
                return Err(SchedulerError::DuplicateSource { fd });
            }
            let callback: SourceCallback = Box::new(callback);
            registry.sources.insert(
                fd,
                Source {
                    callback: Arc::new(Mutex::new(callback)),
                    failures: 0,
                },
            );
        }
        self.shared.waker.wake();
        Ok(())
    }

    /// Stop multiplexing `source`. Returns whether it was registered.
    pub fn remove_input_source(&self, source: &impl AsRawFd) -> bool {
        let removed = self
            .shared
            .registry
            .lock()
            .sources
            .remove(&source.as_raw_fd())
            .is_some();
        self.shared.waker.wake();
        removed
    }

    /// Ask the background thread to exit. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.shared.registry.lock().deadlines.first().copied()
    }

    pub fn pending_deadlines(&self) -> usize {
        self.shared.registry.lock().deadlines.len()
    }

    pub fn source_count(&self) -> usize {
        self.shared.registry.lock().sources.len()
    }

    /// Number of times the background thread has returned from its wait.
    pub fn wakeups(&self) -> u64 {
        self.shared.wakeups.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.shared.registry.lock();
        f.debug_struct("SchedulerHandle")
            .field("deadlines", &registry.deadlines.len())
            .field("sources", &registry.sources.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Shared {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!(thread = %self.config.thread_name, "scheduler cancelled");
        }
        self.waker.wake();
    }

    fn run<O: ?Sized>(&self, owner: Weak<O>, mut on_retry: RetryCallback) {
        debug!(thread = %self.config.thread_name, "scheduler started");
        let mut idle = self.config.idle_timeout;

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                break;
            }
            if owner.strong_count() == 0 {
                debug!(thread = %self.config.thread_name, "scheduler owner released");
                break;
            }

            let (fds, timeout) = {
                let registry = self.registry.lock();
                let fds: Vec<RawFd> = registry.sources.keys().copied().collect();
                let timeout = match registry.deadlines.first() {
                    Some(&at) => at.saturating_sub(self.clock.now()),
                    None => idle,
                };
                (fds, timeout)
            };

            let readiness = match poll::wait(self.waker.fd(), &fds, timeout) {
                Ok(readiness) => readiness,
                Err(err) => {
                    warn!(error = %err, "readiness wait failed");
                    thread::sleep(self.config.idle_timeout);
                    continue;
                }
            };
            self.wakeups.fetch_add(1, Ordering::Relaxed);

            if readiness.woken {
                self.waker.drain();
            }
            for fd in readiness.invalid {
                self.record_failure(fd, "descriptor is not open");
            }
            let active = readiness.woken || !readiness.ready.is_empty();
            for fd in readiness.ready {
                self.service(fd);
            }

            let due = {
                let mut registry = self.registry.lock();
                let later = registry
                    .deadlines
                    .split_off(&(self.clock.now() + Duration::from_nanos(1)));
                !std::mem::replace(&mut registry.deadlines, later).is_empty()
            };
            if due {
                match panic::catch_unwind(AssertUnwindSafe(&mut on_retry)) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(error = %err, "retry callback failed"),
                    Err(_) => warn!("retry callback panicked"),
                }
            }

            idle = if active || due {
                self.config.idle_timeout
            } else {
                self.config.next_idle(idle)
            };
        }

        debug!(thread = %self.config.thread_name, "scheduler stopped");
    }

    fn service(&self, fd: RawFd) {
        let callback = match self.registry.lock().sources.get(&fd) {
            Some(source) => Arc::clone(&source.callback),
            // Removed since the wait returned.
            None => return,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut callback = callback.lock();
            (&mut **callback)()
        }));
        match outcome {
            Ok(Ok(())) => {
                if let Some(source) = self.registry.lock().sources.get_mut(&fd) {
                    source.failures = 0;
                }
            }
            Ok(Err(err)) => self.record_failure(fd, &err.to_string()),
            Err(_) => self.record_failure(fd, "callback panicked"),
        }
    }

    fn record_failure(&self, fd: RawFd, reason: &str) {
        let mut registry = self.registry.lock();
        let Some(source) = registry.sources.get_mut(&fd) else {
            return;
        };
        source.failures += 1;
        let failures = source.failures;
        if failures >= self.config.max_source_failures {
            registry.sources.remove(&fd);
            warn!(fd, failures, reason, "dropping failing input source");
        } else {
            warn!(fd, failures, reason, "input source callback failed");
        }
    }
}
