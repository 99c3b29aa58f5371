//! Armable countdown timers driven by backoff policies.
//!
//! A [`Timer`] only knows whether it is due and when it fires next. It
//! never reads a clock on its own: callers pass the current time, which
//! keeps timers deterministic under a [`ManualClock`](crate::core::ManualClock).
//!
//! Deadlines advance from the previous deadline rather than from the time
//! of the check, so irregular checking never accumulates drift:
//!
//! ```rust
//! use sip_fsm::timer::{BackoffPolicy, Timer};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let fired = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&fired);
//! let mut timer = Timer::new(
//!     "keepalive",
//!     BackoffPolicy::constant(Duration::from_secs(1)).unwrap(),
//!     move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     },
//! );
//!
//! timer.start(Duration::ZERO);
//! timer.check(Duration::from_millis(3500)).unwrap();
//! assert_eq!(fired.load(Ordering::SeqCst), 3);
//! assert_eq!(timer.next_deadline(), Some(Duration::from_secs(4)));
//! ```

mod backoff;
mod error;

pub use backoff::{Backoff, BackoffPolicy, Cursor};
pub use error::TimerError;

use crate::action::ActionError;
use std::fmt;
use std::time::Duration;

/// Callback run each time a timer pops.
pub type TimerAction = Box<dyn FnMut() -> Result<(), ActionError> + Send>;

struct Armed {
    started: Duration,
    deadline: Duration,
    waits: Cursor,
}

/// One deadline fired by [`Timer::pop`].
pub(crate) struct Pop {
    pub(crate) outcome: Result<(), ActionError>,
    /// The next deadline equals the one just fired.
    pub(crate) zero_wait: bool,
}

/// A named retry timer.
pub struct Timer {
    name: String,
    policy: BackoffPolicy,
    action: TimerAction,
    armed: Option<Armed>,
    pops: u64,
}

impl Timer {
    pub fn new<F>(name: impl Into<String>, policy: BackoffPolicy, action: F) -> Self
    where
        F: FnMut() -> Result<(), ActionError> + Send + 'static,
    {
        Self {
            name: name.into(),
            policy,
            action: Box::new(action),
            armed: None,
            pops: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Arm the timer at `now`, restarting the policy from its first wait.
    ///
    /// Returns the first deadline, or `None` if the policy has no waits.
    pub fn start(&mut self, now: Duration) -> Option<Duration> {
        let mut waits = self.policy.cursor();
        self.armed = waits.next().map(|first| Armed {
            started: now,
            deadline: now + first,
            waits,
        });
        self.next_deadline()
    }

    /// Disarm the timer. Stopping a disarmed timer is harmless.
    pub fn stop(&mut self) {
        self.armed = None;
    }

    pub fn is_running(&self) -> bool {
        self.armed.is_some()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.armed.as_ref().map(|armed| armed.deadline)
    }

    pub fn started_at(&self) -> Option<Duration> {
        self.armed.as_ref().map(|armed| armed.started)
    }

    /// Total pops since construction.
    pub fn pops(&self) -> u64 {
        self.pops
    }

    /// Pop once for every deadline at or before `now`.
    ///
    /// A disarmed timer is a no-op. If the action fails the schedule has
    /// still advanced past that pop and the error is returned immediately.
    pub fn check(&mut self, now: Duration) -> Result<usize, ActionError> {
        let mut popped = 0;
        while let Some(pop) = self.pop(now) {
            popped += 1;
            pop.outcome?;
            // A zero wait would pop forever; fire again on the next check.
            if pop.zero_wait {
                break;
            }
        }
        Ok(popped)
    }

    /// Pop the next deadline only, if it is at or before `now`.
    pub(crate) fn pop(&mut self, now: Duration) -> Option<Pop> {
        let deadline = self.next_deadline()?;
        if now < deadline {
            return None;
        }
        let outcome = (self.action)();
        self.pops += 1;
        let zero_wait = self.advance();
        Some(Pop { outcome, zero_wait })
    }

    /// Like [`check`](Self::check), but checking a disarmed timer is a
    /// [`TimerError::NotRunning`] error.
    pub fn check_running(&mut self, now: Duration) -> Result<usize, ActionError> {
        if !self.is_running() {
            return Err(TimerError::NotRunning {
                name: self.name.clone(),
            }
            .into());
        }
        self.check(now)
    }

    fn advance(&mut self) -> bool {
        let Some(armed) = self.armed.as_mut() else {
            return false;
        };
        match armed.waits.next() {
            Some(wait) => {
                armed.deadline += wait;
                wait.is_zero()
            }
            None => {
                self.armed = None;
                false
            }
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("deadline", &self.next_deadline())
            .field("pops", &self.pops)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn secs(n: f64) -> Duration {
        Duration::from_secs_f64(n)
    }

    fn counting(policy: BackoffPolicy) -> (Timer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        let timer = Timer::new("t", policy, move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (timer, count)
    }

    #[test]
    fn two_step_policy_pops_twice_then_disarms() {
        let (mut timer, count) = counting(BackoffPolicy::fixed([secs(5.0), secs(5.0)]));
        timer.start(Duration::ZERO);

        timer.check(secs(4.999)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        timer.check(secs(5.0)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        timer.check(secs(10.0)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!timer.is_running());

        timer.check(secs(15.0)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pop_fires_one_deadline_at_a_time() {
        let (mut timer, count) = counting(BackoffPolicy::fixed([secs(1.0), secs(1.0), secs(1.0)]));
        timer.start(Duration::ZERO);

        assert!(timer.pop(secs(2.5)).is_some());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.next_deadline(), Some(secs(2.0)));

        assert!(timer.pop(secs(2.5)).is_some());
        assert!(timer.pop(secs(2.5)).is_none());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(timer.next_deadline(), Some(secs(3.0)));
    }

    #[test]
    fn irregular_checks_do_not_drift() {
        let (mut timer, count) =
            counting(BackoffPolicy::constant(Duration::from_secs(2)).unwrap());
        timer.start(secs(1.0));

        for at in [2.5, 3.1, 7.9, 8.0, 12.7] {
            timer.check(secs(at)).unwrap();
        }

        // floor((12.7 - 1.0) / 2) = 5
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(timer.next_deadline(), Some(secs(13.0)));
    }

    #[test]
    fn stop_disarms_and_check_is_noop() {
        let (mut timer, count) =
            counting(BackoffPolicy::constant(Duration::from_secs(1)).unwrap());
        timer.start(Duration::ZERO);
        timer.stop();

        assert_eq!(timer.check(secs(10.0)).unwrap(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn strict_check_on_disarmed_timer_fails() {
        let (mut timer, _) = counting(BackoffPolicy::fixed([secs(1.0)]));

        let err = timer.check_running(secs(2.0)).unwrap_err();
        let err = err.downcast_ref::<TimerError>().unwrap();
        assert_eq!(
            err,
            &TimerError::NotRunning {
                name: "t".to_string()
            }
        );
    }

    #[test]
    fn restart_replays_policy() {
        let (mut timer, count) = counting(BackoffPolicy::fixed([secs(1.0), secs(3.0)]));
        timer.start(Duration::ZERO);
        timer.check(secs(1.0)).unwrap();
        assert_eq!(timer.next_deadline(), Some(secs(4.0)));

        timer.start(secs(10.0));
        assert_eq!(timer.next_deadline(), Some(secs(11.0)));
        assert_eq!(timer.started_at(), Some(secs(10.0)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_policy_never_arms() {
        let (mut timer, _) = counting(BackoffPolicy::fixed(Vec::new()));
        assert_eq!(timer.start(Duration::ZERO), None);
        assert!(!timer.is_running());
    }

    #[test]
    fn zero_wait_pops_once_per_check() {
        let (mut timer, count) = counting(BackoffPolicy::fixed([secs(1.0), Duration::ZERO]));
        timer.start(Duration::ZERO);

        timer.check(secs(1.0)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        timer.check(secs(1.0)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!timer.is_running());
    }

    #[test]
    fn failing_action_still_advances() {
        let mut timer = Timer::new(
            "boom",
            BackoffPolicy::constant(Duration::from_secs(1)).unwrap(),
            || Err("boom".into()),
        );
        timer.start(Duration::ZERO);

        assert!(timer.check(secs(1.5)).is_err());
        assert_eq!(timer.next_deadline(), Some(secs(2.0)));
        assert_eq!(timer.pops(), 1);
    }
}
