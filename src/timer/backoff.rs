//! Backoff policies for retry timers.
//!
//! A policy is a lazy, possibly infinite sequence of wait durations. Every
//! time a timer starts it asks its [`BackoffPolicy`] for a fresh
//! [`Backoff`] cursor, so restarting a timer always replays the sequence
//! from the beginning.

use super::error::TimerError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A cursor over wait durations.
pub trait Backoff: Send {
    /// The next wait, or `None` once the sequence is exhausted.
    fn next_wait(&mut self) -> Option<Duration>;
}

impl<I> Backoff for I
where
    I: Iterator<Item = Duration> + Send,
{
    fn next_wait(&mut self) -> Option<Duration> {
        self.next()
    }
}

type BackoffFactory = Arc<dyn Fn() -> Box<dyn Backoff> + Send + Sync>;

/// Restartable description of a wait sequence.
///
/// # Example
///
/// ```rust
/// use sip_fsm::timer::BackoffPolicy;
/// use std::time::Duration;
///
/// // SIP timer A: T1, doubling, capped at T2
/// let timer_a = BackoffPolicy::exponential(
///     Duration::from_millis(500),
///     Duration::from_secs(4),
/// )
/// .unwrap();
///
/// let waits: Vec<_> = timer_a.cursor().take(5).collect();
/// assert_eq!(waits[3], Duration::from_secs(4));
/// ```
#[derive(Clone)]
pub enum BackoffPolicy {
    /// A literal, finite list of waits.
    Fixed(Arc<[Duration]>),
    /// The same wait forever.
    Constant(Duration),
    /// Doubling waits up to `cap`, optionally stopping after `limit` waits.
    Exponential {
        initial: Duration,
        cap: Duration,
        limit: Option<usize>,
    },
    /// A user-supplied cursor factory.
    Factory(BackoffFactory),
}

impl BackoffPolicy {
    pub fn fixed<I>(waits: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
    {
        Self::Fixed(waits.into_iter().collect())
    }

    pub fn constant(every: Duration) -> Result<Self, TimerError> {
        if every.is_zero() {
            return Err(TimerError::ZeroInterval);
        }
        Ok(Self::Constant(every))
    }

    pub fn exponential(initial: Duration, cap: Duration) -> Result<Self, TimerError> {
        if initial.is_zero() {
            return Err(TimerError::ZeroInterval);
        }
        Ok(Self::Exponential {
            initial,
            cap: cap.max(initial),
            limit: None,
        })
    }

    /// Stop an exponential policy after `limit` waits. Other policies are
    /// returned unchanged.
    pub fn with_limit(self, limit: usize) -> Self {
        match self {
            Self::Exponential { initial, cap, .. } => Self::Exponential {
                initial,
                cap,
                limit: Some(limit),
            },
            other => other,
        }
    }

    /// Build a policy from a cursor factory.
    ///
    /// Two cursors are drawn up front and each must yield a first wait.
    /// A factory whose cursors are exhausted, or that hands out shared state
    /// the first cursor already used up, is rejected with
    /// [`TimerError::ExhaustedPolicy`].
    pub fn factory<F, B>(make: F) -> Result<Self, TimerError>
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: Backoff + 'static,
    {
        for _ in 0..2 {
            if make().next_wait().is_none() {
                return Err(TimerError::ExhaustedPolicy);
            }
        }
        Ok(Self::Factory(Arc::new(move || -> Box<dyn Backoff> {
            Box::new(make())
        })))
    }

    /// A fresh cursor positioned at the start of the sequence.
    pub fn cursor(&self) -> Cursor {
        let waits: Box<dyn Backoff> = match self {
            Self::Fixed(waits) => {
                let waits = Arc::clone(waits);
                Box::new((0..waits.len()).map(move |i| waits[i]))
            }
            Self::Constant(every) => Box::new(std::iter::repeat(*every)),
            Self::Exponential {
                initial,
                cap,
                limit,
            } => {
                let cap = *cap;
                let doubling = std::iter::successors(Some(*initial), move |prev| {
                    Some(prev.saturating_mul(2).min(cap))
                });
                match limit {
                    Some(limit) => Box::new(doubling.take(*limit)),
                    None => Box::new(doubling),
                }
            }
            Self::Factory(make) => make(),
        };
        Cursor(waits)
    }
}

/// Iterator over a policy's waits, as returned by [`BackoffPolicy::cursor`].
pub struct Cursor(Box<dyn Backoff>);

impl Iterator for Cursor {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.0.next_wait()
    }
}

impl fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(waits) => f.debug_tuple("Fixed").field(waits).finish(),
            Self::Constant(every) => f.debug_tuple("Constant").field(every).finish(),
            Self::Exponential {
                initial,
                cap,
                limit,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("cap", cap)
                .field("limit", limit)
                .finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

impl From<Vec<Duration>> for BackoffPolicy {
    fn from(waits: Vec<Duration>) -> Self {
        Self::fixed(waits)
    }
}
