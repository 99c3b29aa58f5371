//! State transition history tracking.
//!
//! Each machine instance keeps a bounded log of committed transitions.
//! Entries are only recorded once a transition has fully succeeded, so a
//! failed action never shows up here.

use super::state::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Record of a single committed state transition.
///
/// # Example
///
/// ```rust
/// use sip_fsm::core::StateTransition;
/// use chrono::Utc;
///
/// let transition = StateTransition {
///     from: "calling",
///     to: "proceeding",
///     input: "resp_1xx".to_string(),
///     timestamp: Utc::now(),
///     attempt: 1,
/// };
/// assert_eq!(transition.input, "resp_1xx");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateTransition<S> {
    /// The state being transitioned from
    pub from: S,
    /// The state being transitioned to
    pub to: S,
    /// Name of the input that drove the transition
    pub input: String,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
    /// Sequence number of this transition within the machine's lifetime
    pub attempt: usize,
}

/// Bounded, ordered history of state transitions.
///
/// Once `limit` entries are held the oldest entry is evicted. A limit of
/// zero keeps nothing.
///
/// # Example
///
/// ```rust
/// use sip_fsm::core::{StateHistory, StateTransition};
/// use chrono::Utc;
///
/// let mut history = StateHistory::with_limit(8);
/// history.record(StateTransition {
///     from: "idle",
///     to: "running",
///     input: "start".into(),
///     timestamp: Utc::now(),
///     attempt: 1,
/// });
/// history.record(StateTransition {
///     from: "running",
///     to: "idle",
///     input: "stop".into(),
///     timestamp: Utc::now(),
///     attempt: 2,
/// });
///
/// assert_eq!(history.get_path(), vec![&"idle", &"running", &"idle"]);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateHistory<S> {
    transitions: VecDeque<StateTransition<S>>,
    limit: usize,
    recorded: usize,
}

impl<S: State> Default for StateHistory<S> {
    fn default() -> Self {
        Self::with_limit(64)
    }
}

impl<S: State> StateHistory<S> {
    /// Create an empty history with the default limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty history holding at most `limit` transitions.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            transitions: VecDeque::with_capacity(limit.min(64)),
            limit,
            recorded: 0,
        }
    }

    /// Record a transition, evicting the oldest entry when full.
    pub fn record(&mut self, transition: StateTransition<S>) {
        self.recorded += 1;
        if self.limit == 0 {
            return;
        }
        if self.transitions.len() == self.limit {
            self.transitions.pop_front();
        }
        self.transitions.push_back(transition);
    }

    /// Get the path of states traversed by the retained transitions.
    ///
    /// Returns the `from` state of the oldest retained transition followed
    /// by the `to` state of each transition.
    pub fn get_path(&self) -> Vec<&S> {
        let mut path = Vec::with_capacity(self.transitions.len() + 1);
        if let Some(first) = self.transitions.front() {
            path.push(&first.from);
        }
        for transition in &self.transitions {
            path.push(&transition.to);
        }
        path
    }

    /// Time between the oldest and newest retained transitions.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.transitions.front()?, self.transitions.back()?);
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }

    /// Retained transitions, oldest first.
    pub fn transitions(&self) -> impl ExactSizeIterator<Item = &StateTransition<S>> {
        self.transitions.iter()
    }

    /// Number of retained transitions.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Total transitions ever recorded, including evicted ones.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn last(&self) -> Option<&StateTransition<S>> {
        self.transitions.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(from: &'static str, to: &'static str, attempt: usize) -> StateTransition<&'static str> {
        StateTransition {
            from,
            to,
            input: format!("{from}->{to}"),
            timestamp: Utc::now(),
            attempt,
        }
    }

    #[test]
    fn new_history_is_empty() {
        let history: StateHistory<&'static str> = StateHistory::new();
        assert!(history.is_empty());
        assert!(history.get_path().is_empty());
        assert!(history.duration().is_none());
    }

    #[test]
    fn record_keeps_order() {
        let mut history = StateHistory::new();
        history.record(step("a", "b", 1));
        history.record(step("b", "c", 2));

        assert_eq!(history.get_path(), vec![&"a", &"b", &"c"]);
        assert_eq!(history.last().map(|t| t.attempt), Some(2));
    }

    #[test]
    fn limit_evicts_oldest() {
        let mut history = StateHistory::with_limit(2);
        history.record(step("a", "b", 1));
        history.record(step("b", "c", 2));
        history.record(step("c", "d", 3));

        assert_eq!(history.len(), 2);
        assert_eq!(history.recorded(), 3);
        assert_eq!(history.get_path(), vec![&"b", &"c", &"d"]);
    }

    #[test]
    fn zero_limit_only_counts() {
        let mut history = StateHistory::with_limit(0);
        history.record(step("a", "b", 1));

        assert!(history.is_empty());
        assert_eq!(history.recorded(), 1);
    }

    #[test]
    fn duration_spans_first_to_last() {
        let mut history = StateHistory::new();
        let start = Utc::now();
        let mut first = step("a", "b", 1);
        first.timestamp = start;
        let mut second = step("b", "c", 2);
        second.timestamp = start + chrono::Duration::milliseconds(250);
        history.record(first);
        history.record(second);

        assert_eq!(history.duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn history_serializes() {
        let mut history: StateHistory<String> = StateHistory::with_limit(4);
        history.record(StateTransition {
            from: "idle".to_string(),
            to: "running".to_string(),
            input: "start".to_string(),
            timestamp: Utc::now(),
            attempt: 1,
        });

        let json = serde_json::to_string(&history).unwrap();
        let restored: StateHistory<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get_path(), vec!["idle", "running"]);
    }
}
