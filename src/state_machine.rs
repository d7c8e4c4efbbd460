// Copyright 2025 Cowboy AI, LLC.

//! Finite state machines for lifecycles tracked by the engine
//!
//! Two lifecycles use this module: the load status lifecycle maintained by
//! the synchronizer and the optimization request lifecycle driven by the
//! orchestrator. Both are Moore machines: what happens on entry depends only
//! on the state being entered.

use crate::errors::TransitionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

/// A lifecycle state
pub trait State: Debug + Clone + PartialEq + Send + Sync {
    /// Wire name, also used in logs
    fn name(&self) -> &'static str;

    /// No transition leaves this state
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Transition rules of a Moore machine
///
/// # Examples
///
/// ```rust
/// use cim_domain_logistics::state_machine::{MooreStateTransitions, State};
///
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// enum Gate {
///     Open,
///     Closed,
/// }
///
/// impl State for Gate {
///     fn name(&self) -> &'static str {
///         match self {
///             Gate::Open => "OPEN",
///             Gate::Closed => "CLOSED",
///         }
///     }
/// }
///
/// impl MooreStateTransitions for Gate {
///     fn can_transition_to(&self, target: &Self) -> bool {
///         self != target
///     }
///
///     fn valid_transitions(&self) -> Vec<Self> {
///         match self {
///             Gate::Open => vec![Gate::Closed],
///             Gate::Closed => vec![Gate::Open],
///         }
///     }
/// }
///
/// assert!(Gate::Open.can_transition_to(&Gate::Closed));
/// assert!(!Gate::Open.can_transition_to(&Gate::Open));
/// ```
pub trait MooreStateTransitions: State {
    /// Whether `target` is reachable in one step
    fn can_transition_to(&self, target: &Self) -> bool;

    /// One-step successors
    fn valid_transitions(&self) -> Vec<Self>;
}

/// One recorded move
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition<S> {
    /// Source
    pub from: S,
    /// Target
    pub to: S,
    /// What caused the move
    pub note: Option<String>,
    /// Transition key
    pub transition_id: Uuid,
    /// Wall-clock time of the move
    pub timestamp: DateTime<Utc>,
}

/// A Moore machine keyed by the subject it tracks
#[derive(Debug, Clone)]
pub struct MooreMachine<S: MooreStateTransitions> {
    subject: String,
    current_state: S,
    transition_history: Vec<StateTransition<S>>,
}

impl<S: MooreStateTransitions> MooreMachine<S> {
    /// Create a machine for `subject` in `initial_state`
    pub fn new(initial_state: S, subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            current_state: initial_state,
            transition_history: Vec::new(),
        }
    }

    /// State now
    pub fn current_state(&self) -> &S {
        &self.current_state
    }

    /// What the machine tracks, e.g. a request id
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Move to `new_state`, rejecting moves the rules forbid
    pub fn transition_to(
        &mut self,
        new_state: S,
        note: Option<String>,
    ) -> Result<&StateTransition<S>, TransitionError> {
        if self.current_state.is_terminal() || !self.current_state.can_transition_to(&new_state) {
            return Err(TransitionError {
                from: self.current_state.name().to_string(),
                to: new_state.name().to_string(),
            });
        }

        let transition = StateTransition {
            from: self.current_state.clone(),
            to: new_state.clone(),
            note,
            transition_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        };

        self.current_state = new_state;
        self.transition_history.push(transition);
        let last = self.transition_history.len() - 1;
        Ok(&self.transition_history[last])
    }

    /// Moves so far, oldest first
    pub fn history(&self) -> &[StateTransition<S>] {
        &self.transition_history
    }

    /// Currently in `state`
    pub fn is_in_state(&self, state: &S) -> bool {
        &self.current_state == state
    }

    /// Reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// Successors of the current state
    pub fn valid_next_states(&self) -> Vec<S> {
        self.current_state.valid_transitions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    enum Door {
        Closed,
        Open,
        Welded,
    }

    impl State for Door {
        fn name(&self) -> &'static str {
            match self {
                Door::Closed => "CLOSED",
                Door::Open => "OPEN",
                Door::Welded => "WELDED",
            }
        }

        fn is_terminal(&self) -> bool {
            matches!(self, Door::Welded)
        }
    }

    impl MooreStateTransitions for Door {
        fn can_transition_to(&self, target: &Self) -> bool {
            self.valid_transitions().contains(target)
        }

        fn valid_transitions(&self) -> Vec<Self> {
            match self {
                Door::Closed => vec![Door::Open, Door::Welded],
                Door::Open => vec![Door::Closed],
                Door::Welded => vec![],
            }
        }
    }

    #[test]
    fn test_valid_transitions_are_recorded() {
        let mut machine = MooreMachine::new(Door::Closed, "door-1");
        machine.transition_to(Door::Open, Some("handle".into())).unwrap();
        machine.transition_to(Door::Closed, None).unwrap();

        assert!(machine.is_in_state(&Door::Closed));
        assert_eq!(machine.history().len(), 2);
        assert_eq!(machine.history()[0].note.as_deref(), Some("handle"));
        assert_eq!(machine.subject(), "door-1");
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut machine = MooreMachine::new(Door::Open, "door-2");
        let err = machine.transition_to(Door::Welded, None).unwrap_err();
        assert_eq!(err.from, "OPEN");
        assert_eq!(err.to, "WELDED");
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut machine = MooreMachine::new(Door::Closed, "door-3");
        machine.transition_to(Door::Welded, None).unwrap();
        assert!(machine.is_finished());
        assert!(machine.transition_to(Door::Open, None).is_err());
        assert!(machine.valid_next_states().is_empty());
    }
}
