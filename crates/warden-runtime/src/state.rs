//! Closed state machine for one run of a turn.
//!
//! ```text
//! START -> GATE_RUNNING -> ALLOWED -> TASK_RUNNING -> DONE
//!                       \-> BLOCKED
//! any state except ERROR -> ERROR
//! ```
//!
//! No state is entered twice. Every transition goes through
//! [`StateMachine::advance`], which rejects anything not on the diagram.

use std::fmt;

use serde::Serialize;
use tracing::debug;
use warden_core::ids::RunTag;

use crate::errors::RunError;

/// States of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    /// Run created, history snapshot taken.
    Start,
    /// Gate agent evaluating the policy bundle.
    GateRunning,
    /// Gate allowed the message.
    Allowed,
    /// Gate blocked the message.
    Blocked,
    /// Task agent streaming its answer.
    TaskRunning,
    /// Task agent finished and the run committed.
    Done,
    /// The run failed.
    Error,
}

impl TurnState {
    /// Log and wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::GateRunning => "GATE_RUNNING",
            Self::Allowed => "ALLOWED",
            Self::Blocked => "BLOCKED",
            Self::TaskRunning => "TASK_RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    /// Whether the run ends in this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Blocked | Self::Done | Self::Error)
    }

    /// Transition guard.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Start, Self::GateRunning)
            | (Self::GateRunning, Self::Allowed | Self::Blocked)
            | (Self::Allowed, Self::TaskRunning)
            | (Self::TaskRunning, Self::Done) => true,
            (from, Self::Error) => from != Self::Error,
            _ => false,
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run's state with its transition history.
#[derive(Debug)]
pub struct StateMachine {
    run_tag: RunTag,
    state: TurnState,
    history: Vec<TurnState>,
}

impl StateMachine {
    /// A machine in [`TurnState::Start`].
    pub fn new(run_tag: RunTag) -> Self {
        Self {
            run_tag,
            state: TurnState::Start,
            history: vec![TurnState::Start],
        }
    }

    /// Current state.
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Every state entered, in order.
    pub fn history(&self) -> &[TurnState] {
        &self.history
    }

    /// Move to `next` if the guard allows it.
    pub fn advance(&mut self, next: TurnState) -> Result<(), RunError> {
        if !self.state.can_transition_to(next) {
            return Err(RunError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(run_tag = %self.run_tag, from = %self.state, to = %next, "state transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to [`TurnState::Error`]; a no-op when already there.
    pub fn fail(&mut self) {
        if self.state != TurnState::Error {
            debug!(run_tag = %self.run_tag, from = %self.state, "state transition to ERROR");
            self.state = TurnState::Error;
            self.history.push(TurnState::Error);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
