//! Listen loop state machine: Idle → Capturing → Scoring → Accepted | Rejected → Idle.
//! Failures drop back to Idle from Capturing or Scoring. No terminal state.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

/// States of one detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ListenState {
    Idle,
    Capturing,
    Scoring,
    Accepted,
    Rejected,
}

impl std::fmt::Display for ListenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenState::Idle => write!(f, "Idle"),
            ListenState::Capturing => write!(f, "Capturing"),
            ListenState::Scoring => write!(f, "Scoring"),
            ListenState::Accepted => write!(f, "Accepted"),
            ListenState::Rejected => write!(f, "Rejected"),
        }
    }
}

impl ListenState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: ListenState) -> bool {
        matches!(
            (self, next),
            (ListenState::Idle, ListenState::Capturing)
                | (ListenState::Capturing, ListenState::Scoring)
                | (ListenState::Capturing, ListenState::Idle) // capture failure
                | (ListenState::Scoring, ListenState::Accepted)
                | (ListenState::Scoring, ListenState::Rejected)
                | (ListenState::Scoring, ListenState::Idle) // scoring failure
                | (ListenState::Accepted, ListenState::Idle)
                | (ListenState::Rejected, ListenState::Idle)
        )
    }
}

/// Thread-safe state holder with a watch channel for observers.
pub struct StateMachine {
    state: RwLock<ListenState>,
    state_tx: watch::Sender<ListenState>,
    state_rx: watch::Receiver<ListenState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ListenState::Idle);
        Self {
            state: RwLock::new(ListenState::Idle),
            state_tx,
            state_rx,
        }
    }

    /// Current state (non-blocking read).
    pub fn current(&self) -> ListenState {
        *self.state.read()
    }

    /// Attempt a state transition. Returns Ok(new_state) or Err with reason.
    pub fn transition(&self, next: ListenState) -> Result<ListenState, String> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            let msg = format!("invalid transition: {} -> {}", current, next);
            warn!("{}", msg);
            return Err(msg);
        }
        *state = next;
        let _ = self.state_tx.send(next);
        debug!(from = %current, to = %next, "state_transition");
        Ok(next)
    }

    /// Return to Idle from any state (cycle aborted or finished).
    pub fn force_idle(&self) {
        let mut state = self.state.write();
        let prev = *state;
        if prev == ListenState::Idle {
            return;
        }
        *state = ListenState::Idle;
        let _ = self.state_tx.send(ListenState::Idle);
        debug!(from = %prev, "force_idle");
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ListenState> {
        self.state_rx.clone()
    }
}
