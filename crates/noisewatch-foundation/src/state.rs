use crate::error::SessionError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle of one sampling session.
///
/// The device is held exactly while the state is `Starting` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Shared view of a session's state with validated transitions.
///
/// Cloning shares the underlying state; `subscribe` hands out a receiver
/// that observes every transition in order.
#[derive(Clone)]
pub struct StateTracker {
    state: Arc<RwLock<SessionState>>,
    state_tx: Sender<SessionState>,
    state_rx: Receiver<SessionState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(SessionState::Idle)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: SessionState) -> Result<(), SessionError> {
        let mut current = self.state.write();

        let valid = matches!(
            (&*current, &new_state),
            (SessionState::Idle, SessionState::Starting)
                | (SessionState::Failed, SessionState::Starting)
                | (SessionState::Starting, SessionState::Running)
                | (SessionState::Starting, SessionState::Failed)
                | (SessionState::Starting, SessionState::Stopping)
                | (SessionState::Running, SessionState::Stopping)
                | (SessionState::Stopping, SessionState::Idle)
                | (SessionState::Stopping, SessionState::Failed)
        );

        if !valid {
            return Err(SessionError::Unexpected(format!(
                "invalid state transition: {:?} -> {:?}",
                *current, new_state
            )));
        }

        tracing::info!("session state: {:?} -> {:?}", *current, new_state);
        *current = new_state;
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> SessionState {
        *self.state.read()
    }

    pub fn subscribe(&self) -> Receiver<SessionState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        assert_eq!(StateTracker::new().current(), SessionState::Idle);
    }

    #[test]
    fn accepts_full_lifecycle() {
        let tracker = StateTracker::new();
        tracker.transition(SessionState::Starting).unwrap();
        tracker.transition(SessionState::Running).unwrap();
        tracker.transition(SessionState::Stopping).unwrap();
        tracker.transition(SessionState::Idle).unwrap();
    }

    #[test]
    fn accepts_open_failure_path() {
        let tracker = StateTracker::new();
        tracker.transition(SessionState::Starting).unwrap();
        tracker.transition(SessionState::Failed).unwrap();
        // a new attempt clears prior error state
        tracker.transition(SessionState::Starting).unwrap();
    }

    #[test]
    fn accepts_runtime_failure_path() {
        let tracker = StateTracker::new();
        tracker.transition(SessionState::Starting).unwrap();
        tracker.transition(SessionState::Running).unwrap();
        tracker.transition(SessionState::Stopping).unwrap();
        tracker.transition(SessionState::Failed).unwrap();
    }

    #[test]
    fn rejects_skipping_starting() {
        let tracker = StateTracker::new();
        assert!(tracker.transition(SessionState::Running).is_err());
        assert_eq!(tracker.current(), SessionState::Idle);
    }

    #[test]
    fn rejects_idle_to_stopping() {
        let tracker = StateTracker::new();
        assert!(tracker.transition(SessionState::Stopping).is_err());
    }

    #[test]
    fn subscribers_observe_transitions_in_order() {
        let tracker = StateTracker::new();
        let rx = tracker.subscribe();
        tracker.transition(SessionState::Starting).unwrap();
        tracker.transition(SessionState::Running).unwrap();
        tracker.transition(SessionState::Stopping).unwrap();
        tracker.transition(SessionState::Idle).unwrap();

        let observed: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            observed,
            vec![
                SessionState::Starting,
                SessionState::Running,
                SessionState::Stopping,
                SessionState::Idle,
            ]
        );
    }
}
