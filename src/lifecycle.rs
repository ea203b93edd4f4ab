use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Process-lifetime states of a consumer, in the only order they may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Running,
    ShutdownRequested,
    Draining,
    Closed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Running => "running",
            LifecycleState::ShutdownRequested => "shutdown_requested",
            LifecycleState::Draining => "draining",
            LifecycleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared, forward-only state machine.
///
/// States may be skipped (a fatal error goes straight from `Running` to
/// `Draining`) but never revisited.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move to `next` if it lies ahead of the current state.
    ///
    /// Returns `true` if the transition happened.
    pub fn advance(&self, next: LifecycleState) -> bool {
        let mut from = None;
        self.tx.send_if_modified(|state| {
            if next <= *state {
                return false;
            }
            from = Some(*state);
            *state = next;
            true
        });
        match from {
            Some(from) => {
                tracing::info!(%from, to = %next, "consumer state changed");
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_running() {
        assert_eq!(Lifecycle::new().state(), LifecycleState::Running);
    }

    #[test]
    fn test_full_sequence() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.advance(LifecycleState::ShutdownRequested));
        assert!(lifecycle.advance(LifecycleState::Draining));
        assert!(lifecycle.advance(LifecycleState::Closed));
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
    }

    #[test]
    fn test_no_transition_backwards() {
        let lifecycle = Lifecycle::new();
        lifecycle.advance(LifecycleState::Draining);
        assert!(!lifecycle.advance(LifecycleState::ShutdownRequested));
        assert!(!lifecycle.advance(LifecycleState::Running));
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
    }

    #[test]
    fn test_repeat_transition_is_noop() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.advance(LifecycleState::ShutdownRequested));
        assert!(!lifecycle.advance(LifecycleState::ShutdownRequested));
    }

    #[test]
    fn test_closed_is_terminal() {
        let lifecycle = Lifecycle::new();
        lifecycle.advance(LifecycleState::Closed);
        for state in [
            LifecycleState::Running,
            LifecycleState::ShutdownRequested,
            LifecycleState::Draining,
            LifecycleState::Closed,
        ] {
            assert!(!lifecycle.advance(state));
        }
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();
        lifecycle.advance(LifecycleState::Draining);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LifecycleState::Draining);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&LifecycleState::ShutdownRequested).unwrap();
        assert_eq!(json, "\"shutdown_requested\"");
    }
}
