use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a reporting loop. Transitions only move forward:
/// `Running -> Cancelled -> Stopped`, or `Running -> Stopped` when the loop
/// is interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Cancelled,
    Stopped,
}

/// Handle shared between the caller and a background reporting loop.
///
/// The state lives in a watch channel: every change is serialized by the
/// channel's lock and waiters are woken when the loop reaches `Stopped`.
#[derive(Debug, Clone)]
pub struct ReporterHandle {
    state: Arc<watch::Sender<State>>,
}

impl ReporterHandle {
    pub fn make() -> Self {
        let (state, _) = watch::channel(State::Running);
        Self {
            state: Arc::new(state),
        }
    }

    /// Point-in-time read of the state.
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Asks the loop to stop and waits until it has cleaned up.
    ///
    /// Returns immediately when the loop has already stopped. A second
    /// caller racing the first does not re-request, it only waits.
    pub async fn cancel(&self) {
        let requested = self.state.send_if_modified(|state| {
            if *state == State::Running {
                *state = State::Cancelled;
                true
            } else {
                false
            }
        });
        if requested {
            tracing::info!("Reporter cancellation requested");
        }
        self.wait_until_stopped().await;
    }

    pub async fn wait_until_stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender is owned by `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state == State::Stopped).await;
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.state() != State::Running
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.send_replace(State::Stopped);
    }
}

impl Default for ReporterHandle {
    fn default() -> Self {
        Self::make()
    }
}
