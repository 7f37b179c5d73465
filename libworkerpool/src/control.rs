use serde::Deserialize;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::warn;

use crate::error::{PoolError, Result};
use crate::models::SupervisorState;

/// Pending requests beyond this are dropped.
pub const CONTROL_QUEUE_CAPACITY: usize = 16;

/// External control requests, usually triggered by OS signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlRequest {
    Shutdown,
    /// Kill every worker, then resume; dead workers get respawned.
    PurgeAndRestart,
    /// Kill every worker, then pause.
    PurgeAndPause,
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: SupervisorState,
    /// Kill and reap all tracked workers before entering `next`.
    pub purge: bool,
}

/// The supervisor state machine. `ShuttingDown` absorbs every request.
pub fn transition(state: SupervisorState, request: ControlRequest) -> Transition {
    use ControlRequest::*;
    use SupervisorState::*;

    let (next, purge) = match (state, request) {
        (ShuttingDown, _) => (ShuttingDown, false),
        (_, Shutdown) => (ShuttingDown, false),
        (_, PurgeAndRestart) => (Running, true),
        (_, PurgeAndPause) => (Paused, true),
        (_, Pause) => (Paused, false),
        (_, Resume) => (Running, false),
    };
    Transition { next, purge }
}

/// Sending half of the control queue. Cheap to clone and safe to use from any task.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: Sender<ControlRequest>,
}

impl ControlHandle {
    /// Enqueue a request without blocking. A full queue drops the request.
    pub fn send(&self, request: ControlRequest) -> Result<()> {
        match self.tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(req)) => {
                warn!("control queue is full, dropping {req:?}");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(PoolError::ControlQueueClosed),
        }
    }
}

pub fn control_channel() -> (ControlHandle, Receiver<ControlRequest>) {
    let (tx, rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
    (ControlHandle { tx }, rx)
}
