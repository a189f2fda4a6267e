//! Per-connection gateway session handle.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::ServerEvent;

/// Why an event could not be queued for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The outbound queue is at capacity: the client is not keeping up.
    Full,
    /// The writer is gone.
    Closed,
}

/// The hub's handle to one connected client.
///
/// Cloning is cheap; every clone feeds the same bounded outbound queue and
/// shares the same close signal.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Unique session identifier (`ses_` prefixed ULID).
    pub id: String,
    /// Authenticated user ID. Fixed for the life of the session.
    pub user_id: String,
    /// Username cached at handshake, used for typing and voice payloads.
    pub username: String,
    outbound: mpsc::Sender<Arc<ServerEvent>>,
    closed: CancellationToken,
}

impl SessionHandle {
    /// Create a handle plus the receiving end of its outbound queue, which
    /// belongs to the session's writer.
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let handle = Self {
            id: parley_common::id::prefixed_ulid(parley_common::id::prefix::SESSION),
            user_id: user_id.into(),
            username: username.into(),
            outbound,
            closed: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Queue an event without waiting.
    pub fn enqueue(&self, event: Arc<ServerEvent>) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Signal both session tasks to stop.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// A token that fires when the session is closed from either side.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}
