//! In-process bus for single-instance mode and tests.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use super::envelope::BusEnvelope;
use super::{BridgeError, EventBus};

const BROADCAST_CAPACITY: usize = 1024;

/// Every subscriber sees every publication, including its own; the listener
/// filters by origin. Sharing one `MemoryBus` between hubs simulates a
/// multi-node deployment.
#[derive(Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusEnvelope>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, envelope: &BusEnvelope) -> Result<(), BridgeError> {
        // No subscribers is fine.
        let _ = self.sender.send(envelope.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, BusEnvelope>, BridgeError> {
        let rx = self.sender.subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => return Some((envelope, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
