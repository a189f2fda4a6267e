//! Cross-node event bridge.
//!
//! Local broadcasts leave the hub as [`BusEnvelope`]s and are published by
//! [`run_publisher`]; [`run_listener`] feeds everything other nodes publish
//! back into the hub as remote broadcasts. Redis carries the traffic in
//! production, with an in-memory bus as the single-instance fallback.

pub mod envelope;
pub mod memory_bus;
pub mod redis_bus;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;

use crate::gateway::hub::HubHandle;

use envelope::BusEnvelope;
use memory_bus::MemoryBus;
use redis_bus::RedisBus;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("malformed envelope: {0}")]
    Codec(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, envelope: &BusEnvelope) -> Result<(), BridgeError>;

    /// Open a fresh subscription. The stream ends when the connection drops.
    async fn subscribe(&self) -> Result<BoxStream<'static, BusEnvelope>, BridgeError>;

    fn name(&self) -> &'static str;
}

/// Connect to Redis, or fall back to the in-memory bus (single instance
/// only) if it cannot be reached.
pub async fn try_with_redis(redis_url: &str) -> Arc<dyn EventBus> {
    match RedisBus::connect(redis_url).await {
        Ok(bus) => {
            tracing::info!("redis event bus connected");
            Arc::new(bus)
        }
        Err(err) => {
            tracing::warn!(error = %err, "redis event bus unavailable, using in-memory bus (single instance mode only)");
            Arc::new(MemoryBus::new())
        }
    }
}

/// Publish every envelope the hub hands over. Failures lose that envelope
/// for remote subscribers only.
pub async fn run_publisher(bus: Arc<dyn EventBus>, mut rx: mpsc::Receiver<BusEnvelope>) {
    while let Some(envelope) = rx.recv().await {
        if let Err(err) = bus.publish(&envelope).await {
            tracing::error!(
                bus = bus.name(),
                room = %envelope.room,
                error = %err,
                "bus publish failed"
            );
        }
    }
    tracing::debug!("bus publisher stopped");
}

/// Relay other nodes' envelopes into the hub, resubscribing with
/// exponential backoff whenever the subscription drops. Returns once the hub
/// is gone.
pub async fn run_listener(
    bus: Arc<dyn EventBus>,
    hub: HubHandle,
    node_id: String,
    backoff_initial: Duration,
    backoff_max: Duration,
) {
    let mut delay = backoff_initial;

    loop {
        match bus.subscribe().await {
            Ok(mut stream) => {
                tracing::info!(bus = bus.name(), node_id = %node_id, "bus listener subscribed");
                delay = backoff_initial;

                while let Some(envelope) = stream.next().await {
                    if envelope.is_from(&node_id) {
                        continue;
                    }
                    let BusEnvelope {
                        room,
                        exclude,
                        event,
                        ..
                    } = envelope;
                    if hub.broadcast_remote(&room, event, exclude).await.is_err() {
                        tracing::debug!("hub gone, bus listener stopping");
                        return;
                    }
                }
                tracing::warn!(bus = bus.name(), "bus subscription ended, reconnecting");
            }
            Err(err) => {
                tracing::error!(
                    bus = bus.name(),
                    error = %err,
                    delay_secs = delay.as_secs(),
                    "bus subscribe failed, reconnecting"
                );
            }
        }

        if hub.is_closed() {
            return;
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(backoff_max);
    }
}
