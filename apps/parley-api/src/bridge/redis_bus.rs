//! Redis pub/sub transport for cross-node fan-out.

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::envelope::BusEnvelope;
use super::{BridgeError, EventBus};

/// Single well-known channel; the room travels inside the envelope.
pub const TOPIC: &str = "parley:events";

pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBus {
    /// Open a client and verify the server answers.
    pub async fn connect(url: &str) -> Result<Self, BridgeError> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client.clone()).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, envelope: &BusEnvelope) -> Result<(), BridgeError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(TOPIC, payload).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, BusEnvelope>, BridgeError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(TOPIC).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let decoded = msg
                .get_payload::<String>()
                .map_err(BridgeError::from)
                .and_then(|text| serde_json::from_str::<BusEnvelope>(&text).map_err(Into::into));
            match decoded {
                Ok(envelope) => future::ready(Some(envelope)),
                Err(err) => {
                    tracing::warn!(error = %err, "undecodable bus message dropped");
                    future::ready(None)
                }
            }
        });
        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
