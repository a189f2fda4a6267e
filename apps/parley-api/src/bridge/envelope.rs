use serde::{Deserialize, Serialize};

use parley_common::id::{prefix, prefixed_ulid};

use crate::gateway::events::ServerEvent;

/// One event as it travels between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// Unique per publication (`evt_` prefixed ULID).
    pub id: String,
    /// Node id of the publisher. A node drops envelopes carrying its own id.
    pub origin: String,
    pub room: String,
    /// Session left out of the fan-out (typing relays).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    pub event: ServerEvent,
}

impl BusEnvelope {
    pub fn new(
        origin: &str,
        room: &str,
        exclude: Option<String>,
        event: ServerEvent,
    ) -> Self {
        Self {
            id: prefixed_ulid(prefix::EVENT),
            origin: origin.to_string(),
            room: room.to_string(),
            exclude,
            event,
        }
    }

    pub fn is_from(&self, node_id: &str) -> bool {
        self.origin == node_id
    }
}
