//! Realtime gateway: websocket sessions, the hub that fans events out to
//! rooms, and the emitter the REST layer pushes through.

pub mod emitter;
pub mod events;
pub mod handler;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod server;
pub mod session;
pub mod voice;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_common::id::{prefix, prefixed_ulid};

use crate::bridge::{self, EventBus};
use crate::config::GatewayConfig;
use crate::db::relations::RelationStore;

use emitter::Emitter;
use hub::{Hub, HubHandle};

/// A running hub wired to the event bus.
pub struct Gateway {
    pub hub: HubHandle,
    pub emitter: Emitter,
    /// This process's identity on the bus.
    pub node_id: String,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Start the hub plus the bridge publisher and listener.
pub fn spawn(
    config: &GatewayConfig,
    relations: Arc<dyn RelationStore>,
    bus: Arc<dyn EventBus>,
) -> Gateway {
    let node_id = prefixed_ulid(prefix::NODE);
    let (bus_tx, bus_rx) = mpsc::channel(config.hub_capacity);

    let (hub, hub_task) = Hub::spawn(node_id.clone(), config.hub_capacity, relations, Some(bus_tx));
    let publisher = tokio::spawn(bridge::run_publisher(bus.clone(), bus_rx));
    let listener = tokio::spawn(bridge::run_listener(
        bus,
        hub.clone(),
        node_id.clone(),
        config.bus_backoff_initial,
        config.bus_backoff_max,
    ));

    tracing::info!(node_id = %node_id, "gateway started");

    Gateway {
        emitter: Emitter::new(hub.clone()),
        hub,
        node_id,
        tasks: vec![hub_task, publisher, listener],
    }
}
