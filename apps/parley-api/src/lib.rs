pub mod auth;
pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use config::Config;
use db::kv::KeyValueStore;
use db::relations::RelationStore;
use gateway::emitter::Emitter;
use gateway::hub::HubHandle;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KeyValueStore>,
    pub relations: Arc<dyn RelationStore>,
    pub config: Arc<Config>,
    pub hub: HubHandle,
    pub emitter: Emitter,
}
