use crate::interface_adapters::net::ConnectionSettings;
use crate::interface_adapters::utils::ids::ConnectionIds;
use crate::use_cases::{RelayStats, WorldHandle};
use std::sync::Arc;

pub struct AppState {
    // Single writer for the authoritative units mapping; fronts the hub.
    pub world: WorldHandle,
    pub stats: Arc<RelayStats>,
    // Token every upgrade request must present in its Authorization header.
    pub auth_token: Arc<str>,
    pub connection: ConnectionSettings,
    pub conn_ids: ConnectionIds,
}
