// Use cases layer: the world owner task, the hub dispatcher and shared counters.

pub mod hub;
pub mod stats;
pub mod world_task;

pub use hub::{ConnectionId, Hub, HubClosed, OutboundTx};
pub use stats::{RelayStats, StatsSnapshot};
pub use world_task::{JoinedUnit, WorldClosed, WorldHandle};
