// Network adapter modules split by the server-side socket handler and the replica client.

pub mod client;
pub mod replica;

pub use client::{ConnectionSettings, ws_handler};
pub use replica::{ReplicaClient, ReplicaError};
