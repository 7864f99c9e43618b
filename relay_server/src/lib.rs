pub mod domain;
pub mod frameworks;
pub mod interface_adapters;
pub mod use_cases;

pub use frameworks::config::{RelaySettings, http_port};
pub use frameworks::server::{router, run, run_with_config};
pub use interface_adapters::net::{ConnectionSettings, ReplicaClient, ReplicaError};
