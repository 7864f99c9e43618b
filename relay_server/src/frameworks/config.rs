use crate::domain::Arena;
use crate::interface_adapters::net::ConnectionSettings;
use std::{
    env,
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

// Runtime/server settings read from the environment.

pub fn http_host() -> IpAddr {
    env::var("SERVER_HOST")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub fn http_port() -> u16 {
    env::var("SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000)
}

/// Static bearer token every client must present. Blank values count as unset.
pub fn auth_token() -> Option<String> {
    env::var("AUTH_TOKEN")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// Time allowed to write one batch of messages to a peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
// Time allowed between two inbound frames (pongs included).
pub const PONG_WAIT: Duration = Duration::from_secs(60);
// Must stay below PONG_WAIT so a healthy peer always answers in time.
pub const PING_PERIOD: Duration = Duration::from_secs(54);
pub const MAX_MESSAGE_SIZE: usize = 512;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub const HUB_COMMAND_CAPACITY: usize = 1024;
pub const WORLD_COMMAND_CAPACITY: usize = 1024;
pub const WORLD_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Everything needed to assemble a relay server.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub auth_token: String,
    pub arena: Arena,
    pub connection: ConnectionSettings,
    pub hub_command_capacity: usize,
    pub world_command_capacity: usize,
    pub world_report_interval: Duration,
}

impl RelaySettings {
    /// Default tunables with the given token.
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            arena: Arena::default(),
            connection: ConnectionSettings {
                write_wait: WRITE_WAIT,
                pong_wait: PONG_WAIT,
                ping_period: PING_PERIOD,
                max_message_size: MAX_MESSAGE_SIZE,
                outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            },
            hub_command_capacity: HUB_COMMAND_CAPACITY,
            world_command_capacity: WORLD_COMMAND_CAPACITY,
            world_report_interval: WORLD_REPORT_INTERVAL,
        }
    }

    /// Settings from the environment; `None` when no token is configured.
    pub fn from_env() -> Option<Self> {
        auth_token().map(Self::new)
    }
}
