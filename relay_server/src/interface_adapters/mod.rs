// Interface adapters: wire protocol, auth and network handling.

pub mod auth;
pub mod http;
pub mod net;
pub mod protocol;
pub mod state;
pub mod utils;
