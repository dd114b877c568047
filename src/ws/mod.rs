mod client;
mod types;

pub use client::{NodeWsConfig, http_to_ws_url, run_node_notifications};
pub use types::*;
