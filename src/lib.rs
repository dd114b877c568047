pub mod address;
pub mod blake256;
pub mod config;
pub mod control;
pub mod engine;
pub mod events;
pub mod fees;
pub mod hdkeys;
pub mod logging;
pub mod metrics;
pub mod params;
pub mod prefs;
pub mod rpc;
pub mod snapshot;
pub mod tickets;
pub mod votes;
pub mod wire;
pub mod ws;

pub use metrics::Metrics;
pub use wire::TxHash;
