use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::params::{Network, valid_pool_fee_rate};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Network to vote on
    #[arg(long, value_enum, default_value = "main")]
    pub network: Network,

    /// Voting wallet JSON-RPC URL
    #[arg(long, default_value = "https://127.0.0.1:9110")]
    pub wallet_rpc_url: String,

    /// Voting wallet RPC username
    #[arg(long)]
    pub wallet_rpc_user: String,

    /// Voting wallet RPC password
    #[arg(long)]
    pub wallet_rpc_pass: String,

    /// Voting wallet RPC certificate (PEM) for a self-signed server
    #[arg(long)]
    pub wallet_rpc_cert: Option<PathBuf>,

    /// Node JSON-RPC URL (notifications use its WebSocket endpoint)
    #[arg(long, default_value = "https://127.0.0.1:9109")]
    pub node_rpc_url: String,

    /// Node RPC username
    #[arg(long)]
    pub node_rpc_user: String,

    /// Node RPC password
    #[arg(long)]
    pub node_rpc_pass: String,

    /// Node RPC certificate (PEM) for a self-signed server
    #[arg(long)]
    pub node_rpc_cert: Option<PathBuf>,

    /// Preferences endpoint serving the user voting table as JSON
    #[arg(long)]
    pub prefs_url: Option<String>,

    /// Preferences endpoint username
    #[arg(long)]
    pub prefs_user: Option<String>,

    /// Preferences endpoint password
    #[arg(long)]
    pub prefs_pass: Option<String>,

    /// Directory for state snapshots
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Pool fee percentage tickets must commit (0.01 through 100)
    #[arg(long)]
    pub pool_fees: f64,

    /// Cold wallet extended public key the fee addresses derive from
    #[arg(long)]
    pub cold_wallet_ext_pub: String,

    /// Control API listen address
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub rpc_listen: SocketAddr,

    /// Disable the control API and poll the preferences endpoint instead
    #[arg(long)]
    pub no_rpc_listen: bool,

    /// Directory to write logs to
    #[arg(long, default_value = "logs")]
    pub log_dir: String,

    /// Port to serve metrics on
    #[arg(long, default_value_t = 7999)]
    pub metrics_port: u16,

    /// Halt when a winning ticket is missing from the live set (testing)
    #[arg(long, hide = true)]
    pub halt_on_unknown_ticket: bool,
}

impl Args {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !valid_pool_fee_rate(self.pool_fees) {
            anyhow::bail!(
                "--pool-fees {} is out of range (0.01 through 100)",
                self.pool_fees
            );
        }
        if self.cold_wallet_ext_pub.trim().is_empty() {
            anyhow::bail!("--cold-wallet-ext-pub must not be empty");
        }
        if self.prefs_url.is_none() && self.no_rpc_listen {
            anyhow::bail!("--no-rpc-listen requires --prefs-url; preferences would be unreachable");
        }
        Ok(())
    }
}
