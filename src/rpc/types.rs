//! JSON-RPC envelope types and the wallet/node result shapes the daemon
//! consumes. Operations the control API merely forwards keep their results
//! as raw JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC error codes the daemon branches on.
pub const ERR_NO_TX_INFO: i64 = -5;

#[derive(Debug, Error)]
pub enum RpcError {
    /// An error object returned by the server. Rendered as
    /// `"{code}: {message}"`; the duplicate-vote classifier prefix-matches
    /// this form.
    #[error("{code}: {message}")]
    Server { code: i64, message: String },
    #[error("wallet RPC is not connected")]
    WalletNotConnected,
    #[error("malformed response: {0}")]
    Protocol(String),
}

/// True when `err` is the wallet's "no information for transaction" answer,
/// which is suppressed rather than logged as a failure.
pub fn is_no_tx_info(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<RpcError>(),
        Some(RpcError::Server {
            code: ERR_NO_TX_INFO,
            ..
        })
    )
}

#[derive(Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: serde_json::Value,
}

#[derive(Deserialize, Debug)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct WalletInfoResult {
    #[serde(rename = "daemonconnected")]
    pub daemon_connected: bool,
    pub unlocked: bool,
    pub voting: bool,
    #[serde(rename = "votebits")]
    pub vote_bits: u16,
    #[serde(rename = "votebitsextended", default)]
    pub vote_bits_extended: String,
    #[serde(rename = "voteversion")]
    pub vote_version: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GetTransactionResult {
    pub hex: String,
    #[serde(rename = "blockhash", default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub details: Vec<GetTransactionDetail>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GetTransactionDetail {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub vout: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GenerateVoteResult {
    pub hex: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GetTicketsResult {
    pub hashes: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GetBestBlockResult {
    pub hash: String,
    pub height: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GetBlockHeaderVerboseResult {
    pub height: i64,
}
