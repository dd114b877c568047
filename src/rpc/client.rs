//! HTTP JSON-RPC clients for the voting wallet and the node, behind traits
//! so tests can substitute in-process fakes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::rpc::types::{
    GenerateVoteResult, GetBestBlockResult, GetBlockHeaderVerboseResult, GetTicketsResult,
    GetTransactionResult, RpcError, RpcRequest, RpcResponse, WalletInfoResult,
};
use crate::wire::TxHash;

/// Connection settings for one JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub url: String,
    pub user: String,
    pub pass: String,
    /// PEM certificate to pin for a self-signed RPC server.
    pub cert: Option<PathBuf>,
}

impl RpcEndpoint {
    fn build_http(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(concat!("stakevoted/", env!("CARGO_PKG_VERSION")));
        if let Some(cert) = &self.cert {
            let pem = std::fs::read(cert)
                .with_context(|| format!("failed to read RPC certificate {}", cert.display()))?;
            builder = builder.add_root_certificate(
                reqwest::Certificate::from_pem(&pem)
                    .with_context(|| format!("bad RPC certificate {}", cert.display()))?,
            );
        }
        builder.build().context("failed to build HTTP client")
    }
}

/// Shared JSON-RPC plumbing: authenticated POST, transient-failure retry,
/// error-object unwrapping.
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: RpcEndpoint,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(endpoint: RpcEndpoint) -> Result<Self> {
        Ok(Self {
            http: endpoint.build_http()?,
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.endpoint.url
    }

    pub async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let req = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let raw = self.post_json(serde_json::to_value(&req)?).await?;
        let parsed: RpcResponse<T> = serde_json::from_value(raw)
            .with_context(|| format!("failed to parse {method} response"))?;
        if let Some(e) = parsed.error {
            return Err(RpcError::Server {
                code: e.code,
                message: e.message,
            }
            .into());
        }
        parsed
            .result
            .ok_or_else(|| RpcError::Protocol(format!("{method}: missing result")).into())
    }

    /// Like `call` for methods whose success result is JSON null.
    pub async fn call_unit(&self, method: &str, params: serde_json::Value) -> Result<()> {
        let req = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let raw = self.post_json(serde_json::to_value(&req)?).await?;
        let parsed: RpcResponse<serde_json::Value> = serde_json::from_value(raw)
            .with_context(|| format!("failed to parse {method} response"))?;
        if let Some(e) = parsed.error {
            return Err(RpcError::Server {
                code: e.code,
                message: e.message,
            }
            .into());
        }
        Ok(())
    }

    async fn post_json(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let mut attempt: u32 = 0;
        let mut backoff = Duration::from_millis(250);
        let max_attempts = 4;

        loop {
            attempt += 1;

            let resp = self
                .http
                .post(&self.endpoint.url)
                .basic_auth(&self.endpoint.user, Some(&self.endpoint.pass))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(resp) => {
                    // Retry 5xx; RPC-level errors come back in the body.
                    if resp.status().is_server_error() {
                        if attempt >= max_attempts {
                            let status = resp.status();
                            let text = resp.text().await.unwrap_or_default();
                            return Err(anyhow!(
                                "RPC {0} server error {status}: {text}",
                                self.endpoint.url
                            ));
                        }
                        tokio::time::sleep(backoff).await;
                        backoff = std::cmp::min(backoff * 2, Duration::from_secs(2));
                        continue;
                    }

                    let status = resp.status();
                    let v: serde_json::Value = resp.json().await.context("failed to parse JSON")?;
                    if !status.is_success() {
                        return Err(anyhow!("HTTP status {status}: {v}"));
                    }
                    return Ok(v);
                }

                Err(e) => {
                    // Retry only on transient-ish failures
                    let retryable = e.is_timeout() || e.is_connect() || e.is_request();
                    if !retryable || attempt >= max_attempts {
                        return Err(anyhow!("HTTP POST to {0} failed", self.endpoint.url).context(e));
                    }
                    warn!(
                        "RPC request failed (attempt {attempt}/{max_attempts}): {e}. Retrying in {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_secs(2));
                }
            }
        }
    }
}

/// Everything the daemon asks of the voting wallet.
#[async_trait]
pub trait WalletRpc: Send + Sync {
    /// Cheap liveness probe used by the reconnect monitor.
    async fn check_connection(&self) -> Result<()>;

    async fn wallet_info(&self) -> Result<WalletInfoResult>;

    async fn get_transaction(&self, hash: &TxHash) -> Result<GetTransactionResult>;

    async fn generate_vote(
        &self,
        block_hash: &str,
        block_height: i64,
        ticket: &TxHash,
        vote_bits: u16,
        vote_bits_ext: &str,
    ) -> Result<GenerateVoteResult>;

    async fn get_tickets(&self, include_immature: bool) -> Result<Vec<TxHash>>;

    async fn import_script(&self, script: &[u8], rescan: bool, scan_from: i64) -> Result<()>;

    async fn list_scripts(&self) -> Result<serde_json::Value>;

    async fn account_sync_address_index(
        &self,
        account: &str,
        branch: u32,
        index: u32,
    ) -> Result<()>;

    async fn stake_pool_user_info(&self, multisig_address: &str) -> Result<serde_json::Value>;

    async fn validate_address(&self, address: &str) -> Result<serde_json::Value>;

    async fn create_multisig(
        &self,
        required: u32,
        addresses: &[String],
    ) -> Result<serde_json::Value>;

    async fn get_stake_info(&self) -> Result<serde_json::Value>;

    async fn add_ticket(&self, tx_hex: &str) -> Result<()>;

    async fn get_best_block(&self) -> Result<GetBestBlockResult>;
}

/// Everything the daemon asks of the node.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn get_best_block(&self) -> Result<GetBestBlockResult>;

    async fn get_block_height(&self, block_hash: &str) -> Result<i64>;

    async fn get_raw_transaction(&self, hash: &TxHash) -> Result<String>;

    /// Broadcasts the transaction; returns its id.
    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<String>;
}

pub struct WalletClient {
    rpc: JsonRpcClient,
}

impl WalletClient {
    pub fn new(endpoint: RpcEndpoint) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(endpoint)?,
        })
    }
}

#[async_trait]
impl WalletRpc for WalletClient {
    async fn check_connection(&self) -> Result<()> {
        let _: serde_json::Value = self.rpc.call("version", json!([])).await?;
        Ok(())
    }

    async fn wallet_info(&self) -> Result<WalletInfoResult> {
        self.rpc.call("walletinfo", json!([])).await
    }

    async fn get_transaction(&self, hash: &TxHash) -> Result<GetTransactionResult> {
        self.rpc
            .call("gettransaction", json!([hash.to_string()]))
            .await
    }

    async fn generate_vote(
        &self,
        block_hash: &str,
        block_height: i64,
        ticket: &TxHash,
        vote_bits: u16,
        vote_bits_ext: &str,
    ) -> Result<GenerateVoteResult> {
        self.rpc
            .call(
                "generatevote",
                json!([
                    block_hash,
                    block_height,
                    ticket.to_string(),
                    vote_bits,
                    vote_bits_ext
                ]),
            )
            .await
    }

    async fn get_tickets(&self, include_immature: bool) -> Result<Vec<TxHash>> {
        let result: GetTicketsResult = self.rpc.call("gettickets", json!([include_immature])).await?;
        result
            .hashes
            .iter()
            .map(|h| h.parse().map_err(anyhow::Error::from))
            .collect()
    }

    async fn import_script(&self, script: &[u8], rescan: bool, scan_from: i64) -> Result<()> {
        self.rpc
            .call_unit(
                "importscript",
                json!([hex::encode(script), rescan, scan_from]),
            )
            .await
    }

    async fn list_scripts(&self) -> Result<serde_json::Value> {
        self.rpc.call("listscripts", json!([])).await
    }

    async fn account_sync_address_index(
        &self,
        account: &str,
        branch: u32,
        index: u32,
    ) -> Result<()> {
        self.rpc
            .call_unit("accountsyncaddressindex", json!([account, branch, index]))
            .await
    }

    async fn stake_pool_user_info(&self, multisig_address: &str) -> Result<serde_json::Value> {
        self.rpc
            .call("stakepooluserinfo", json!([multisig_address]))
            .await
    }

    async fn validate_address(&self, address: &str) -> Result<serde_json::Value> {
        self.rpc.call("validateaddress", json!([address])).await
    }

    async fn create_multisig(
        &self,
        required: u32,
        addresses: &[String],
    ) -> Result<serde_json::Value> {
        self.rpc
            .call("createmultisig", json!([required, addresses]))
            .await
    }

    async fn get_stake_info(&self) -> Result<serde_json::Value> {
        self.rpc.call("getstakeinfo", json!([])).await
    }

    async fn add_ticket(&self, tx_hex: &str) -> Result<()> {
        self.rpc.call_unit("addticket", json!([tx_hex])).await
    }

    async fn get_best_block(&self) -> Result<GetBestBlockResult> {
        self.rpc.call("getbestblock", json!([])).await
    }
}

pub struct NodeClient {
    rpc: JsonRpcClient,
}

impl NodeClient {
    pub fn new(endpoint: RpcEndpoint) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(endpoint)?,
        })
    }
}

#[async_trait]
impl NodeRpc for NodeClient {
    async fn get_best_block(&self) -> Result<GetBestBlockResult> {
        self.rpc.call("getbestblock", json!([])).await
    }

    async fn get_block_height(&self, block_hash: &str) -> Result<i64> {
        let header: GetBlockHeaderVerboseResult = self
            .rpc
            .call("getblockheader", json!([block_hash, true]))
            .await?;
        Ok(header.height)
    }

    async fn get_raw_transaction(&self, hash: &TxHash) -> Result<String> {
        self.rpc
            .call("getrawtransaction", json!([hash.to_string()]))
            .await
    }

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<String> {
        self.rpc.call("sendrawtransaction", json!([tx_hex])).await
    }
}
