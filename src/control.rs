//! The control API the pool's web front-end drives: ticket-set inspection,
//! wholesale preference/allowance replacement, and wallet passthroughs.
//! Every operation fails fast while the wallet link is down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::prefs::UserVotingPrefs;
use crate::rpc::types::RpcError;
use crate::tickets::TicketMap;
use crate::wire::TxHash;

/// Deadline for operations that are nothing but map copies.
const BASIC_DEADLINE: Duration = Duration::from_millis(100);

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn wallet_not_connected() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: RpcError::WalletNotConnected.to_string(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn deadline() -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            message: "deadline exceeded".into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        warn!("control API operation failed: {err:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn wallet_gate(engine: &Engine) -> Result<(), ApiError> {
    if engine.wallet.is_connected() {
        Ok(())
    } else {
        Err(ApiError::wallet_not_connected())
    }
}

/// Copy one of the ticket sets under the basic-operation deadline.
async fn copy_tickets<F>(engine: &Engine, pick: F) -> Result<Vec<TicketEntry>, ApiError>
where
    F: FnOnce(&crate::tickets::TicketPools) -> TicketMap,
{
    let copied = tokio::time::timeout(BASIC_DEADLINE, async {
        let state = engine.state.read().await;
        pick(&state.pools)
    })
    .await
    .map_err(|_| ApiError::deadline())?;

    let mut tickets: Vec<TicketEntry> = copied
        .into_iter()
        .map(|(hash, address)| TicketEntry { hash, address })
        .collect();
    tickets.sort_by_key(|t| t.hash);
    Ok(tickets)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketEntry {
    pub hash: TxHash,
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketListResponse {
    pub tickets: Vec<TicketEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetTicketsRequest {
    /// The complete desired allowance; the previous set is replaced, not
    /// merged.
    pub tickets: Vec<TicketEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountsResponse {
    pub added: usize,
    pub ignored: usize,
    pub live: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetPrefsRequest {
    pub users: Vec<UserVotingPrefs>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportScriptRequest {
    /// Redeem script, hex encoded.
    pub script: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportScriptResponse {
    pub height: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportMissingScriptsRequest {
    pub scripts: Vec<String>,
    pub rescan_height: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncAddressIndexRequest {
    pub account: String,
    pub branch: u32,
    pub index: u32,
}

#[derive(Debug, Deserialize)]
pub struct GetTicketsQuery {
    #[serde(default)]
    pub include_immature: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketHashesResponse {
    pub hashes: Vec<TxHash>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddMissingTicketRequest {
    pub hash: TxHash,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserInfoRequest {
    pub multisig_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletInfoResponse {
    pub voting: bool,
    pub unlocked: bool,
    pub daemon_connected: bool,
    pub vote_version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateAddressRequest {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMultisigRequest {
    pub required: u32,
    pub addresses: Vec<String>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/v1/version", get(version))
        .route("/api/v1/ping", get(ping))
        .route("/api/v1/tickets/added", get(get_added).post(set_added))
        .route("/api/v1/tickets/ignored", get(get_ignored))
        .route("/api/v1/tickets/live", get(get_live))
        .route("/api/v1/voting-prefs", post(set_user_voting_prefs))
        .route("/api/v1/scripts", get(list_scripts))
        .route("/api/v1/scripts/import", post(import_new_script))
        .route("/api/v1/scripts/import-missing", post(import_missing_scripts))
        .route("/api/v1/address-index/sync", post(account_sync_address_index))
        .route("/api/v1/tickets", get(get_tickets))
        .route("/api/v1/tickets/missing", post(add_missing_ticket))
        .route("/api/v1/user-info", post(stake_pool_user_info))
        .route("/api/v1/wallet-info", get(wallet_info))
        .route("/api/v1/address/validate", post(validate_address))
        .route("/api/v1/multisig", post(create_multisig))
        .route("/api/v1/stake-info", get(get_stake_info))
        .with_state(engine)
}

/// Bind and serve the control API until the engine is cancelled.
pub async fn serve(engine: Arc<Engine>, listen: SocketAddr) -> Result<()> {
    let cancel = engine.cancel.clone();
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "control API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn version(State(engine): State<Arc<Engine>>) -> ApiResult<VersionResponse> {
    wallet_gate(&engine)?;
    Ok(Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
        minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
        patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
    }))
}

async fn ping(State(engine): State<Arc<Engine>>) -> ApiResult<PingResponse> {
    wallet_gate(&engine)?;
    Ok(Json(PingResponse {
        status: "ok".to_string(),
    }))
}

async fn get_added(State(engine): State<Arc<Engine>>) -> ApiResult<TicketListResponse> {
    wallet_gate(&engine)?;
    let tickets = copy_tickets(&engine, |pools| pools.added().clone()).await?;
    Ok(Json(TicketListResponse { tickets }))
}

async fn get_ignored(State(engine): State<Arc<Engine>>) -> ApiResult<TicketListResponse> {
    wallet_gate(&engine)?;
    let tickets = copy_tickets(&engine, |pools| pools.ignored().clone()).await?;
    Ok(Json(TicketListResponse { tickets }))
}

async fn get_live(State(engine): State<Arc<Engine>>) -> ApiResult<TicketListResponse> {
    wallet_gate(&engine)?;
    let tickets = copy_tickets(&engine, |pools| pools.live().clone()).await?;
    Ok(Json(TicketListResponse { tickets }))
}

async fn set_added(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<SetTicketsRequest>,
) -> ApiResult<CountsResponse> {
    wallet_gate(&engine)?;
    let new: TicketMap = req
        .tickets
        .into_iter()
        .map(|t| (t.hash, t.address))
        .collect();

    let (added, ignored, live) = {
        let mut state = engine.state.write().await;
        state.pools.replace_added(new);
        state.pools.counts()
    };
    engine.metrics.set_ticket_counts(added, ignored, live);
    info!(added, "replaced low-fee ticket allowance");
    Ok(Json(CountsResponse {
        added,
        ignored,
        live,
    }))
}

async fn set_user_voting_prefs(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<SetPrefsRequest>,
) -> ApiResult<UsersResponse> {
    wallet_gate(&engine)?;
    let map: std::collections::HashMap<String, UserVotingPrefs> = req
        .users
        .into_iter()
        .map(|u| (u.multisig_address.clone(), u))
        .collect();
    let users = map.len();
    engine.state.write().await.user_voting_config = map;
    engine.metrics.voting_users.set(users as i64);
    info!(users, "replaced user voting preferences");
    Ok(Json(UsersResponse { users }))
}

async fn list_scripts(State(engine): State<Arc<Engine>>) -> ApiResult<serde_json::Value> {
    wallet_gate(&engine)?;
    let wallet = engine.wallet.client().await;
    Ok(Json(wallet.list_scripts().await?))
}

async fn import_new_script(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ImportScriptRequest>,
) -> ApiResult<ImportScriptResponse> {
    wallet_gate(&engine)?;
    let script =
        hex::decode(&req.script).map_err(|e| ApiError::bad_request(format!("bad script: {e}")))?;
    let wallet = engine.wallet.client().await;
    wallet.import_script(&script, false, 0).await?;
    let best = wallet.get_best_block().await?;
    Ok(Json(ImportScriptResponse {
        height: best.height,
    }))
}

async fn import_missing_scripts(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ImportMissingScriptsRequest>,
) -> ApiResult<UsersResponse> {
    wallet_gate(&engine)?;
    let mut scripts = Vec::with_capacity(req.scripts.len());
    for raw in &req.scripts {
        scripts
            .push(hex::decode(raw).map_err(|e| ApiError::bad_request(format!("bad script: {e}")))?);
    }

    // Import everything without rescanning, then let the final import
    // trigger one rescan covering them all.
    let wallet = engine.wallet.client().await;
    if let Some((last, rest)) = scripts.split_last() {
        for script in rest {
            wallet.import_script(script, false, 0).await?;
        }
        wallet
            .import_script(last, true, req.rescan_height)
            .await?;
        info!(
            scripts = scripts.len(),
            rescan_height = req.rescan_height,
            "imported missing scripts"
        );
    }
    Ok(Json(UsersResponse {
        users: scripts.len(),
    }))
}

async fn account_sync_address_index(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<SyncAddressIndexRequest>,
) -> ApiResult<PingResponse> {
    wallet_gate(&engine)?;
    let wallet = engine.wallet.client().await;
    wallet
        .account_sync_address_index(&req.account, req.branch, req.index)
        .await?;
    Ok(Json(PingResponse {
        status: "ok".to_string(),
    }))
}

async fn get_tickets(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<GetTicketsQuery>,
) -> ApiResult<TicketHashesResponse> {
    wallet_gate(&engine)?;
    let wallet = engine.wallet.client().await;
    let hashes = wallet.get_tickets(query.include_immature).await?;
    Ok(Json(TicketHashesResponse { hashes }))
}

async fn add_missing_ticket(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<AddMissingTicketRequest>,
) -> ApiResult<PingResponse> {
    wallet_gate(&engine)?;
    let tx_hex = engine.node.get_raw_transaction(&req.hash).await?;
    let wallet = engine.wallet.client().await;
    wallet.add_ticket(&tx_hex).await?;
    info!(ticket = %req.hash, "added missing ticket to the wallet");
    Ok(Json(PingResponse {
        status: "ok".to_string(),
    }))
}

async fn stake_pool_user_info(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<UserInfoRequest>,
) -> ApiResult<serde_json::Value> {
    wallet_gate(&engine)?;
    let wallet = engine.wallet.client().await;
    Ok(Json(wallet.stake_pool_user_info(&req.multisig_address).await?))
}

async fn wallet_info(State(engine): State<Arc<Engine>>) -> ApiResult<WalletInfoResponse> {
    wallet_gate(&engine)?;
    let wallet = engine.wallet.client().await;
    let info = wallet.wallet_info().await?;
    Ok(Json(WalletInfoResponse {
        voting: info.voting,
        unlocked: info.unlocked,
        daemon_connected: info.daemon_connected,
        vote_version: info.vote_version,
    }))
}

async fn validate_address(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ValidateAddressRequest>,
) -> ApiResult<serde_json::Value> {
    wallet_gate(&engine)?;
    let wallet = engine.wallet.client().await;
    Ok(Json(wallet.validate_address(&req.address).await?))
}

async fn create_multisig(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<CreateMultisigRequest>,
) -> ApiResult<serde_json::Value> {
    wallet_gate(&engine)?;
    let wallet = engine.wallet.client().await;
    Ok(Json(wallet.create_multisig(req.required, &req.addresses).await?))
}

async fn get_stake_info(State(engine): State<Arc<Engine>>) -> ApiResult<serde_json::Value> {
    wallet_gate(&engine)?;
    let wallet = engine.wallet.client().await;
    Ok(Json(wallet.get_stake_info().await?))
}
