//! The engine value: owns the ticket state, the resilient wallet, the node
//! client, the fee-address set and the snapshotter, and performs startup
//! reconciliation. Handler tasks share it behind an `Arc`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Args;
use crate::fees::evaluate_stake_pool_ticket;
use crate::hdkeys::{FEE_ADDRESS_COUNT, FeeAddressSet};
use crate::metrics::Metrics;
use crate::params::ChainParams;
use crate::prefs::{GlobalVotingConfig, HttpPrefsSource, UserVotingPrefs, VotingPrefsSource};
use crate::rpc::client::{NodeClient, NodeRpc, RpcEndpoint, WalletClient, WalletRpc};
use crate::rpc::resilient::{ResilientWallet, WalletFactory};
use crate::rpc::types::is_no_tx_info;
use crate::snapshot::{
    KIND_ADDED, KIND_USER_CONFIG, SNAPSHOT_INTERVAL_SECS, Snapshotter,
};
use crate::tickets::{StakeState, TicketMap};
use crate::wire::MsgTx;

/// Engine knobs lifted out of the full CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub pool_fees: f64,
    pub no_rpc_listen: bool,
    /// Testing only: abort when a winning ticket is missing from the live
    /// set, to catch state drift.
    pub halt_on_unknown_ticket: bool,
}

pub struct Engine {
    pub settings: EngineSettings,
    pub params: &'static ChainParams,
    pub fee_addresses: FeeAddressSet,
    pub global_voting: GlobalVotingConfig,
    pub state: RwLock<StakeState>,
    pub wallet: Arc<ResilientWallet>,
    pub node: Arc<dyn NodeRpc>,
    pub prefs_source: Option<Arc<dyn VotingPrefsSource>>,
    pub snapshotter: Snapshotter,
    pub metrics: Arc<Metrics>,
    pub cancel: CancellationToken,
}

impl Engine {
    /// Startup sequence: derive fees, connect wallet and node, load
    /// preferences (database first, disk fallback), prune old snapshots,
    /// reconcile the full ticket inventory against a stable chain tip, and
    /// restore the administrator low-fee allowance.
    pub async fn bootstrap(
        cfg: &Args,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let params = cfg.network.params();

        let fee_addresses =
            FeeAddressSet::derive(&cfg.cold_wallet_ext_pub, FEE_ADDRESS_COUNT, params)
                .context("failed to derive fee addresses")?;

        let wallet_endpoint = RpcEndpoint {
            url: cfg.wallet_rpc_url.clone(),
            user: cfg.wallet_rpc_user.clone(),
            pass: cfg.wallet_rpc_pass.clone(),
            cert: cfg.wallet_rpc_cert.clone(),
        };
        let factory: WalletFactory = Box::new(move || {
            let endpoint = wallet_endpoint.clone();
            Box::pin(async move {
                Ok(Arc::new(WalletClient::new(endpoint)?) as Arc<dyn WalletRpc>)
            })
        });
        let wallet = ResilientWallet::connect(factory)
            .await
            .context("failed to connect to the voting wallet")?;
        metrics.wallet_connected.set(1);

        let info = wallet.client().await.wallet_info().await?;
        if !info.daemon_connected {
            warn!("voting wallet reports no node connection");
        }
        if !info.voting {
            warn!("voting wallet reports voting disabled");
        }
        if !info.unlocked {
            warn!("voting wallet is locked; votes will fail to sign");
        }
        let global_voting = GlobalVotingConfig {
            vote_bits: info.vote_bits,
            vote_version: info.vote_version,
            vote_bits_extended: info.vote_bits_extended,
        };
        info!(
            vote_bits = global_voting.vote_bits,
            vote_version = global_voting.vote_version,
            "captured wallet voting configuration"
        );

        let prefs_source: Option<Arc<dyn VotingPrefsSource>> = match &cfg.prefs_url {
            Some(url) => Some(Arc::new(HttpPrefsSource::new(
                reqwest::Client::builder()
                    .connect_timeout(Duration::from_secs(5))
                    .timeout(Duration::from_secs(15))
                    .build()
                    .context("failed to build preferences HTTP client")?,
                url.clone(),
                cfg.prefs_user.clone(),
                cfg.prefs_pass.clone(),
            ))),
            None => None,
        };

        let mut user_config = HashMap::new();
        let mut prefs_unavailable = true;
        if let Some(source) = &prefs_source {
            match source.fetch_voting_prefs().await {
                Ok(map) => {
                    info!(users = map.len(), "loaded user voting preferences");
                    user_config = map;
                    prefs_unavailable = false;
                }
                Err(e) => warn!("preferences source unavailable: {e:#}"),
            }
        }

        let node_endpoint = RpcEndpoint {
            url: cfg.node_rpc_url.clone(),
            user: cfg.node_rpc_user.clone(),
            pass: cfg.node_rpc_pass.clone(),
            cert: cfg.node_rpc_cert.clone(),
        };
        let node: Arc<dyn NodeRpc> = Arc::new(NodeClient::new(node_endpoint)?);
        let tip = node
            .get_best_block()
            .await
            .context("failed to reach the node RPC")?;
        metrics.best_block_height.set(tip.height);
        info!(height = tip.height, hash = %tip.hash, "connected to node");

        let snapshotter = Snapshotter::new(&cfg.data_dir);
        match snapshotter.prune() {
            Ok(0) => {}
            Ok(n) => info!(files = n, "pruned old snapshots"),
            Err(e) => warn!("snapshot pruning failed: {e:#}"),
        }

        if prefs_unavailable && user_config.is_empty() {
            match snapshotter.load_latest::<HashMap<String, UserVotingPrefs>>(KIND_USER_CONFIG) {
                Ok(Some(map)) => {
                    info!(users = map.len(), "restored user preferences from disk");
                    user_config = map;
                }
                Ok(None) => info!("no stored user preferences; starting empty"),
                Err(e) => warn!("failed to restore user preferences: {e:#}"),
            }
        }
        // The allowance has no source but the control API; always restore it.
        let added = match snapshotter.load_ticket_map(KIND_ADDED) {
            Ok(map) => map,
            Err(e) => {
                warn!("failed to restore the low-fee allowance: {e:#}");
                TicketMap::new()
            }
        };

        metrics.voting_users.set(user_config.len() as i64);

        let engine = Arc::new(Engine {
            settings: EngineSettings {
                pool_fees: cfg.pool_fees,
                no_rpc_listen: cfg.no_rpc_listen,
                halt_on_unknown_ticket: cfg.halt_on_unknown_ticket,
            },
            params,
            fee_addresses,
            global_voting,
            state: RwLock::new(StakeState {
                pools: Default::default(),
                user_voting_config: user_config,
            }),
            wallet,
            node,
            prefs_source,
            snapshotter,
            metrics,
            cancel,
        });

        engine.reconcile_tickets().await?;

        {
            let mut state = engine.state.write().await;
            state.pools.replace_added(added);
            let (a, i, l) = state.pools.counts();
            engine.metrics.set_ticket_counts(a, i, l);
            info!(added = a, ignored = i, live = l, "ticket inventory ready");
        }

        Ok(engine)
    }

    /// Rebuild the live/ignored classification of every wallet-held ticket.
    /// Repeats until the chain tip is identical before and after the scan,
    /// so a block mined mid-enumeration cannot leave a ticket classified
    /// against stale state.
    pub async fn reconcile_tickets(&self) -> Result<()> {
        let wallet = self.wallet.client().await;
        let user_addrs: HashSet<String> = {
            let state = self.state.read().await;
            state.user_voting_config.keys().cloned().collect()
        };

        loop {
            let tip_before = self.node.get_best_block().await?;
            let tickets = wallet.get_tickets(true).await?;
            info!(
                tickets = tickets.len(),
                height = tip_before.height,
                "reconciling wallet tickets"
            );

            let mut live = TicketMap::new();
            let mut ignored = TicketMap::new();
            let mut height_cache: HashMap<String, i64> = HashMap::new();

            for hash in &tickets {
                let tx = match wallet.get_transaction(hash).await {
                    Ok(tx) => tx,
                    Err(e) if is_no_tx_info(&e) => continue,
                    Err(e) => {
                        warn!(ticket = %hash, "gettransaction failed: {e:#}");
                        continue;
                    }
                };
                let msa = match tx.details.iter().find(|d| user_addrs.contains(&d.address)) {
                    Some(detail) => detail.address.clone(),
                    None => continue,
                };
                // Unmined tickets are classified by the block that mines them.
                let block_hash = match &tx.block_hash {
                    Some(hash) => hash.clone(),
                    None => continue,
                };
                let purchase_height = match height_cache.get(&block_hash) {
                    Some(height) => *height,
                    None => {
                        let height = self.node.get_block_height(&block_hash).await?;
                        height_cache.insert(block_hash, height);
                        height
                    }
                };

                let msgtx = match MsgTx::deserialize_hex(&tx.hex) {
                    Ok(tx) => tx,
                    Err(e) => {
                        warn!(ticket = %hash, "unparsable ticket transaction: {e}");
                        continue;
                    }
                };
                match evaluate_stake_pool_ticket(
                    &msgtx,
                    purchase_height,
                    self.settings.pool_fees,
                    &self.fee_addresses,
                    self.params,
                ) {
                    Ok(true) => {
                        live.insert(*hash, msa);
                    }
                    Ok(false) => {
                        ignored.insert(*hash, msa);
                    }
                    Err(e) => {
                        warn!(ticket = %hash, "fee evaluation failed, skipping: {e:#}");
                    }
                }
            }

            let tip_after = self.node.get_best_block().await?;
            if tip_before.hash != tip_after.hash || tip_before.height != tip_after.height {
                info!(
                    before = tip_before.height,
                    after = tip_after.height,
                    "chain tip moved during reconciliation, retrying"
                );
                continue;
            }

            let mut state = self.state.write().await;
            state.pools.ingest_new_live(live, ignored);
            let (a, i, l) = state.pools.counts();
            self.metrics.set_ticket_counts(a, i, l);
            info!(live = l, ignored = i, height = tip_after.height, "reconciliation complete");
            return Ok(());
        }
    }

    /// Re-fetch the preferences map and replace the user config wholesale.
    pub async fn refresh_user_config(&self) -> Result<usize> {
        let source = self
            .prefs_source
            .as_ref()
            .context("no preferences source configured")?;
        let map = source.fetch_voting_prefs().await?;
        let users = map.len();
        self.state.write().await.user_voting_config = map;
        self.metrics.voting_users.set(users as i64);
        Ok(users)
    }

    /// Copy the persisted state under the reader lock, then encode and write
    /// it with no lock held.
    pub async fn save_snapshot(&self) -> Result<usize> {
        let (pools, user_config) = {
            let state = self.state.read().await;
            (state.pools.snapshot(), state.user_voting_config.clone())
        };
        match self.snapshotter.save(&pools, &user_config) {
            Ok(written) => {
                self.metrics.snapshots_saved_total.inc_by(written as u64);
                Ok(written)
            }
            Err(e) => {
                self.metrics.snapshot_errors_total.inc();
                Err(e)
            }
        }
    }

    /// Background upkeep: with a preferences source but no control listener,
    /// poll the source; with no source at all, snapshot periodically so a
    /// crash loses at most a few minutes of state.
    pub fn spawn_periodic_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        let interval = Duration::from_secs(SNAPSHOT_INTERVAL_SECS);

        if self.prefs_source.is_some() {
            if self.settings.no_rpc_listen {
                let engine = self.clone();
                tasks.push(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = engine.cancel.cancelled() => return,
                            _ = tokio::time::sleep(interval) => {}
                        }
                        match engine.refresh_user_config().await {
                            Ok(users) => info!(users, "refreshed user voting preferences"),
                            Err(e) => warn!("preferences refresh failed: {e:#}"),
                        }
                    }
                }));
            }
        } else {
            let engine = self.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = engine.cancel.cancelled() => return,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    if let Err(e) = engine.save_snapshot().await {
                        warn!("periodic snapshot failed: {e:#}");
                    }
                }
            }));
        }

        tasks
    }
}
