//! A wallet RPC handle that survives wallet restarts. A background monitor
//! probes the link every ten seconds; on failure it re-arms the connected
//! signal, rebuilds the client from the original configuration on a fixed
//! five-second cadence, and swaps the new client in once it answers.
//!
//! Consumers that must not run against a dead wallet await
//! [`ResilientWallet::wait_connected`] before issuing calls; the control API
//! polls [`ResilientWallet::is_connected`] to fail fast instead.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::Metrics;
use crate::rpc::client::WalletRpc;

const PROBE_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Builds a fresh wallet client from the daemon's original configuration.
pub type WalletFactory =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn WalletRpc>>> + Send + Sync>;

pub struct ResilientWallet {
    factory: WalletFactory,
    client: RwLock<Arc<dyn WalletRpc>>,
    connected: watch::Sender<bool>,
}

impl ResilientWallet {
    /// Connect and verify the wallet once; fails fatally if the wallet is
    /// unreachable at startup.
    pub async fn connect(factory: WalletFactory) -> Result<Arc<Self>> {
        let client = (factory)().await?;
        client
            .check_connection()
            .await
            .context("initial wallet connection check failed")?;
        let (connected, _) = watch::channel(true);
        Ok(Arc::new(Self {
            factory,
            client: RwLock::new(client),
            connected,
        }))
    }

    /// Current wallet client. Callers clone the handle out; the lock is
    /// never held across a call.
    pub async fn client(&self) -> Arc<dyn WalletRpc> {
        self.client.read().await.clone()
    }

    /// Non-blocking poll of the connected signal.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// The connected signal itself: fired (passes immediately) while the
    /// wallet link is up, armed (blocks) while it is down.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Block until the wallet link is up.
    pub async fn wait_connected(&self) {
        let mut rx = self.connected();
        // Only fails if the sender is gone, which cannot outlive self.
        let _ = rx.wait_for(|up| *up).await;
    }

    /// Start the background prober. Stops when `cancel` fires.
    pub fn spawn_monitor(
        self: &Arc<Self>,
        cancel: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(PROBE_INTERVAL) => {}
                }

                let client = this.client().await;
                if let Err(e) = client.check_connection().await {
                    warn!("wallet connection check failed: {e:#}");
                    this.connected.send_replace(false);
                    metrics.wallet_connected.set(0);
                    if !this.reconnect_loop(&cancel, &metrics).await {
                        return;
                    }
                }
            }
        })
    }

    /// Retry until a rebuilt client answers, then swap it in and fire the
    /// connected signal. Returns false when cancelled.
    async fn reconnect_loop(&self, cancel: &CancellationToken, metrics: &Arc<Metrics>) -> bool {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }

            let fresh = match (self.factory)().await {
                Ok(client) => client,
                Err(e) => {
                    error!("wallet reconnect failed: {e:#}");
                    continue;
                }
            };
            if let Err(e) = fresh.check_connection().await {
                error!("reconnected wallet is not answering: {e:#}");
                continue;
            }

            *self.client.write().await = fresh;
            self.connected.send_replace(true);
            metrics.wallet_connected.set(1);
            metrics.wallet_reconnects_total.inc();
            info!("wallet connection re-established");
            return true;
        }
    }
}
