use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stakevoted::config::Args;
use stakevoted::engine::Engine;
use stakevoted::metrics::{Metrics, metrics_handler};
use stakevoted::ws::NodeWsConfig;
use stakevoted::{control, events, logging, ws};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;
    let _log_guard = logging::init_logging(&args.log_dir)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        network = args.network.params().name,
        "stakevoted starting"
    );

    let metrics = Arc::new(Metrics::new()?);
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get({
            let metrics = metrics.clone();
            move || metrics_handler(metrics.clone())
        }),
    );
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.metrics_port);
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("bind metrics listener");
        axum::serve(listener, app).await.expect("serve metrics");
    });

    let cancel = CancellationToken::new();
    let engine = Engine::bootstrap(&args, metrics.clone(), cancel.clone()).await?;

    let (senders, receivers) = events::channels();
    let mut tasks = events::spawn_handlers(engine.clone(), receivers);
    tasks.push(engine.wallet.spawn_monitor(cancel.clone(), metrics.clone()));
    tasks.extend(engine.spawn_periodic_tasks());

    let ws_cfg = NodeWsConfig {
        ws_url: ws::http_to_ws_url(&args.node_rpc_url),
        user: args.node_rpc_user.clone(),
        pass: args.node_rpc_pass.clone(),
        cert: args.node_rpc_cert.clone(),
    };
    tasks.push(tokio::spawn(ws::run_node_notifications(
        engine.clone(),
        senders,
        ws_cfg,
    )));

    if !args.no_rpc_listen {
        let control_engine = engine.clone();
        let listen = args.rpc_listen;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = control::serve(control_engine, listen).await {
                error!("control API failed: {e:#}");
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to install the interrupt handler")?;
    info!("interrupt received, saving state and shutting down");

    match engine.save_snapshot().await {
        Ok(files) => info!(files, "state snapshot saved"),
        Err(e) => warn!("shutdown snapshot failed: {e:#}"),
    }
    cancel.cancel();
    for task in tasks {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }
    info!("shutdown complete");
    Ok(())
}
