//! The node notification subscription: connect to the node's WebSocket
//! endpoint, register for the four notification kinds, and feed parsed
//! events into the dispatcher channels. Reconnects forever with a short
//! pause; the node re-delivers nothing, but ticket state self-repairs on
//! the next block.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Message, handshake::client::Request};
use tokio_tungstenite::{Connector, connect_async_tls_with_config};
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::events::EventSenders;
use crate::ws::types::{
    NTFN_BLOCK_CONNECTED, NTFN_NEW_TICKETS, NTFN_SPENT_MISSED, NTFN_WINNING_TICKETS, WsMessage,
    parse_block_connected_height, parse_new_tickets, parse_spent_missed, parse_winning_tickets,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct NodeWsConfig {
    pub ws_url: String,
    pub user: String,
    pub pass: String,
    pub cert: Option<PathBuf>,
}

/// Convert an HTTP RPC URL to the node's WebSocket endpoint.
pub fn http_to_ws_url(http_url: &str) -> String {
    let base = if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if http_url.starts_with("wss://") || http_url.starts_with("ws://") {
        http_url.to_string()
    } else {
        format!("wss://{http_url}")
    };
    if base.ends_with("/ws") {
        base
    } else {
        format!("{}/ws", base.trim_end_matches('/'))
    }
}

fn build_request(cfg: &NodeWsConfig) -> Result<Request> {
    let mut request = cfg
        .ws_url
        .as_str()
        .into_client_request()
        .context("bad node WebSocket URL")?;
    use base64::Engine as _;
    let token =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", cfg.user, cfg.pass));
    request.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Basic {token}")).context("bad RPC credentials")?,
    );
    Ok(request)
}

fn pinned_cert_connector(cert: &Path) -> Result<Connector> {
    let pem = std::fs::read(cert)
        .with_context(|| format!("failed to read node certificate {}", cert.display()))?;
    let mut roots = rustls::RootCertStore::empty();
    for der in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots
            .add(der.context("bad certificate PEM")?)
            .context("certificate rejected")?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Connector::Rustls(Arc::new(config)))
}

/// Run the notification subscription until cancelled.
pub async fn run_node_notifications(
    engine: Arc<Engine>,
    senders: EventSenders,
    cfg: NodeWsConfig,
) {
    info!(url = %cfg.ws_url, "starting node notification subscription");
    loop {
        match subscribe_loop(&engine, &senders, &cfg).await {
            Ok(()) => {
                warn!("node notification stream closed, reconnecting");
            }
            Err(e) => {
                error!("node notification stream failed: {e:#}");
                engine.metrics.node_ws_errors.inc();
            }
        }
        engine.metrics.node_ws_connected.set(0);

        tokio::select! {
            _ = engine.cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

async fn subscribe_loop(
    engine: &Arc<Engine>,
    senders: &EventSenders,
    cfg: &NodeWsConfig,
) -> Result<()> {
    let request = build_request(cfg)?;
    let connector = match &cfg.cert {
        Some(cert) => Some(pinned_cert_connector(cert)?),
        None => None,
    };
    let (ws_stream, _) = connect_async_tls_with_config(request, None, false, connector)
        .await
        .context("failed to connect to the node WebSocket")?;

    info!("node notification WebSocket connected");
    engine.metrics.node_ws_connected.set(1);

    let (mut write, mut read) = ws_stream.split();

    // Register for all four notification kinds on every (re)connect.
    for (id, method) in [
        "notifyblocks",
        "notifywinningtickets",
        "notifynewtickets",
        "notifyspentandmissedtickets",
    ]
    .iter()
    .enumerate()
    {
        let msg = serde_json::json!({
            "jsonrpc": "1.0",
            "id": id as u64 + 1,
            "method": method,
            "params": [],
        });
        write
            .send(Message::Text(msg.to_string()))
            .await
            .with_context(|| format!("failed to send {method}"))?;
    }

    loop {
        let msg = tokio::select! {
            _ = engine.cancel.cancelled() => return Ok(()),
            msg = read.next() => match msg {
                Some(msg) => msg.context("WebSocket receive error")?,
                None => return Ok(()),
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::Notification { method, params }) => {
                    dispatch(engine, senders, &method, &params).await?;
                }
                Ok(WsMessage::RequestResult { id, error: Some(e), .. }) => {
                    return Err(anyhow!("subscription {id} rejected: {}: {}", e.code, e.message));
                }
                Ok(WsMessage::RequestResult { id, .. }) => {
                    debug!(id, "subscription confirmed");
                }
                Err(e) => {
                    warn!(
                        "unparsable notification message: {e}, raw: {}",
                        &text[..text.len().min(200)]
                    );
                }
            },
            Message::Ping(data) => {
                write.send(Message::Pong(data)).await?;
            }
            Message::Close(_) => {
                info!("WebSocket closed by the node");
                return Ok(());
            }
            _ => {}
        }
    }
}

/// Route one notification. Malformed payloads are logged and dropped; a
/// closed event channel ends the subscription (shutdown).
async fn dispatch(
    engine: &Arc<Engine>,
    senders: &EventSenders,
    method: &str,
    params: &[serde_json::Value],
) -> Result<()> {
    match method {
        NTFN_BLOCK_CONNECTED => match parse_block_connected_height(params) {
            Ok(height) => {
                engine.metrics.best_block_height.set(height);
                engine
                    .metrics
                    .notifications_total
                    .with_label_values(&["blockconnected"])
                    .inc();
                info!(height, "block connected");
            }
            Err(e) => warn!("bad blockconnected notification: {e:#}"),
        },
        NTFN_NEW_TICKETS => match parse_new_tickets(params) {
            Ok(event) => senders
                .new_tickets
                .send(event)
                .await
                .map_err(|_| anyhow!("new-tickets handler is gone"))?,
            Err(e) => warn!("bad newtickets notification: {e:#}"),
        },
        NTFN_SPENT_MISSED => match parse_spent_missed(params) {
            Ok(event) => {
                // The handler must reach the wallet; hold the event until
                // the wallet link is up.
                engine.wallet.wait_connected().await;
                senders
                    .spent_missed
                    .send(event)
                    .await
                    .map_err(|_| anyhow!("spent-missed handler is gone"))?;
            }
            Err(e) => warn!("bad spentandmissedtickets notification: {e:#}"),
        },
        NTFN_WINNING_TICKETS => match parse_winning_tickets(params) {
            Ok(event) => senders
                .winning
                .send(event)
                .await
                .map_err(|_| anyhow!("winning-tickets handler is gone"))?,
            Err(e) => warn!("bad winningtickets notification: {e:#}"),
        },
        other => debug!(method = other, "ignoring notification"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_derivation() {
        assert_eq!(http_to_ws_url("https://127.0.0.1:19109"), "wss://127.0.0.1:19109/ws");
        assert_eq!(http_to_ws_url("http://localhost:9109/"), "ws://localhost:9109/ws");
        assert_eq!(http_to_ws_url("wss://node:9109/ws"), "wss://node:9109/ws");
        assert_eq!(http_to_ws_url("node:9109"), "wss://node:9109/ws");
    }
}
