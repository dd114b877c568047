use anyhow::Result;
use axum::http::{HeaderMap, HeaderValue};
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // === Connectivity ===
    pub wallet_connected: IntGauge,
    pub wallet_reconnects_total: IntCounter,
    pub node_ws_connected: IntGauge,
    pub node_ws_errors: IntCounter,
    pub best_block_height: IntGauge,

    // === Ticket inventory ===
    pub live_tickets: IntGauge,
    pub ignored_low_fee_tickets: IntGauge,
    pub added_low_fee_tickets: IntGauge,
    pub voting_users: IntGauge,

    // === Event handling ===
    pub notifications_total: IntCounterVec,

    // === Voting ===
    pub winning_blocks_total: IntCounter,
    pub votes_cast_total: IntCounter,
    pub votes_duplicate_total: IntCounter,
    pub votes_failed_total: IntCounter,
    /// Wall-clock seconds of the most recent winning-ticket fan-out.
    pub vote_round_seconds: Gauge,

    // === Snapshots ===
    pub snapshots_saved_total: IntCounter,
    pub snapshot_errors_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let wallet_connected = IntGauge::with_opts(Opts::new(
            "stakevoted_wallet_connected",
            "1 if the voting wallet RPC link is up, 0 otherwise",
        ))?;

        let wallet_reconnects_total = IntCounter::with_opts(Opts::new(
            "stakevoted_wallet_reconnects_total",
            "Number of times the wallet RPC client was rebuilt after a disconnect",
        ))?;

        let node_ws_connected = IntGauge::with_opts(Opts::new(
            "stakevoted_node_ws_connected",
            "1 if the node notification WebSocket is connected, 0 otherwise",
        ))?;

        let node_ws_errors = IntCounter::with_opts(Opts::new(
            "stakevoted_node_ws_errors",
            "Number of node WebSocket connection/message errors",
        ))?;

        let best_block_height = IntGauge::with_opts(Opts::new(
            "stakevoted_best_block_height",
            "Height of the most recent connected block",
        ))?;

        let live_tickets = IntGauge::with_opts(Opts::new(
            "stakevoted_live_tickets",
            "Number of tickets currently eligible to vote",
        ))?;

        let ignored_low_fee_tickets = IntGauge::with_opts(Opts::new(
            "stakevoted_ignored_low_fee_tickets",
            "Number of known tickets excluded for inadequate fees",
        ))?;

        let added_low_fee_tickets = IntGauge::with_opts(Opts::new(
            "stakevoted_added_low_fee_tickets",
            "Number of tickets in the administrator low-fee allowance",
        ))?;

        let voting_users = IntGauge::with_opts(Opts::new(
            "stakevoted_voting_users",
            "Number of users with stored voting preferences",
        ))?;

        let notifications_total = IntCounterVec::new(
            Opts::new(
                "stakevoted_notifications_total",
                "Node notifications received, by kind",
            ),
            &["kind"],
        )?;

        let winning_blocks_total = IntCounter::with_opts(Opts::new(
            "stakevoted_winning_blocks_total",
            "Number of winning-ticket events processed",
        ))?;

        let votes_cast_total = IntCounter::with_opts(Opts::new(
            "stakevoted_votes_cast_total",
            "Number of votes generated and broadcast",
        ))?;

        let votes_duplicate_total = IntCounter::with_opts(Opts::new(
            "stakevoted_votes_duplicate_total",
            "Number of votes the network already had",
        ))?;

        let votes_failed_total = IntCounter::with_opts(Opts::new(
            "stakevoted_votes_failed_total",
            "Number of vote attempts that failed outright",
        ))?;

        let vote_round_seconds = Gauge::with_opts(Opts::new(
            "stakevoted_vote_round_seconds",
            "Duration of the most recent winning-ticket fan-out in seconds",
        ))?;

        let snapshots_saved_total = IntCounter::with_opts(Opts::new(
            "stakevoted_snapshots_saved_total",
            "Number of state snapshot files written",
        ))?;

        let snapshot_errors_total = IntCounter::with_opts(Opts::new(
            "stakevoted_snapshot_errors_total",
            "Number of snapshot save failures",
        ))?;

        registry.register(Box::new(wallet_connected.clone()))?;
        registry.register(Box::new(wallet_reconnects_total.clone()))?;
        registry.register(Box::new(node_ws_connected.clone()))?;
        registry.register(Box::new(node_ws_errors.clone()))?;
        registry.register(Box::new(best_block_height.clone()))?;
        registry.register(Box::new(live_tickets.clone()))?;
        registry.register(Box::new(ignored_low_fee_tickets.clone()))?;
        registry.register(Box::new(added_low_fee_tickets.clone()))?;
        registry.register(Box::new(voting_users.clone()))?;
        registry.register(Box::new(notifications_total.clone()))?;
        registry.register(Box::new(winning_blocks_total.clone()))?;
        registry.register(Box::new(votes_cast_total.clone()))?;
        registry.register(Box::new(votes_duplicate_total.clone()))?;
        registry.register(Box::new(votes_failed_total.clone()))?;
        registry.register(Box::new(vote_round_seconds.clone()))?;
        registry.register(Box::new(snapshots_saved_total.clone()))?;
        registry.register(Box::new(snapshot_errors_total.clone()))?;

        Ok(Self {
            registry,
            wallet_connected,
            wallet_reconnects_total,
            node_ws_connected,
            node_ws_errors,
            best_block_height,
            live_tickets,
            ignored_low_fee_tickets,
            added_low_fee_tickets,
            voting_users,
            notifications_total,
            winning_blocks_total,
            votes_cast_total,
            votes_duplicate_total,
            votes_failed_total,
            vote_round_seconds,
            snapshots_saved_total,
            snapshot_errors_total,
        })
    }

    /// Mirror the ticket set sizes after a mutation.
    pub fn set_ticket_counts(&self, added: usize, ignored: usize, live: usize) {
        self.added_low_fee_tickets.set(added as i64);
        self.ignored_low_fee_tickets.set(ignored as i64);
        self.live_tickets.set(live as i64);
    }

    pub fn render(&self) -> (HeaderMap, String) {
        let families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("encode metrics");
        let body = String::from_utf8(buf).expect("utf8 metrics");

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_str(encoder.format_type()).unwrap(),
        );
        (headers, body)
    }
}

pub async fn metrics_handler(metrics: Arc<Metrics>) -> (HeaderMap, String) {
    metrics.render()
}
