//! Block-event plumbing: one channel per notification kind, one long-lived
//! consumer task per channel, one short-lived worker task per event. The
//! consumers never process inline so a burst of blocks cannot make them
//! miss a notification.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::fees::evaluate_stake_pool_ticket;
use crate::rpc::client::WalletRpc;
use crate::rpc::types::is_no_tx_info;
use crate::tickets::TicketMap;
use crate::votes::{self, VoteItem, VoteOutcome, VoteSummary};
use crate::wire::{MsgTx, TxHash};

#[derive(Debug, Clone)]
pub struct NewTicketsEvent {
    pub block_hash: String,
    pub block_height: i64,
    pub tickets: Vec<TxHash>,
}

#[derive(Debug, Clone)]
pub struct SpentMissedEvent {
    pub block_hash: String,
    pub block_height: i64,
    /// Ticket hash to spent flag; false means missed.
    pub tickets: HashMap<TxHash, bool>,
}

#[derive(Debug, Clone)]
pub struct WinningTicketsEvent {
    pub block_hash: String,
    pub block_height: i64,
    pub tickets: Vec<TxHash>,
}

pub struct EventSenders {
    pub new_tickets: mpsc::Sender<NewTicketsEvent>,
    pub spent_missed: mpsc::Sender<SpentMissedEvent>,
    pub winning: mpsc::Sender<WinningTicketsEvent>,
}

pub struct EventReceivers {
    pub new_tickets: mpsc::Receiver<NewTicketsEvent>,
    pub spent_missed: mpsc::Receiver<SpentMissedEvent>,
    pub winning: mpsc::Receiver<WinningTicketsEvent>,
}

/// Rendezvous-sized channels: a sender parks until the consumer has turned
/// around, which is as close to unbuffered as the runtime offers.
pub fn channels() -> (EventSenders, EventReceivers) {
    let (new_tx, new_rx) = mpsc::channel(1);
    let (sm_tx, sm_rx) = mpsc::channel(1);
    let (win_tx, win_rx) = mpsc::channel(1);
    (
        EventSenders {
            new_tickets: new_tx,
            spent_missed: sm_tx,
            winning: win_tx,
        },
        EventReceivers {
            new_tickets: new_rx,
            spent_missed: sm_rx,
            winning: win_rx,
        },
    )
}

async fn handler_loop<E, F, Fut>(engine: Arc<Engine>, mut rx: mpsc::Receiver<E>, process: F)
where
    E: Send + 'static,
    F: Fn(Arc<Engine>, E) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = engine.cancel.cancelled() => return,
            event = rx.recv() => match event {
                Some(event) => {
                    tokio::spawn(process(engine.clone(), event));
                }
                None => return,
            }
        }
    }
}

/// Start the three consumer tasks.
pub fn spawn_handlers(engine: Arc<Engine>, receivers: EventReceivers) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(handler_loop(
            engine.clone(),
            receivers.new_tickets,
            process_new_tickets,
        )),
        tokio::spawn(handler_loop(
            engine.clone(),
            receivers.spent_missed,
            process_spent_missed,
        )),
        tokio::spawn(handler_loop(engine, receivers.winning, process_winning)),
    ]
}

struct UserTicket {
    hash: TxHash,
    multisig_address: String,
    hex: String,
}

/// Ask the wallet about one ticket; keep it only if it pays a known user.
async fn lookup_user_ticket(
    wallet: Arc<dyn WalletRpc>,
    users: Arc<HashSet<String>>,
    hash: TxHash,
) -> Option<UserTicket> {
    let resp = match wallet.get_transaction(&hash).await {
        Ok(resp) => resp,
        Err(e) if is_no_tx_info(&e) => {
            debug!(ticket = %hash, "wallet has no information for ticket");
            return None;
        }
        Err(e) => {
            warn!(ticket = %hash, "gettransaction failed: {e:#}");
            return None;
        }
    };
    let multisig_address = resp
        .details
        .iter()
        .find(|d| users.contains(&d.address))?
        .address
        .clone();
    Some(UserTicket {
        hash,
        multisig_address,
        hex: resp.hex,
    })
}

async fn lookup_tickets<I>(
    engine: &Arc<Engine>,
    wallet: &Arc<dyn WalletRpc>,
    tickets: I,
) -> Vec<UserTicket>
where
    I: IntoIterator<Item = TxHash>,
{
    let users: Arc<HashSet<String>> = {
        let state = engine.state.read().await;
        Arc::new(state.user_voting_config.keys().cloned().collect())
    };
    let lookups: Vec<_> = tickets
        .into_iter()
        .map(|hash| {
            let wallet = wallet.clone();
            let users = users.clone();
            tokio::spawn(lookup_user_ticket(wallet, users, hash))
        })
        .collect();
    join_all(lookups)
        .await
        .into_iter()
        .filter_map(|joined| joined.ok().flatten())
        .collect()
}

/// Classify a block's new tickets and merge them into the inventory.
pub async fn process_new_tickets(engine: Arc<Engine>, event: NewTicketsEvent) {
    engine.metrics.notifications_total.with_label_values(&["newtickets"]).inc();
    let wallet = engine.wallet.client().await;
    let found = lookup_tickets(&engine, &wallet, event.tickets.iter().copied()).await;

    let mut new_live = TicketMap::new();
    let mut new_ignored = TicketMap::new();
    for ticket in found {
        let tx = match MsgTx::deserialize_hex(&ticket.hex) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(ticket = %ticket.hash, "unparsable ticket transaction: {e}");
                continue;
            }
        };
        match evaluate_stake_pool_ticket(
            &tx,
            event.block_height,
            engine.settings.pool_fees,
            &engine.fee_addresses,
            engine.params,
        ) {
            Ok(true) => {
                new_live.insert(ticket.hash, ticket.multisig_address);
            }
            Ok(false) => {
                new_ignored.insert(ticket.hash, ticket.multisig_address);
            }
            Err(e) => {
                warn!(ticket = %ticket.hash, "fee evaluation failed, skipping: {e:#}");
            }
        }
    }

    let (accepted, rejected) = (new_live.len(), new_ignored.len());
    let (a, i, l) = {
        let mut state = engine.state.write().await;
        state.pools.ingest_new_live(new_live, new_ignored);
        state.pools.counts()
    };
    engine.metrics.set_ticket_counts(a, i, l);
    info!(
        block = %event.block_hash,
        height = event.block_height,
        tickets = event.tickets.len(),
        accepted,
        rejected,
        "processed new tickets"
    );
}

/// Drop a block's spent and missed tickets from circulation.
pub async fn process_spent_missed(engine: Arc<Engine>, event: SpentMissedEvent) {
    engine
        .metrics
        .notifications_total
        .with_label_values(&["spentmissed"])
        .inc();
    let wallet = engine.wallet.client().await;
    let found = lookup_tickets(&engine, &wallet, event.tickets.keys().copied()).await;

    let mut spent = Vec::new();
    let mut missed = Vec::new();
    for ticket in &found {
        if event.tickets.get(&ticket.hash).copied().unwrap_or(false) {
            spent.push(ticket.hash);
        } else {
            missed.push(ticket.hash);
        }
    }

    let (a, i, l) = {
        let mut state = engine.state.write().await;
        state.pools.retire(spent.iter().chain(missed.iter()));
        state.pools.counts()
    };
    engine.metrics.set_ticket_counts(a, i, l);
    info!(
        block = %event.block_hash,
        height = event.block_height,
        spent = spent.len(),
        missed = missed.len(),
        "retired spent and missed tickets"
    );
}

/// Vote every winning ticket we hold: resolve preferences under the reader
/// lock, then fan out one worker per ticket and join them before reporting.
pub async fn process_winning(engine: Arc<Engine>, event: WinningTicketsEvent) {
    let start = Instant::now();
    engine
        .metrics
        .notifications_total
        .with_label_values(&["winningtickets"])
        .inc();
    engine.metrics.winning_blocks_total.inc();

    let mut items = Vec::new();
    {
        let state = engine.state.read().await;
        for ticket in &event.tickets {
            let msa = match state.pools.live().get(ticket) {
                Some(msa) => msa.clone(),
                None => {
                    warn!(ticket = %ticket, "winning ticket is not in the live set");
                    if engine.settings.halt_on_unknown_ticket {
                        panic!("winning ticket {ticket} missing from the live set");
                    }
                    continue;
                }
            };
            let vote_bits = match state.user_voting_config.get(&msa) {
                Some(prefs) => engine.global_voting.effective_vote_bits(prefs),
                None => engine.global_voting.default_prefs(&msa).vote_bits,
            };
            items.push(VoteItem {
                ticket: *ticket,
                multisig_address: msa,
                vote_bits,
            });
        }
    }

    if items.is_empty() {
        info!(
            block = %event.block_hash,
            height = event.block_height,
            winners = event.tickets.len(),
            "no votable tickets this block"
        );
        return;
    }

    let wallet = engine.wallet.client().await;
    let workers: Vec<_> = items
        .into_iter()
        .map(|item| {
            tokio::spawn(votes::cast_vote(
                wallet.clone(),
                engine.node.clone(),
                event.block_hash.clone(),
                event.block_height,
                engine.global_voting.vote_bits_extended.clone(),
                item,
            ))
        })
        .collect();
    let outcomes: Vec<VoteOutcome> = join_all(workers)
        .await
        .into_iter()
        .filter_map(|joined| joined.ok())
        .collect();

    let summary = VoteSummary::tally(&outcomes);
    let elapsed = start.elapsed();
    engine.metrics.votes_cast_total.inc_by(summary.voted as u64);
    engine
        .metrics
        .votes_duplicate_total
        .inc_by(summary.duplicate as u64);
    engine
        .metrics
        .votes_failed_total
        .inc_by(summary.failed as u64);
    engine.metrics.vote_round_seconds.set(elapsed.as_secs_f64());

    info!(
        block = %event.block_hash,
        height = event.block_height,
        winners = event.tickets.len(),
        voted = summary.voted,
        duplicate = summary.duplicate,
        failed = summary.failed,
        ?elapsed,
        "processed winning tickets"
    );
}
