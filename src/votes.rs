//! The per-ticket vote worker: generate a signed vote on the wallet,
//! decode it, broadcast it on the node, and classify the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::rpc::client::{NodeRpc, WalletRpc};
use crate::wire::{MsgTx, TxHash};

/// Error prefix the node returns for a vote it has already seen. Protocol
/// constant; matched on the rendered error string.
pub const DUPLICATE_VOTE_ERR_PREFIX: &str = "-32603: already have transaction";

/// One winning ticket ready to vote, preferences already resolved.
#[derive(Debug, Clone)]
pub struct VoteItem {
    pub ticket: TxHash,
    pub multisig_address: String,
    pub vote_bits: u16,
}

#[derive(Debug, Clone)]
pub enum VoteResult {
    /// Broadcast succeeded; the network-assigned vote transaction id.
    Voted(String),
    /// The network already had this vote; the id embedded in the error
    /// message, when one could be parsed out.
    Duplicate(Option<String>),
    Failed(String),
}

#[derive(Debug)]
pub struct VoteOutcome {
    pub ticket: TxHash,
    pub result: VoteResult,
    pub elapsed: Duration,
}

/// True when the rendered error means the vote was already on the network.
pub fn is_duplicate_vote(msg: &str) -> bool {
    msg.starts_with(DUPLICATE_VOTE_ERR_PREFIX)
}

/// Transaction id embedded in a duplicate-vote error message.
pub fn embedded_tx_id(msg: &str) -> Option<String> {
    let rest = msg.strip_prefix(DUPLICATE_VOTE_ERR_PREFIX)?.trim();
    let id = rest.split_whitespace().next()?;
    id.parse::<TxHash>().ok().map(|h| h.to_string())
}

pub async fn cast_vote(
    wallet: Arc<dyn WalletRpc>,
    node: Arc<dyn NodeRpc>,
    block_hash: String,
    block_height: i64,
    vote_bits_ext: String,
    item: VoteItem,
) -> VoteOutcome {
    let start = Instant::now();
    let result =
        cast_vote_inner(&*wallet, &*node, &block_hash, block_height, &vote_bits_ext, &item).await;
    let elapsed = start.elapsed();

    match &result {
        VoteResult::Voted(tx_id) => {
            info!(
                ticket = %item.ticket,
                vote = %tx_id,
                user = %item.multisig_address,
                ?elapsed,
                "vote broadcast"
            );
        }
        VoteResult::Duplicate(tx_id) => {
            info!(
                ticket = %item.ticket,
                vote = tx_id.as_deref().unwrap_or("unknown"),
                ?elapsed,
                "vote already known to the network"
            );
        }
        VoteResult::Failed(e) => {
            warn!(ticket = %item.ticket, ?elapsed, "vote failed: {e}");
        }
    }

    VoteOutcome {
        ticket: item.ticket,
        result,
        elapsed,
    }
}

async fn cast_vote_inner(
    wallet: &dyn WalletRpc,
    node: &dyn NodeRpc,
    block_hash: &str,
    block_height: i64,
    vote_bits_ext: &str,
    item: &VoteItem,
) -> VoteResult {
    let vote = match wallet
        .generate_vote(
            block_hash,
            block_height,
            &item.ticket,
            item.vote_bits,
            vote_bits_ext,
        )
        .await
    {
        Ok(vote) => vote,
        Err(e) => return VoteResult::Failed(format!("generatevote: {e:#}")),
    };

    if let Err(e) = MsgTx::deserialize_hex(&vote.hex) {
        return VoteResult::Failed(format!("undecodable vote transaction: {e}"));
    }

    match node.send_raw_transaction(&vote.hex).await {
        Ok(tx_id) => VoteResult::Voted(tx_id),
        Err(e) => {
            let msg = e.to_string();
            if is_duplicate_vote(&msg) {
                VoteResult::Duplicate(embedded_tx_id(&msg))
            } else {
                VoteResult::Failed(format!("sendrawtransaction: {msg}"))
            }
        }
    }
}

/// Aggregate of one block's vote fan-out.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct VoteSummary {
    pub voted: usize,
    pub duplicate: usize,
    pub failed: usize,
}

impl VoteSummary {
    pub fn tally(outcomes: &[VoteOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.result {
                VoteResult::Voted(_) => summary.voted += 1,
                VoteResult::Duplicate(_) => summary.duplicate += 1,
                VoteResult::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}
