use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use stakevoted::address::base58_check_decode;
use stakevoted::engine::{Engine, EngineSettings};
use stakevoted::events::{
    NewTicketsEvent, SpentMissedEvent, WinningTicketsEvent, process_new_tickets,
    process_spent_missed, process_winning,
};
use stakevoted::hdkeys::FeeAddressSet;
use stakevoted::metrics::Metrics;
use stakevoted::params;
use stakevoted::prefs::{GlobalVotingConfig, UserVotingPrefs};
use stakevoted::rpc::client::{NodeRpc, WalletRpc};
use stakevoted::rpc::resilient::{ResilientWallet, WalletFactory};
use stakevoted::rpc::types::{
    ERR_NO_TX_INFO, GenerateVoteResult, GetBestBlockResult, GetTransactionResult,
    GetTransactionDetail, RpcError, WalletInfoResult,
};
use stakevoted::snapshot::Snapshotter;
use stakevoted::tickets::{StakeState, TicketMap};
use stakevoted::votes::DUPLICATE_VOTE_ERR_PREFIX;
use stakevoted::wire::{MsgTx, TxHash, TxOut, build_commitment_script};

const TEST_XPUB: &str = "tpubVpQL1h9UcY9c1BPZYfjYEtw5froRAvqZEo6sn5Tji6VkhcpfMaQ6id9Spf5iNvprRTcpdF5pj7m5Suyu1E8iC4xnb6MkjUnCJureTsmdXfG";
const KNOWN_FEE_ADDR: &str = "TsYLznZJn2xhM9F7Vnt7i39NuUFENGx9Hff";
const BLOCK_HASH: &str = "000000000000000007e16ea60db6b02b09148355b35b3a7aba2fedab0b3bce65";
const BLOCK_HEIGHT: i64 = 4096;
const VOTE_TX_ID: &str = "5ca1ab1ec0ffee5ca1ab1ec0ffee5ca1ab1ec0ffee5ca1ab1ec0ffee00000000";
const GLOBAL_VOTE_VERSION: u32 = 7;

fn hash(n: u8) -> TxHash {
    TxHash([n; 32])
}

/// A configurable fake wallet client for testing.
#[derive(Default)]
struct FakeWallet {
    healthy: Arc<AtomicBool>,
    transactions: Mutex<HashMap<TxHash, GetTransactionResult>>,
    tickets: Mutex<Vec<TxHash>>,
    generate_vote_calls: Mutex<Vec<(String, i64, TxHash, u16, String)>>,
}

impl FakeWallet {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            healthy: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        })
    }

    fn insert_user_ticket(&self, ticket: TxHash, address: &str, hex: String, block: Option<&str>) {
        self.transactions.lock().unwrap().insert(
            ticket,
            GetTransactionResult {
                hex,
                block_hash: block.map(str::to_string),
                details: vec![GetTransactionDetail {
                    address: address.to_string(),
                    amount: 0.0,
                    vout: 0,
                }],
            },
        );
    }

    fn vote_calls(&self) -> Vec<(String, i64, TxHash, u16, String)> {
        self.generate_vote_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletRpc for FakeWallet {
    async fn check_connection(&self) -> anyhow::Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    async fn wallet_info(&self) -> anyhow::Result<WalletInfoResult> {
        Ok(WalletInfoResult {
            daemon_connected: true,
            unlocked: true,
            voting: true,
            vote_bits: 1,
            vote_bits_extended: "04000000".into(),
            vote_version: GLOBAL_VOTE_VERSION,
        })
    }

    async fn get_transaction(&self, hash: &TxHash) -> anyhow::Result<GetTransactionResult> {
        self.transactions
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| {
                RpcError::Server {
                    code: ERR_NO_TX_INFO,
                    message: "No information for transaction".into(),
                }
                .into()
            })
    }

    async fn generate_vote(
        &self,
        block_hash: &str,
        block_height: i64,
        ticket: &TxHash,
        vote_bits: u16,
        vote_bits_ext: &str,
    ) -> anyhow::Result<GenerateVoteResult> {
        self.generate_vote_calls.lock().unwrap().push((
            block_hash.to_string(),
            block_height,
            *ticket,
            vote_bits,
            vote_bits_ext.to_string(),
        ));
        Ok(GenerateVoteResult {
            hex: MsgTx::default().serialize_hex(),
        })
    }

    async fn get_tickets(&self, _include_immature: bool) -> anyhow::Result<Vec<TxHash>> {
        Ok(self.tickets.lock().unwrap().clone())
    }

    async fn import_script(
        &self,
        _script: &[u8],
        _rescan: bool,
        _scan_from: i64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list_scripts(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "scripts": [] }))
    }

    async fn account_sync_address_index(
        &self,
        _account: &str,
        _branch: u32,
        _index: u32,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stake_pool_user_info(&self, _multisig: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "tickets": [], "invalid": [] }))
    }

    async fn validate_address(&self, _address: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "isvalid": true }))
    }

    async fn create_multisig(
        &self,
        _required: u32,
        _addresses: &[String],
    ) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "address": "", "redeemScript": "" }))
    }

    async fn get_stake_info(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({}))
    }

    async fn add_ticket(&self, _tx_hex: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_best_block(&self) -> anyhow::Result<GetBestBlockResult> {
        Ok(GetBestBlockResult {
            hash: BLOCK_HASH.into(),
            height: BLOCK_HEIGHT,
        })
    }
}

/// A configurable fake node client for testing.
#[derive(Default)]
struct FakeNode {
    /// Best blocks handed out in order; the last repeats forever.
    best_blocks: Mutex<VecDeque<GetBestBlockResult>>,
    block_heights: Mutex<HashMap<String, i64>>,
    send_error: Mutex<Option<(i64, String)>>,
    sends: Mutex<Vec<String>>,
}

impl FakeNode {
    fn new() -> Arc<Self> {
        let node = Self::default();
        node.best_blocks.lock().unwrap().push_back(GetBestBlockResult {
            hash: BLOCK_HASH.into(),
            height: BLOCK_HEIGHT,
        });
        Arc::new(node)
    }

    fn with_tips(tips: &[(&str, i64)]) -> Arc<Self> {
        let node = Self::default();
        {
            let mut blocks = node.best_blocks.lock().unwrap();
            for (hash, height) in tips {
                blocks.push_back(GetBestBlockResult {
                    hash: hash.to_string(),
                    height: *height,
                });
            }
        }
        Arc::new(node)
    }

    fn fail_sends_with(&self, code: i64, message: &str) {
        *self.send_error.lock().unwrap() = Some((code, message.to_string()));
    }

    fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeRpc for FakeNode {
    async fn get_best_block(&self) -> anyhow::Result<GetBestBlockResult> {
        let mut blocks = self.best_blocks.lock().unwrap();
        if blocks.len() > 1 {
            Ok(blocks.pop_front().unwrap())
        } else {
            Ok(blocks.front().cloned().expect("fake node has no tip"))
        }
    }

    async fn get_block_height(&self, block_hash: &str) -> anyhow::Result<i64> {
        self.block_heights
            .lock()
            .unwrap()
            .get(block_hash)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown block {block_hash}"))
    }

    async fn get_raw_transaction(&self, _hash: &TxHash) -> anyhow::Result<String> {
        Ok(MsgTx::default().serialize_hex())
    }

    async fn send_raw_transaction(&self, tx_hex: &str) -> anyhow::Result<String> {
        if let Some((code, message)) = self.send_error.lock().unwrap().clone() {
            return Err(RpcError::Server { code, message }.into());
        }
        self.sends.lock().unwrap().push(tx_hex.to_string());
        Ok(VOTE_TX_ID.into())
    }
}

fn wallet_factory(wallet: Arc<FakeWallet>) -> WalletFactory {
    Box::new(move || {
        let wallet = wallet.clone();
        Box::pin(async move { Ok(wallet as Arc<dyn WalletRpc>) })
    })
}

async fn test_engine(wallet: Arc<FakeWallet>, node: Arc<FakeNode>) -> Arc<Engine> {
    let resilient = ResilientWallet::connect(wallet_factory(wallet)).await.unwrap();
    Arc::new(Engine {
        settings: EngineSettings {
            pool_fees: 7.5,
            no_rpc_listen: false,
            halt_on_unknown_ticket: false,
        },
        params: params::testnet(),
        fee_addresses: FeeAddressSet::derive(TEST_XPUB, 16, params::testnet()).unwrap(),
        global_voting: GlobalVotingConfig {
            vote_bits: 1,
            vote_version: GLOBAL_VOTE_VERSION,
            vote_bits_extended: "04000000".into(),
        },
        state: RwLock::new(StakeState::default()),
        wallet: resilient,
        node,
        prefs_source: None,
        snapshotter: Snapshotter::new(std::env::temp_dir().join("stakevoted-test-unused")),
        metrics: Arc::new(Metrics::new().unwrap()),
        cancel: CancellationToken::new(),
    })
}

async fn set_state(
    engine: &Engine,
    live: &[(TxHash, &str)],
    ignored: &[(TxHash, &str)],
    users: &[(&str, u16, u32)],
) {
    let mut state = engine.state.write().await;
    state.pools.ingest_new_live(
        live.iter().map(|(h, a)| (*h, a.to_string())).collect(),
        ignored.iter().map(|(h, a)| (*h, a.to_string())).collect(),
    );
    for (addr, bits, version) in users {
        state.user_voting_config.insert(
            addr.to_string(),
            UserVotingPrefs {
                user_id: 1,
                multisig_address: addr.to_string(),
                vote_bits: *bits,
                vote_bits_version: *version,
            },
        );
    }
}

fn fee_addr_hash160() -> [u8; 20] {
    let payload = base58_check_decode(KNOWN_FEE_ADDR).unwrap();
    payload[2..22].try_into().unwrap()
}

const TICKET_PRICE: i64 = 100_0000_0000;

/// A split ticket paying `pool_commit` to the pool fee address at output 1.
fn pool_ticket_hex(pool_commit: i64, commit_hash: [u8; 20]) -> String {
    let change = TxOut {
        value: 0,
        version: 0,
        pk_script: vec![0xbd, 0x76],
    };
    MsgTx {
        version: 1,
        tx_out: vec![
            TxOut {
                value: TICKET_PRICE,
                version: 0,
                pk_script: vec![0xba],
            },
            TxOut {
                value: 0,
                version: 0,
                pk_script: build_commitment_script(&commit_hash, pool_commit, false),
            },
            change.clone(),
            TxOut {
                value: 0,
                version: 0,
                pk_script: build_commitment_script(&[0x11; 20], TICKET_PRICE, false),
            },
            change,
        ],
        ..MsgTx::default()
    }
    .serialize_hex()
}

fn generous_commit() -> i64 {
    2 * params::stake_pool_ticket_fee(TICKET_PRICE, 0, BLOCK_HEIGHT, 7.5, params::testnet())
}

// Scenario S3: the added/ignored/live transition sequence.
#[tokio::test]
async fn added_allowance_transitions() {
    let engine = test_engine(FakeWallet::new(), FakeNode::new()).await;
    set_state(&engine, &[(hash(1), "u1")], &[(hash(2), "u2")], &[]).await;

    {
        let mut state = engine.state.write().await;
        let mut allowance = TicketMap::new();
        allowance.insert(hash(2), "u2".to_string());
        state.pools.replace_added(allowance);

        assert_eq!(state.pools.added().len(), 1);
        assert!(state.pools.live().contains_key(&hash(1)));
        assert!(state.pools.live().contains_key(&hash(2)));
        assert!(state.pools.ignored().is_empty());
    }

    {
        let mut state = engine.state.write().await;
        state.pools.replace_added(TicketMap::new());

        assert!(state.pools.added().is_empty());
        assert!(state.pools.live().contains_key(&hash(1)));
        assert!(!state.pools.live().contains_key(&hash(2)));
        assert_eq!(
            state.pools.ignored().get(&hash(2)).map(String::as_str),
            Some("u2")
        );
    }
}

// Scenario S4: one winning ticket produces exactly one signed vote and one
// broadcast, with the user's own vote bits.
#[tokio::test]
async fn winning_ticket_votes_once() {
    let wallet = FakeWallet::new();
    let node = FakeNode::new();
    let engine = test_engine(wallet.clone(), node.clone()).await;
    set_state(
        &engine,
        &[(hash(7), "TcUserA")],
        &[],
        &[("TcUserA", 1, GLOBAL_VOTE_VERSION)],
    )
    .await;

    process_winning(
        engine.clone(),
        WinningTicketsEvent {
            block_hash: BLOCK_HASH.into(),
            block_height: BLOCK_HEIGHT,
            tickets: vec![hash(7)],
        },
    )
    .await;

    let calls = wallet.vote_calls();
    assert_eq!(calls.len(), 1, "generatevote must be called exactly once");
    let (block, height, ticket, bits, ext) = &calls[0];
    assert_eq!(block, BLOCK_HASH);
    assert_eq!(*height, BLOCK_HEIGHT);
    assert_eq!(*ticket, hash(7));
    assert_eq!(*bits, 1);
    assert_eq!(ext, "04000000");

    assert_eq!(node.send_count(), 1, "the vote must be broadcast exactly once");
    assert_eq!(engine.metrics.votes_cast_total.get(), 1);
    assert_eq!(engine.metrics.votes_failed_total.get(), 0);
}

// Scenario S5: a stale vote-bits version falls back to the wallet's bits.
#[tokio::test]
async fn stale_vote_version_uses_wallet_bits() {
    let wallet = FakeWallet::new();
    let engine = test_engine(wallet.clone(), FakeNode::new()).await;
    set_state(
        &engine,
        &[(hash(3), "TcUserB")],
        &[],
        &[("TcUserB", 5, GLOBAL_VOTE_VERSION - 1)],
    )
    .await;

    process_winning(
        engine.clone(),
        WinningTicketsEvent {
            block_hash: BLOCK_HASH.into(),
            block_height: BLOCK_HEIGHT,
            tickets: vec![hash(3)],
        },
    )
    .await;

    let calls = wallet.vote_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].3, 1, "stale version must vote the wallet's bits");
}

// A winner with no stored preferences votes the wallet defaults.
#[tokio::test]
async fn missing_prefs_synthesize_defaults() {
    let wallet = FakeWallet::new();
    let engine = test_engine(wallet.clone(), FakeNode::new()).await;
    set_state(&engine, &[(hash(4), "TcNobody")], &[], &[]).await;

    process_winning(
        engine.clone(),
        WinningTicketsEvent {
            block_hash: BLOCK_HASH.into(),
            block_height: BLOCK_HEIGHT,
            tickets: vec![hash(4)],
        },
    )
    .await;

    let calls = wallet.vote_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].3, 1);
}

// A winner we do not hold is skipped without failing the block.
#[tokio::test]
async fn unknown_winner_skipped() {
    let wallet = FakeWallet::new();
    let node = FakeNode::new();
    let engine = test_engine(wallet.clone(), node.clone()).await;
    set_state(&engine, &[(hash(5), "TcUserC")], &[], &[]).await;

    process_winning(
        engine.clone(),
        WinningTicketsEvent {
            block_hash: BLOCK_HASH.into(),
            block_height: BLOCK_HEIGHT,
            tickets: vec![hash(5), hash(99)],
        },
    )
    .await;

    assert_eq!(wallet.vote_calls().len(), 1);
    assert_eq!(node.send_count(), 1);
}

// Scenario S6: the duplicate-vote answer counts as a duplicate, not an error.
#[tokio::test]
async fn duplicate_vote_reclassified() {
    let wallet = FakeWallet::new();
    let node = FakeNode::new();
    node.fail_sends_with(-32603, &format!("already have transaction {VOTE_TX_ID}"));
    let engine = test_engine(wallet.clone(), node.clone()).await;
    set_state(
        &engine,
        &[(hash(6), "TcUserD")],
        &[],
        &[("TcUserD", 1, GLOBAL_VOTE_VERSION)],
    )
    .await;

    process_winning(
        engine.clone(),
        WinningTicketsEvent {
            block_hash: BLOCK_HASH.into(),
            block_height: BLOCK_HEIGHT,
            tickets: vec![hash(6)],
        },
    )
    .await;

    assert_eq!(engine.metrics.votes_duplicate_total.get(), 1);
    assert_eq!(engine.metrics.votes_failed_total.get(), 0);
    assert_eq!(engine.metrics.votes_cast_total.get(), 0);
}

// The duplicate sentinel itself is stable.
#[test]
fn duplicate_sentinel_shape() {
    let err = RpcError::Server {
        code: -32603,
        message: format!("already have transaction {VOTE_TX_ID}"),
    };
    assert!(err.to_string().starts_with(DUPLICATE_VOTE_ERR_PREFIX));
}

// New tickets are classified by fee and merged into the inventory; tickets
// the wallet has no information for are skipped quietly.
#[tokio::test]
async fn new_tickets_classified_by_fee() {
    let wallet = FakeWallet::new();
    let engine = test_engine(wallet.clone(), FakeNode::new()).await;
    set_state(
        &engine,
        &[],
        &[],
        &[
            ("TcUserE", 1, GLOBAL_VOTE_VERSION),
            ("TcUserF", 1, GLOBAL_VOTE_VERSION),
        ],
    )
    .await;

    // Good fee for user E, foreign commitment for user F, and one ticket
    // the wallet does not know at all.
    wallet.insert_user_ticket(
        hash(21),
        "TcUserE",
        pool_ticket_hex(generous_commit(), fee_addr_hash160()),
        Some(BLOCK_HASH),
    );
    wallet.insert_user_ticket(
        hash(22),
        "TcUserF",
        pool_ticket_hex(generous_commit(), [0x42; 20]),
        Some(BLOCK_HASH),
    );

    process_new_tickets(
        engine.clone(),
        NewTicketsEvent {
            block_hash: BLOCK_HASH.into(),
            block_height: BLOCK_HEIGHT,
            tickets: vec![hash(21), hash(22), hash(23)],
        },
    )
    .await;

    let state = engine.state.read().await;
    assert_eq!(
        state.pools.live().get(&hash(21)).map(String::as_str),
        Some("TcUserE")
    );
    assert_eq!(
        state.pools.ignored().get(&hash(22)).map(String::as_str),
        Some("TcUserF")
    );
    assert!(!state.pools.live().contains_key(&hash(23)));
    assert!(!state.pools.ignored().contains_key(&hash(23)));
}

// Spent and missed tickets leave both classes; unrelated tickets stay.
#[tokio::test]
async fn spent_missed_retires_tickets() {
    let wallet = FakeWallet::new();
    let engine = test_engine(wallet.clone(), FakeNode::new()).await;
    set_state(
        &engine,
        &[(hash(31), "TcUserG"), (hash(32), "TcUserG")],
        &[(hash(33), "TcUserG")],
        &[("TcUserG", 1, GLOBAL_VOTE_VERSION)],
    )
    .await;

    let dummy_hex = MsgTx::default().serialize_hex();
    wallet.insert_user_ticket(hash(31), "TcUserG", dummy_hex.clone(), Some(BLOCK_HASH));
    wallet.insert_user_ticket(hash(33), "TcUserG", dummy_hex, Some(BLOCK_HASH));

    let mut tickets = HashMap::new();
    tickets.insert(hash(31), true);
    tickets.insert(hash(33), false);
    process_spent_missed(
        engine.clone(),
        SpentMissedEvent {
            block_hash: BLOCK_HASH.into(),
            block_height: BLOCK_HEIGHT,
            tickets,
        },
    )
    .await;

    let state = engine.state.read().await;
    assert!(!state.pools.live().contains_key(&hash(31)));
    assert!(state.pools.live().contains_key(&hash(32)));
    assert!(!state.pools.ignored().contains_key(&hash(33)));
}

// Startup reconciliation classifies wallet tickets at their purchase height
// and only commits against a stable chain tip.
#[tokio::test]
async fn reconciliation_requires_stable_tip() {
    let wallet = FakeWallet::new();
    // Tip moves once mid-scan, forcing a second pass.
    let node = FakeNode::with_tips(&[
        ("tip-a", BLOCK_HEIGHT - 1),
        ("tip-b", BLOCK_HEIGHT),
        ("tip-b", BLOCK_HEIGHT),
    ]);
    node.block_heights
        .lock()
        .unwrap()
        .insert("purchase-block".to_string(), BLOCK_HEIGHT - 50);

    let engine = test_engine(wallet.clone(), node.clone()).await;
    set_state(
        &engine,
        &[],
        &[],
        &[
            ("TcUserH", 1, GLOBAL_VOTE_VERSION),
            ("TcUserI", 1, GLOBAL_VOTE_VERSION),
        ],
    )
    .await;

    *wallet.tickets.lock().unwrap() = vec![hash(41), hash(42), hash(43)];
    wallet.insert_user_ticket(
        hash(41),
        "TcUserH",
        pool_ticket_hex(generous_commit(), fee_addr_hash160()),
        Some("purchase-block"),
    );
    wallet.insert_user_ticket(
        hash(42),
        "TcUserI",
        pool_ticket_hex(1, fee_addr_hash160()),
        Some("purchase-block"),
    );
    // hash(43) is unknown to the wallet and must be skipped.

    engine.reconcile_tickets().await.unwrap();

    let state = engine.state.read().await;
    assert_eq!(
        state.pools.live().get(&hash(41)).map(String::as_str),
        Some("TcUserH")
    );
    assert_eq!(
        state.pools.ignored().get(&hash(42)).map(String::as_str),
        Some("TcUserI")
    );
    assert!(!state.pools.live().contains_key(&hash(43)));
}

// The resilient wallet re-arms its connected signal across an outage and
// fires it again after a successful reconnect.
#[tokio::test(start_paused = true)]
async fn wallet_signal_rearms_across_outage() {
    let wallet = FakeWallet::new();
    let healthy = wallet.healthy.clone();
    let resilient = ResilientWallet::connect(wallet_factory(wallet)).await.unwrap();
    assert!(resilient.is_connected());

    let cancel = CancellationToken::new();
    let metrics = Arc::new(Metrics::new().unwrap());
    let monitor = resilient.spawn_monitor(cancel.clone(), metrics.clone());

    healthy.store(false, Ordering::SeqCst);
    let mut signal = resilient.connected();
    signal
        .wait_for(|up| !*up)
        .await
        .expect("monitor should observe the outage");
    assert!(!resilient.is_connected());

    healthy.store(true, Ordering::SeqCst);
    signal
        .wait_for(|up| *up)
        .await
        .expect("monitor should observe the recovery");
    assert!(resilient.is_connected());
    assert_eq!(metrics.wallet_reconnects_total.get(), 1);

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(60), monitor).await;
}

// Snapshot save and reload preserve the ticket sets and preferences.
#[tokio::test]
async fn snapshot_round_trip_through_engine() {
    let dir = tempfile::tempdir().unwrap();
    let wallet = FakeWallet::new();
    let node = FakeNode::new();
    let resilient = ResilientWallet::connect(wallet_factory(wallet)).await.unwrap();
    let engine = Arc::new(Engine {
        settings: EngineSettings::default(),
        params: params::testnet(),
        fee_addresses: FeeAddressSet::derive(TEST_XPUB, 4, params::testnet()).unwrap(),
        global_voting: GlobalVotingConfig::default(),
        state: RwLock::new(StakeState::default()),
        wallet: resilient,
        node,
        prefs_source: None,
        snapshotter: Snapshotter::new(dir.path()),
        metrics: Arc::new(Metrics::new().unwrap()),
        cancel: CancellationToken::new(),
    });
    set_state(
        &engine,
        &[(hash(51), "TcUserJ")],
        &[],
        &[("TcUserJ", 1, GLOBAL_VOTE_VERSION)],
    )
    .await;
    {
        let mut state = engine.state.write().await;
        let mut allowance = TicketMap::new();
        allowance.insert(hash(52), "TcUserJ".to_string());
        state.pools.replace_added(allowance);
    }

    assert_eq!(engine.save_snapshot().await.unwrap(), 3);

    let reloaded = Snapshotter::new(dir.path());
    let added = reloaded
        .load_ticket_map(stakevoted::snapshot::KIND_ADDED)
        .unwrap();
    let live = reloaded
        .load_ticket_map(stakevoted::snapshot::KIND_LIVE)
        .unwrap();
    assert_eq!(added.get(&hash(52)).map(String::as_str), Some("TcUserJ"));
    assert!(live.contains_key(&hash(51)));
    assert!(live.contains_key(&hash(52)));
}
