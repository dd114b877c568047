//! Per-network chain parameters and the subsidy arithmetic behind the pool
//! fee check. Only the constants the daemon actually consumes are carried.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
    Sim,
}

impl Network {
    pub fn params(self) -> &'static ChainParams {
        match self {
            Network::Main => mainnet(),
            Network::Test => testnet(),
            Network::Sim => simnet(),
        }
    }
}

#[derive(Debug)]
pub struct ChainParams {
    pub name: &'static str,
    /// Two-byte pay-to-pubkey-hash address identifier.
    pub pub_key_hash_addr_id: [u8; 2],
    /// Two-byte pay-to-script-hash address identifier.
    pub script_hash_addr_id: [u8; 2],
    /// Four-byte extended public key version.
    pub hd_public_key_id: [u8; 4],
    /// Block-one subsidy in atoms, reduced every `subsidy_reduction_interval`
    /// blocks by `mul_subsidy`/`div_subsidy`.
    pub base_subsidy: i64,
    pub mul_subsidy: i64,
    pub div_subsidy: i64,
    pub subsidy_reduction_interval: i64,
    pub work_reward_proportion: i64,
    pub stake_reward_proportion: i64,
    pub block_tax_proportion: i64,
    pub tickets_per_block: i64,
}

impl ChainParams {
    fn total_proportions(&self) -> i64 {
        self.work_reward_proportion + self.stake_reward_proportion + self.block_tax_proportion
    }
}

pub fn mainnet() -> &'static ChainParams {
    &MAINNET
}

pub fn testnet() -> &'static ChainParams {
    &TESTNET
}

pub fn simnet() -> &'static ChainParams {
    &SIMNET
}

static MAINNET: ChainParams = ChainParams {
    name: "mainnet",
    pub_key_hash_addr_id: [0x07, 0x3f],
    script_hash_addr_id: [0x07, 0x1a],
    hd_public_key_id: [0x02, 0xfd, 0xa9, 0x26],
    base_subsidy: 3_119_582_664,
    mul_subsidy: 100,
    div_subsidy: 101,
    subsidy_reduction_interval: 6_144,
    work_reward_proportion: 6,
    stake_reward_proportion: 3,
    block_tax_proportion: 1,
    tickets_per_block: 5,
};

static TESTNET: ChainParams = ChainParams {
    name: "testnet",
    pub_key_hash_addr_id: [0x0f, 0x21],
    script_hash_addr_id: [0x0e, 0xfc],
    hd_public_key_id: [0x04, 0x35, 0x87, 0xd1],
    base_subsidy: 2_500_000_000,
    mul_subsidy: 100,
    div_subsidy: 101,
    subsidy_reduction_interval: 2_048,
    work_reward_proportion: 6,
    stake_reward_proportion: 3,
    block_tax_proportion: 1,
    tickets_per_block: 5,
};

static SIMNET: ChainParams = ChainParams {
    name: "simnet",
    pub_key_hash_addr_id: [0x0e, 0x91],
    script_hash_addr_id: [0x0e, 0x6c],
    hd_public_key_id: [0x04, 0x20, 0xbd, 0x3d],
    base_subsidy: 50_000_000_000,
    mul_subsidy: 100,
    div_subsidy: 101,
    subsidy_reduction_interval: 128,
    work_reward_proportion: 6,
    stake_reward_proportion: 3,
    block_tax_proportion: 1,
    tickets_per_block: 5,
};

/// Full block subsidy at `height`, before the work/stake/tax split.
pub fn calc_block_subsidy(height: i64, params: &ChainParams) -> i64 {
    if height <= 0 {
        return 0;
    }
    let iterations = height / params.subsidy_reduction_interval;
    let mut subsidy = params.base_subsidy;
    for _ in 0..iterations {
        subsidy = subsidy * params.mul_subsidy / params.div_subsidy;
        if subsidy == 0 {
            break;
        }
    }
    subsidy
}

/// Subsidy paid to a single vote at `height`.
pub fn calc_stake_vote_subsidy(height: i64, params: &ChainParams) -> i64 {
    calc_block_subsidy(height, params) * params.stake_reward_proportion
        / params.total_proportions()
        / params.tickets_per_block
}

/// Valid range for the pool fee percentage: 0.01% through 100%.
pub fn valid_pool_fee_rate(rate: f64) -> bool {
    (0.01..=100.0).contains(&rate)
}

/// Required pool fee for a ticket, in atoms.
///
/// `stake_diff` is the ticket price (value of the ticket's first output),
/// `fees` the transaction fees the ticket already pays, `pool_fee` the
/// configured percentage. With `p` the percentage shifted two places,
/// `s` the per-vote subsidy, `v` the ticket price and `z` the fees:
///
/// ```text
/// fee = p * s * (v + z) / (10000 * (s + v))
/// ```
pub fn stake_pool_ticket_fee(
    stake_diff: i64,
    fees: i64,
    height: i64,
    pool_fee: f64,
    params: &ChainParams,
) -> i64 {
    let p = (pool_fee * 100.0) as i128;
    let s = calc_stake_vote_subsidy(height, params) as i128;
    let v = stake_diff as i128;
    let z = fees as i128;
    let num = p * s * (v + z);
    let den = 10_000i128 * (s + v);
    (num / den) as i64
}
