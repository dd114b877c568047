//! The ticket acceptance predicate: does a ticket commit an adequate fee to
//! one of the pool's cold-wallet addresses?

use anyhow::{Result, bail};
use tracing::info;

use crate::hdkeys::FeeAddressSet;
use crate::params::{ChainParams, stake_pool_ticket_fee};
use crate::wire::{MsgTx, commitment_address, commitment_amount};

/// Decide whether `tx` pays the pool an adequate fee, evaluated at
/// `block_height`. `Ok(false)` means the ticket is valid but rejected
/// (commitment not ours, or fee too low); an error means the ticket could
/// not be parsed as a pool ticket at all.
pub fn evaluate_stake_pool_ticket(
    tx: &MsgTx,
    block_height: i64,
    pool_fee: f64,
    fee_addrs: &FeeAddressSet,
    params: &ChainParams,
) -> Result<bool> {
    if tx.tx_out.len() < 2 {
        bail!("ticket has {} outputs, expected at least 2", tx.tx_out.len());
    }

    // The first commitment output names the fee recipient.
    let commit_script = &tx.tx_out[1].pk_script;
    let commit_addr = commitment_address(commit_script, params)?;
    if !fee_addrs.contains(&commit_addr) {
        info!(address = %commit_addr, "ticket commitment address is not a pool fee address");
        return Ok(false);
    }
    let commit_amt = commitment_amount(commit_script)?;

    // Every odd output is a commitment; their sum is the value paid in.
    let mut amt_in: i64 = 0;
    for txout in tx.tx_out.iter().skip(1).step_by(2) {
        amt_in += commitment_amount(&txout.pk_script)?;
    }
    let amt_out: i64 = tx.tx_out.iter().map(|o| o.value).sum();
    let fees = amt_in - amt_out;

    let fees_required =
        stake_pool_ticket_fee(tx.tx_out[0].value, fees, block_height, pool_fee, params);
    if commit_amt < fees_required {
        info!(
            committed = commit_amt,
            required = fees_required,
            height = block_height,
            "ticket commits an insufficient pool fee"
        );
        return Ok(false);
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::base58_check_decode;
    use crate::hdkeys::FeeAddressSet;
    use crate::params;
    use crate::wire::{TxOut, build_commitment_script};

    const TEST_XPUB: &str = "tpubVpQL1h9UcY9c1BPZYfjYEtw5froRAvqZEo6sn5Tji6VkhcpfMaQ6id9Spf5iNvprRTcpdF5pj7m5Suyu1E8iC4xnb6MkjUnCJureTsmdXfG";
    const KNOWN_FEE_ADDR: &str = "TsYLznZJn2xhM9F7Vnt7i39NuUFENGx9Hff";

    fn small_fee_set() -> FeeAddressSet {
        FeeAddressSet::derive(TEST_XPUB, 16, params::testnet()).unwrap()
    }

    fn addr_hash160(addr: &str) -> [u8; 20] {
        let payload = base58_check_decode(addr).unwrap();
        payload[2..22].try_into().unwrap()
    }

    const TICKET_PRICE: i64 = 100_0000_0000;

    /// A split ticket: stake output, pool fee commitment (under test), pool
    /// change, user commitment covering the ticket price, user change.
    fn ticket_with_pool_commitment(pool_commit: i64, hash: [u8; 20]) -> MsgTx {
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
                    pk_script: build_commitment_script(&hash, pool_commit, false),
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
    }

    /// With the user committing exactly the ticket price, the tx fees equal
    /// the pool commitment.
    fn required_fee(pool_commit: i64) -> i64 {
        stake_pool_ticket_fee(TICKET_PRICE, pool_commit, 4096, 7.5, params::testnet())
    }

    #[test]
    fn adequate_fee_accepted() {
        let set = small_fee_set();
        let hash = addr_hash160(KNOWN_FEE_ADDR);
        let commit = 2 * required_fee(0);
        assert!(commit > 0);
        assert!(commit >= required_fee(commit));
        let tx = ticket_with_pool_commitment(commit, hash);
        assert!(evaluate_stake_pool_ticket(&tx, 4096, 7.5, &set, params::testnet()).unwrap());
    }

    #[test]
    fn dust_fee_rejected_not_error() {
        let set = small_fee_set();
        let tx = ticket_with_pool_commitment(1, addr_hash160(KNOWN_FEE_ADDR));
        assert!(required_fee(1) > 1);
        assert!(!evaluate_stake_pool_ticket(&tx, 4096, 7.5, &set, params::testnet()).unwrap());
    }

    #[test]
    fn foreign_commitment_rejected_not_error() {
        let set = small_fee_set();
        let tx = ticket_with_pool_commitment(10_0000_0000, [0x42; 20]);
        assert!(!evaluate_stake_pool_ticket(&tx, 4096, 7.5, &set, params::testnet()).unwrap());
    }

    #[test]
    fn malformed_commitment_errors() {
        let set = small_fee_set();
        let mut tx = ticket_with_pool_commitment(1, addr_hash160(KNOWN_FEE_ADDR));
        tx.tx_out[1].pk_script = vec![0x76, 0xa9];
        assert!(evaluate_stake_pool_ticket(&tx, 4096, 7.5, &set, params::testnet()).is_err());
    }

    #[test]
    fn single_output_errors() {
        let set = small_fee_set();
        let tx = MsgTx {
            tx_out: vec![TxOut {
                value: 1,
                version: 0,
                pk_script: vec![0xba],
            }],
            ..MsgTx::default()
        };
        assert!(evaluate_stake_pool_ticket(&tx, 4096, 7.5, &set, params::testnet()).is_err());
    }
}
