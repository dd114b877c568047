//! Decred address and Base58Check codecs. Decred's Base58Check uses a
//! double-BLAKE-256 checksum and two-byte network identifiers; HASH160 is
//! RIPEMD160 over BLAKE-256.

use ripemd::{Digest, Ripemd160};
use thiserror::Error;

use crate::blake256::blake256;
use crate::blake256::blake256d;
use crate::params::ChainParams;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("not valid base58: {0}")]
    Base58(String),
    #[error("bad checksum")]
    BadChecksum,
    #[error("payload too short")]
    TooShort,
    #[error("unknown script format")]
    UnknownScript,
}

/// RIPEMD160(BLAKE256(data)).
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(blake256(data)));
    out
}

/// Base58Check-encode `payload` (network id bytes included) with a
/// double-BLAKE-256 checksum.
pub fn base58_check_encode(payload: &[u8]) -> String {
    let mut buf = payload.to_vec();
    buf.extend_from_slice(&blake256d(payload)[..4]);
    bs58::encode(buf).into_string()
}

/// Decode a Base58Check string and verify its checksum; returns the payload
/// with network id bytes still attached.
pub fn base58_check_decode(s: &str) -> Result<Vec<u8>, AddressError> {
    let raw = bs58::decode(s)
        .into_vec()
        .map_err(|e| AddressError::Base58(e.to_string()))?;
    if raw.len() < 5 {
        return Err(AddressError::TooShort);
    }
    let (payload, checksum) = raw.split_at(raw.len() - 4);
    if blake256d(payload)[..4] != *checksum {
        return Err(AddressError::BadChecksum);
    }
    Ok(payload.to_vec())
}

/// Render a pay-to-pubkey-hash address for `hash` on the given network.
pub fn p2pkh_address(hash: &[u8; 20], params: &ChainParams) -> String {
    let mut payload = [0u8; 22];
    payload[..2].copy_from_slice(&params.pub_key_hash_addr_id);
    payload[2..].copy_from_slice(hash);
    base58_check_encode(&payload)
}

/// Render a pay-to-script-hash address for `hash` on the given network.
pub fn p2sh_address(hash: &[u8; 20], params: &ChainParams) -> String {
    let mut payload = [0u8; 22];
    payload[..2].copy_from_slice(&params.script_hash_addr_id);
    payload[2..].copy_from_slice(hash);
    base58_check_encode(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn check_round_trip() {
        let payload = [0x0f, 0x21, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20];
        let encoded = base58_check_encode(&payload);
        assert_eq!(base58_check_decode(&encoded).unwrap(), payload.to_vec());
    }

    #[test]
    fn corrupt_checksum_rejected() {
        let payload = [0x0f, 0x21, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut encoded = base58_check_encode(&payload).into_bytes();
        let last = encoded.last_mut().unwrap();
        *last = if *last == b'2' { b'3' } else { b'2' };
        let s = String::from_utf8(encoded).unwrap();
        assert!(matches!(
            base58_check_decode(&s),
            Err(AddressError::BadChecksum) | Err(AddressError::Base58(_))
        ));
    }

    #[test]
    fn testnet_p2pkh_prefix() {
        let addr = p2pkh_address(&[0u8; 20], params::testnet());
        assert!(addr.starts_with("Ts"), "got {addr}");
    }

    #[test]
    fn mainnet_p2pkh_prefix() {
        let addr = p2pkh_address(&[0u8; 20], params::mainnet());
        assert!(addr.starts_with("Ds"), "got {addr}");
    }
}
