//! Extended public key handling for the cold-wallet fee key: parse the
//! network-tagged xpub, derive the external branch, and materialize the set
//! of pool fee addresses checked by the ticket acceptance predicate.

use std::collections::HashSet;

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, VerifyOnly};
use sha2::Sha512;
use thiserror::Error;
use tracing::info;

use crate::address::{self, AddressError};
use crate::params::ChainParams;

/// Number of external-branch fee addresses derived at startup.
pub const FEE_ADDRESS_COUNT: usize = 10_000;

const EXTERNAL_BRANCH: u32 = 0;
const HARDENED_OFFSET: u32 = 1 << 31;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("malformed extended public key: {0}")]
    Malformed(#[from] AddressError),
    #[error("malformed extended public key: wrong payload length")]
    WrongLength,
    #[error("malformed extended public key: {0}")]
    BadPoint(#[from] secp256k1::Error),
    #[error("extended public key is for the wrong network")]
    WrongNetwork,
    #[error("cannot derive a hardened child from a public key")]
    Hardened,
    /// The HMAC left half was out of range or tweaking produced the point at
    /// infinity; the caller skips to the next index.
    #[error("invalid child key at this index")]
    InvalidChild,
}

/// A BIP32 extended public key, verification half only.
pub struct ExtendedPubKey {
    chain_code: [u8; 32],
    pub_key: PublicKey,
    secp: Secp256k1<VerifyOnly>,
}

impl ExtendedPubKey {
    /// Parse a Base58Check-encoded extended public key, rejecting keys whose
    /// version bytes do not match `params`.
    pub fn parse(s: &str, params: &ChainParams) -> Result<Self, KeyError> {
        let payload = address::base58_check_decode(s)?;
        if payload.len() != 78 {
            return Err(KeyError::WrongLength);
        }
        if payload[..4] != params.hd_public_key_id {
            return Err(KeyError::WrongNetwork);
        }
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);
        let pub_key = PublicKey::from_slice(&payload[45..78])?;
        Ok(Self {
            chain_code,
            pub_key,
            secp: Secp256k1::verification_only(),
        })
    }

    /// Derive the non-hardened child at `index`.
    pub fn child(&self, index: u32) -> Result<Self, KeyError> {
        if index >= HARDENED_OFFSET {
            return Err(KeyError::Hardened);
        }

        let mut mac =
            Hmac::<Sha512>::new_from_slice(&self.chain_code).expect("hmac accepts any key length");
        mac.update(&self.pub_key.serialize());
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let mut il = [0u8; 32];
        il.copy_from_slice(&digest[..32]);
        let tweak = Scalar::from_be_bytes(il).map_err(|_| KeyError::InvalidChild)?;
        let pub_key = self
            .pub_key
            .add_exp_tweak(&self.secp, &tweak)
            .map_err(|_| KeyError::InvalidChild)?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);
        Ok(Self {
            chain_code,
            pub_key,
            secp: Secp256k1::verification_only(),
        })
    }

    /// Pay-to-pubkey-hash address of this key.
    pub fn address(&self, params: &ChainParams) -> String {
        address::p2pkh_address(&address::hash160(&self.pub_key.serialize()), params)
    }
}

/// The pool's fee addresses, derived once at startup and then only queried.
#[derive(Debug)]
pub struct FeeAddressSet {
    addrs: HashSet<String>,
}

impl FeeAddressSet {
    /// Derive `count` external-branch addresses from `xpub`. Indexes whose
    /// child key is invalid do not consume a slot; the next index is tried
    /// until `count` addresses exist.
    pub fn derive(xpub: &str, count: usize, params: &ChainParams) -> Result<Self, KeyError> {
        info!(count, "deriving stake pool fee addresses");
        let key = ExtendedPubKey::parse(xpub, params)?;
        let branch = key.child(EXTERNAL_BRANCH)?;

        let mut addrs = HashSet::with_capacity(count);
        let mut index: u32 = 0;
        while addrs.len() < count {
            match branch.child(index) {
                Ok(child) => {
                    addrs.insert(child.address(params));
                }
                Err(KeyError::InvalidChild) => {}
                Err(e) => return Err(e),
            }
            index += 1;
        }
        Ok(Self { addrs })
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.addrs.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}
