//! Transaction primitives: the 32-byte hash newtype used to key the ticket
//! sets, the transaction wire codec (prefix + witness, full serialization)
//! and the ticket commitment-output parser.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::address;
use crate::params::ChainParams;

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("unexpected end of data")]
    UnexpectedEof,
    #[error("unsupported serialization type {0}")]
    BadSerType(u16),
    #[error("declared length {0} exceeds remaining data")]
    Oversize(u64),
    #[error("trailing bytes after transaction")]
    TrailingBytes,
    #[error("witness input count {0} does not match prefix count {1}")]
    WitnessMismatch(usize, usize),
    #[error("not a ticket commitment script")]
    BadCommitment,
    #[error("bad hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("bad hash length {0}")]
    BadHashLength(usize),
}

/// A transaction hash. Stored in internal byte order; rendered reversed, the
/// way ids appear on the RPC surface.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rev = self.0;
        rev.reverse();
        f.write_str(&hex::encode(rev))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for TxHash {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s)?;
        if raw.len() != 32 {
            return Err(WireError::BadHashLength(raw.len()));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        bytes.reverse();
        Ok(TxHash(bytes))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutPoint {
    pub hash: TxHash,
    pub index: u32,
    pub tree: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_out_point: OutPoint,
    pub sequence: u32,
    pub value_in: i64,
    pub block_height: u32,
    pub block_index: u32,
    pub signature_script: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub version: u16,
    pub pk_script: Vec<u8>,
}

/// A transaction in full (prefix + witness) serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgTx {
    pub version: u16,
    pub tx_in: Vec<TxIn>,
    pub tx_out: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

const SER_TYPE_FULL: u16 = 0;

// Sanity caps against hostile length prefixes.
const MAX_TX_IO: u64 = 1 << 14;
const MAX_SCRIPT_LEN: u64 = 1 << 20;

impl MsgTx {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + 64 * self.tx_in.len() + 48 * self.tx_out.len());
        let version = (self.version as u32) | ((SER_TYPE_FULL as u32) << 16);
        buf.extend_from_slice(&version.to_le_bytes());

        write_varint(&mut buf, self.tx_in.len() as u64);
        for txin in &self.tx_in {
            buf.extend_from_slice(&txin.previous_out_point.hash.0);
            buf.extend_from_slice(&txin.previous_out_point.index.to_le_bytes());
            buf.push(txin.previous_out_point.tree);
            buf.extend_from_slice(&txin.sequence.to_le_bytes());
        }

        write_varint(&mut buf, self.tx_out.len() as u64);
        for txout in &self.tx_out {
            buf.extend_from_slice(&(txout.value as u64).to_le_bytes());
            buf.extend_from_slice(&txout.version.to_le_bytes());
            write_varint(&mut buf, txout.pk_script.len() as u64);
            buf.extend_from_slice(&txout.pk_script);
        }

        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf.extend_from_slice(&self.expiry.to_le_bytes());

        write_varint(&mut buf, self.tx_in.len() as u64);
        for txin in &self.tx_in {
            buf.extend_from_slice(&(txin.value_in as u64).to_le_bytes());
            buf.extend_from_slice(&txin.block_height.to_le_bytes());
            buf.extend_from_slice(&txin.block_index.to_le_bytes());
            write_varint(&mut buf, txin.signature_script.len() as u64);
            buf.extend_from_slice(&txin.signature_script);
        }

        buf
    }

    pub fn serialize_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader { data, pos: 0 };

        let version_word = r.read_u32()?;
        let version = (version_word & 0xffff) as u16;
        let ser_type = (version_word >> 16) as u16;
        if ser_type != SER_TYPE_FULL {
            return Err(WireError::BadSerType(ser_type));
        }

        let in_count = r.read_varint_capped(MAX_TX_IO)?;
        let mut tx_in = Vec::with_capacity(in_count as usize);
        for _ in 0..in_count {
            let hash = TxHash(r.read_array::<32>()?);
            let index = r.read_u32()?;
            let tree = r.read_u8()?;
            let sequence = r.read_u32()?;
            tx_in.push(TxIn {
                previous_out_point: OutPoint { hash, index, tree },
                sequence,
                value_in: 0,
                block_height: 0,
                block_index: 0,
                signature_script: Vec::new(),
            });
        }

        let out_count = r.read_varint_capped(MAX_TX_IO)?;
        let mut tx_out = Vec::with_capacity(out_count as usize);
        for _ in 0..out_count {
            let value = r.read_u64()? as i64;
            let version = r.read_u16()?;
            let pk_script = r.read_varbytes(MAX_SCRIPT_LEN)?;
            tx_out.push(TxOut {
                value,
                version,
                pk_script,
            });
        }

        let lock_time = r.read_u32()?;
        let expiry = r.read_u32()?;

        let wit_count = r.read_varint_capped(MAX_TX_IO)? as usize;
        if wit_count != tx_in.len() {
            return Err(WireError::WitnessMismatch(wit_count, tx_in.len()));
        }
        for txin in tx_in.iter_mut() {
            txin.value_in = r.read_u64()? as i64;
            txin.block_height = r.read_u32()?;
            txin.block_index = r.read_u32()?;
            txin.signature_script = r.read_varbytes(MAX_SCRIPT_LEN)?;
        }

        if r.pos != data.len() {
            return Err(WireError::TrailingBytes);
        }

        Ok(MsgTx {
            version,
            tx_in,
            tx_out,
            lock_time,
            expiry,
        })
    }

    pub fn deserialize_hex(s: &str) -> Result<Self, WireError> {
        Self::deserialize(&hex::decode(s)?)
    }
}

fn write_varint(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], WireError> {
        if self.data.len() - self.pos < n {
            return Err(WireError::UnexpectedEof);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        Ok(self.take(N)?.try_into().unwrap())
    }

    fn read_varint(&mut self) -> Result<u64, WireError> {
        Ok(match self.read_u8()? {
            0xfd => self.read_u16()? as u64,
            0xfe => self.read_u32()? as u64,
            0xff => self.read_u64()?,
            n => n as u64,
        })
    }

    fn read_varint_capped(&mut self, max: u64) -> Result<u64, WireError> {
        let n = self.read_varint()?;
        if n > max {
            return Err(WireError::Oversize(n));
        }
        Ok(n)
    }

    fn read_varbytes(&mut self, max: u64) -> Result<Vec<u8>, WireError> {
        let len = self.read_varint_capped(max)?;
        Ok(self.take(len as usize)?.to_vec())
    }
}

// Ticket commitment outputs: OP_RETURN, a 30-byte push of 20 bytes of
// HASH160, an 8-byte little-endian amount whose top bit selects P2SH, and
// two bytes of fee limits.
const OP_RETURN: u8 = 0x6a;
const OP_DATA_30: u8 = 0x1e;
const COMMITMENT_SCRIPT_LEN: usize = 32;
const COMMITMENT_P2SH_FLAG: u64 = 1 << 63;

fn commitment_data(script: &[u8]) -> Result<(&[u8], u64), WireError> {
    if script.len() != COMMITMENT_SCRIPT_LEN
        || script[0] != OP_RETURN
        || script[1] != OP_DATA_30
    {
        return Err(WireError::BadCommitment);
    }
    let hash = &script[2..22];
    let amount = u64::from_le_bytes(script[22..30].try_into().unwrap());
    Ok((hash, amount))
}

/// Address a commitment output pays to.
pub fn commitment_address(script: &[u8], params: &ChainParams) -> Result<String, WireError> {
    let (hash, amount) = commitment_data(script)?;
    let hash: [u8; 20] = hash.try_into().unwrap();
    if amount & COMMITMENT_P2SH_FLAG != 0 {
        Ok(address::p2sh_address(&hash, params))
    } else {
        Ok(address::p2pkh_address(&hash, params))
    }
}

/// Amount a commitment output commits, in atoms.
pub fn commitment_amount(script: &[u8]) -> Result<i64, WireError> {
    let (_, amount) = commitment_data(script)?;
    Ok((amount & !COMMITMENT_P2SH_FLAG) as i64)
}

/// Build a commitment script; test helper for the acceptance predicate.
pub fn build_commitment_script(hash: &[u8; 20], amount: i64, p2sh: bool) -> Vec<u8> {
    let mut script = Vec::with_capacity(COMMITMENT_SCRIPT_LEN);
    script.push(OP_RETURN);
    script.push(OP_DATA_30);
    script.extend_from_slice(hash);
    let mut amt = amount as u64;
    if p2sh {
        amt |= COMMITMENT_P2SH_FLAG;
    }
    script.extend_from_slice(&amt.to_le_bytes());
    script.extend_from_slice(&[0x58, 0x00]);
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    fn sample_tx() -> MsgTx {
        MsgTx {
            version: 1,
            tx_in: vec![TxIn {
                previous_out_point: OutPoint {
                    hash: TxHash([7u8; 32]),
                    index: 2,
                    tree: 1,
                },
                sequence: 0xffff_ffff,
                value_in: 55_0000_0000,
                block_height: 1234,
                block_index: 5,
                signature_script: vec![0x51, 0x52, 0x53],
            }],
            tx_out: vec![
                TxOut {
                    value: 54_9999_0000,
                    version: 0,
                    pk_script: vec![0xba, 0x76, 0xa9, 0x14],
                },
                TxOut {
                    value: 0,
                    version: 0,
                    pk_script: build_commitment_script(&[9u8; 20], 10_000, false),
                },
            ],
            lock_time: 0,
            expiry: 16,
        }
    }

    #[test]
    fn round_trip() {
        let tx = sample_tx();
        let hex = tx.serialize_hex();
        assert_eq!(MsgTx::deserialize_hex(&hex).unwrap(), tx);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut raw = sample_tx().serialize();
        raw.push(0);
        assert_eq!(MsgTx::deserialize(&raw), Err(WireError::TrailingBytes));
    }

    #[test]
    fn truncated_rejected() {
        let raw = sample_tx().serialize();
        assert_eq!(
            MsgTx::deserialize(&raw[..raw.len() - 3]),
            Err(WireError::UnexpectedEof)
        );
    }

    #[test]
    fn witness_only_sertype_rejected() {
        let mut raw = sample_tx().serialize();
        // Flip the serialization type half of the version word.
        raw[2] = 1;
        assert_eq!(MsgTx::deserialize(&raw), Err(WireError::BadSerType(1)));
    }

    #[test]
    fn hash_display_is_reversed_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = TxHash(bytes);
        let s = hash.to_string();
        assert!(s.ends_with("ab"));
        assert_eq!(s.parse::<TxHash>().unwrap(), hash);
    }

    #[test]
    fn hash_rejects_bad_length() {
        assert!(matches!(
            "abcd".parse::<TxHash>(),
            Err(WireError::BadHashLength(2))
        ));
    }

    #[test]
    fn commitment_amount_masks_p2sh_flag() {
        let script = build_commitment_script(&[1u8; 20], 12_345, true);
        assert_eq!(commitment_amount(&script).unwrap(), 12_345);
        let addr = commitment_address(&script, params::testnet()).unwrap();
        // P2SH flag selects the script-hash address form.
        assert_ne!(
            addr,
            commitment_address(
                &build_commitment_script(&[1u8; 20], 12_345, false),
                params::testnet()
            )
            .unwrap()
        );
    }

    #[test]
    fn non_commitment_script_rejected() {
        assert_eq!(
            commitment_amount(&[0x76, 0xa9]),
            Err(WireError::BadCommitment)
        );
    }

    #[test]
    fn varint_widths() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 0xfc);
        write_varint(&mut buf, 0xfd);
        write_varint(&mut buf, 0x10000);
        let mut r = Reader {
            data: &buf,
            pos: 0,
        };
        assert_eq!(r.read_varint().unwrap(), 0xfc);
        assert_eq!(r.read_varint().unwrap(), 0xfd);
        assert_eq!(r.read_varint().unwrap(), 0x10000);
    }
}
