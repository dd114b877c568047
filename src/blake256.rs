//! BLAKE-256 (the SHA-3-finalist BLAKE, not BLAKE2), the hash Decred uses
//! for transaction ids, address checksums and HASH160.
//!
//! One-shot only; the daemon never streams into it.

const IV: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

// First 512 fractional bits of pi.
const U: [u32; 16] = [
    0x243f6a88, 0x85a308d3, 0x13198a2e, 0x03707344, 0xa4093822, 0x299f31d0, 0x082efa98, 0xec4e6c89,
    0x452821e6, 0x38d01377, 0xbe5466cf, 0x34e90c6c, 0xc0ac29b7, 0xc97c50dd, 0x3f84d5b5, 0xb5470917,
];

const SIGMA: [[usize; 16]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
    [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
    [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
    [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
    [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
    [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
    [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
    [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
    [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

// (a, b, c, d) quadruples for the four column and four diagonal G steps.
const STEPS: [[usize; 4]; 8] = [
    [0, 4, 8, 12],
    [1, 5, 9, 13],
    [2, 6, 10, 14],
    [3, 7, 11, 15],
    [0, 5, 10, 15],
    [1, 6, 11, 12],
    [2, 7, 8, 13],
    [3, 4, 9, 14],
];

#[inline]
fn g(v: &mut [u32; 16], i: usize, m: &[u32; 16], s: &[usize; 16]) {
    let [a, b, c, d] = STEPS[i];
    v[a] = v[a]
        .wrapping_add(v[b])
        .wrapping_add(m[s[2 * i]] ^ U[s[2 * i + 1]]);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(12);
    v[a] = v[a]
        .wrapping_add(v[b])
        .wrapping_add(m[s[2 * i + 1]] ^ U[s[2 * i]]);
    v[d] = (v[d] ^ v[a]).rotate_right(8);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(7);
}

/// One compression round over a 64-byte block. `t` is the number of message
/// bits hashed so far including this block (zero for padding-only blocks).
fn compress(h: &mut [u32; 8], block: &[u8], t: u64) {
    debug_assert_eq!(block.len(), 64);

    let mut m = [0u32; 16];
    for (i, word) in m.iter_mut().enumerate() {
        *word = u32::from_be_bytes(block[4 * i..4 * i + 4].try_into().unwrap());
    }

    let mut v = [0u32; 16];
    v[..8].copy_from_slice(h);
    v[8..12].copy_from_slice(&U[..4]);
    v[12] = U[4] ^ (t as u32);
    v[13] = U[5] ^ (t as u32);
    v[14] = U[6] ^ ((t >> 32) as u32);
    v[15] = U[7] ^ ((t >> 32) as u32);

    for r in 0..14 {
        let s = &SIGMA[r % 10];
        for i in 0..8 {
            g(&mut v, i, &m, s);
        }
    }

    for i in 0..8 {
        h[i] ^= v[i] ^ v[i + 8];
    }
}

/// BLAKE-256 digest of `data`.
pub fn blake256(data: &[u8]) -> [u8; 32] {
    let mut h = IV;
    let bit_len = (data.len() as u64) * 8;

    let mut full_blocks = data.chunks_exact(64);
    let mut t: u64 = 0;
    for block in &mut full_blocks {
        t += 512;
        compress(&mut h, block, t);
    }
    let rem = full_blocks.remainder();

    // Padding: 0x80, zeros, low bit of byte 55 set, then the 64-bit
    // big-endian bit length. A block carrying no message bits is
    // compressed with a zero counter.
    let rem_bits = (rem.len() as u64) * 8;
    if rem.len() <= 54 {
        let mut last = [0u8; 64];
        last[..rem.len()].copy_from_slice(rem);
        last[rem.len()] = 0x80;
        last[55] |= 0x01;
        last[56..].copy_from_slice(&bit_len.to_be_bytes());
        let t_last = if rem.is_empty() { 0 } else { t + rem_bits };
        compress(&mut h, &last, t_last);
    } else if rem.len() == 55 {
        let mut last = [0u8; 64];
        last[..55].copy_from_slice(rem);
        last[55] = 0x81;
        last[56..].copy_from_slice(&bit_len.to_be_bytes());
        compress(&mut h, &last, t + rem_bits);
    } else {
        let mut first = [0u8; 64];
        first[..rem.len()].copy_from_slice(rem);
        first[rem.len()] = 0x80;
        compress(&mut h, &first, t + rem_bits);

        let mut last = [0u8; 64];
        last[55] = 0x01;
        last[56..].copy_from_slice(&bit_len.to_be_bytes());
        compress(&mut h, &last, 0);
    }

    let mut out = [0u8; 32];
    for (i, word) in h.iter().enumerate() {
        out[4 * i..4 * i + 4].copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// BLAKE-256 applied twice, the checksum hash of Decred's Base58Check.
pub fn blake256d(data: &[u8]) -> [u8; 32] {
    blake256(&blake256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message() {
        assert_eq!(
            hex::encode(blake256(b"")),
            "716f6e863f744b9ac22c97ec7b76ea5f5908bc5b2f67c61510bfc4751384ea7a"
        );
    }

    #[test]
    fn one_zero_byte() {
        // Known-answer vector from the BLAKE submission document.
        assert_eq!(
            hex::encode(blake256(&[0u8])),
            "0ce8d4ef4dd7cd8d62dfded9d4edb0a774ae6a41929a74da23109e8f11139c87"
        );
    }

    #[test]
    fn seventy_two_zero_bytes() {
        // Second vector from the BLAKE submission document, crosses a
        // block boundary.
        assert_eq!(
            hex::encode(blake256(&[0u8; 72])),
            "d419bad32d504fb7d44d460c42c5593fe544fa4c135dec31e21bd9abdcc22d41"
        );
    }

    #[test]
    fn block_multiple_message() {
        // 64-byte message exercises the padding-only final block.
        let d64 = blake256(&[0xabu8; 64]);
        assert_ne!(d64, blake256(&[0xabu8; 63]));
        assert_ne!(d64, blake256(&[0xabu8; 65]));
    }

    #[test]
    fn double_hash_matches_manual() {
        let once = blake256(b"stakevoted");
        assert_eq!(blake256d(b"stakevoted"), blake256(&once));
    }
}
