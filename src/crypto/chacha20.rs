//! ChaCha20 stream cipher core.
//!
//! 20-round ChaCha as specified in RFC 7539, with the original 64-bit
//! nonce / 64-bit block counter layout: the counter occupies state words
//! 12-13 (little-endian, low word incremented first with carry into the
//! high word) and the nonce occupies words 14-15. Output is kept as a
//! 16-word buffer refilled on demand; `next32` and `next64` advance the
//! position through it.
//!
//! ChaCha20 algorithm designed by Daniel J. Bernstein. This implementation
//! follows the public domain algorithm specification.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// ChaCha20 constants: "expand 32-byte k" in little-endian.
const CONSTANTS: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// ChaCha20 keystream generator with a 16-word output buffer.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChaCha20 {
    /// Internal state (16 x 32-bit words).
    state: [u32; 16],
    /// Current output block (working state + initial state).
    buffer: [u32; 16],
    /// Consumed words in `buffer`; 16 means a refill is due.
    pos: usize,
}

impl ChaCha20 {
    /// Build a generator from a 256-bit key and a 64-bit nonce.
    pub fn new(key: &[u8; 32], nonce: u64) -> Self {
        let mut state = [0u32; 16];
        state[0..4].copy_from_slice(&CONSTANTS);
        for (i, chunk) in key.chunks_exact(4).enumerate() {
            state[4 + i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        state[12] = 0;
        state[13] = 0;
        state[14] = (nonce & 0xffff_ffff) as u32;
        state[15] = (nonce >> 32) as u32;
        Self {
            state,
            buffer: [0; 16],
            pos: 16,
        }
    }

    /// Build a generator from a key already split into 8 u32 words (the
    /// layout the seed formats produce) and a 64-bit nonce.
    pub fn from_key_words(key: &[u32; 8], nonce: u64) -> Self {
        let mut state = [0u32; 16];
        state[0..4].copy_from_slice(&CONSTANTS);
        state[4..12].copy_from_slice(key);
        state[12] = 0;
        state[13] = 0;
        state[14] = (nonce & 0xffff_ffff) as u32;
        state[15] = (nonce >> 32) as u32;
        Self {
            state,
            buffer: [0; 16],
            pos: 16,
        }
    }

    /// Build a generator from an explicit 16-word state matrix. Used by the
    /// startup self-test, which replays the RFC 7539 vector including its
    /// 96-bit-nonce word layout.
    pub(crate) fn from_raw_state(state: [u32; 16]) -> Self {
        Self {
            state,
            buffer: [0; 16],
            pos: 16,
        }
    }

    #[inline(always)]
    fn quarter_round(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
        state[a] = state[a].wrapping_add(state[b]);
        state[d] ^= state[a];
        state[d] = state[d].rotate_left(16);

        state[c] = state[c].wrapping_add(state[d]);
        state[b] ^= state[c];
        state[b] = state[b].rotate_left(12);

        state[a] = state[a].wrapping_add(state[b]);
        state[d] ^= state[a];
        state[d] = state[d].rotate_left(8);

        state[c] = state[c].wrapping_add(state[d]);
        state[b] ^= state[c];
        state[b] = state[b].rotate_left(7);
    }

    /// Run the 20-round permutation over `state` and return the output
    /// block (working state + initial state).
    fn permute(state: &[u32; 16]) -> [u32; 16] {
        let mut working = *state;
        for _ in 0..10 {
            // Column rounds
            Self::quarter_round(&mut working, 0, 4, 8, 12);
            Self::quarter_round(&mut working, 1, 5, 9, 13);
            Self::quarter_round(&mut working, 2, 6, 10, 14);
            Self::quarter_round(&mut working, 3, 7, 11, 15);

            // Diagonal rounds
            Self::quarter_round(&mut working, 0, 5, 10, 15);
            Self::quarter_round(&mut working, 1, 6, 11, 12);
            Self::quarter_round(&mut working, 2, 7, 8, 13);
            Self::quarter_round(&mut working, 3, 4, 9, 14);
        }
        for i in 0..16 {
            working[i] = working[i].wrapping_add(state[i]);
        }
        working
    }

    fn refill(&mut self) {
        self.buffer = Self::permute(&self.state);
        // 64-bit block counter across words 12-13, low word first.
        self.state[12] = self.state[12].wrapping_add(1);
        if self.state[12] == 0 {
            self.state[13] = self.state[13].wrapping_add(1);
        }
        self.pos = 0;
    }

    /// Next 32 bits of keystream.
    #[inline]
    pub fn next32(&mut self) -> u32 {
        if self.pos >= 16 {
            self.refill();
        }
        let word = self.buffer[self.pos];
        self.pos += 1;
        word
    }

    /// Next 64 bits of keystream (low word drawn first).
    #[inline]
    pub fn next64(&mut self) -> u64 {
        let lo = u64::from(self.next32());
        let hi = u64::from(self.next32());
        (hi << 32) | lo
    }
}

/// RFC 7539 section 2.3.2: initial state with the test key, counter 1 and
/// the 96-bit test nonce.
const RFC7539_STATE: [u32; 16] = [
    0x6170_7865,
    0x3320_646e,
    0x7962_2d32,
    0x6b20_6574,
    0x0302_0100,
    0x0706_0504,
    0x0b0a_0908,
    0x0f0e_0d0c,
    0x1312_1110,
    0x1716_1514,
    0x1b1a_1918,
    0x1f1e_1d1c,
    0x0000_0001,
    0x0900_0000,
    0x4a00_0000,
    0x0000_0000,
];

/// The 16-word output block listed in RFC 7539 section 2.3.2.
const RFC7539_BLOCK: [u32; 16] = [
    0xe4e7_f110,
    0x1559_3bd1,
    0x1fdd_0f50,
    0xc471_20a3,
    0xc7f4_d1c7,
    0x0368_c033,
    0x9aaa_2204,
    0x4e6c_d4c3,
    0x4664_82d2,
    0x09aa_9f07,
    0x05d7_c214,
    0xa202_8bd9,
    0xd19c_12b5,
    0xb94e_16de,
    0xe883_d0cb,
    0x4e3c_50a2,
];

/// Mandatory startup self-test against the RFC 7539 vector.
pub fn self_test() -> bool {
    ChaCha20::permute(&RFC7539_STATE) == RFC7539_BLOCK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7539_block() {
        assert_eq!(ChaCha20::permute(&RFC7539_STATE), RFC7539_BLOCK);
        assert!(self_test());
    }

    #[test]
    fn test_rfc7539_block_through_next32() {
        let mut rng = ChaCha20::from_raw_state(RFC7539_STATE);
        for &expected in &RFC7539_BLOCK {
            assert_eq!(rng.next32(), expected);
        }
    }

    #[test]
    fn test_counter_carry() {
        let mut rng = ChaCha20::new(&[0u8; 32], 0);
        rng.state[12] = u32::MAX;
        rng.refill();
        assert_eq!(rng.state[12], 0);
        assert_eq!(rng.state[13], 1);
    }

    #[test]
    fn test_deterministic_and_key_sensitive() {
        let mut a = ChaCha20::new(&[0x42u8; 32], 7);
        let mut b = ChaCha20::new(&[0x42u8; 32], 7);
        for _ in 0..64 {
            assert_eq!(a.next64(), b.next64());
        }
        let mut c = ChaCha20::new(&[0x43u8; 32], 7);
        assert_ne!(a.next64(), c.next64());
        let mut d = ChaCha20::new(&[0x42u8; 32], 8);
        let mut e = ChaCha20::new(&[0x42u8; 32], 7);
        assert_ne!(d.next64(), e.next64());
    }

    #[test]
    fn test_next64_word_order() {
        // next64 must compose two buffer words little-endian-style,
        // low word first.
        let mut a = ChaCha20::new(&[1u8; 32], 0);
        let mut b = ChaCha20::new(&[1u8; 32], 0);
        let lo = a.next32();
        let hi = a.next32();
        assert_eq!(b.next64(), (u64::from(hi) << 32) | u64::from(lo));
    }

    #[test]
    fn test_blocks_differ() {
        let mut rng = ChaCha20::new(&[9u8; 32], 0);
        let first: Vec<u32> = (0..16).map(|_| rng.next32()).collect();
        let second: Vec<u32> = (0..16).map(|_| rng.next32()).collect();
        assert_ne!(first, second);
    }
}
