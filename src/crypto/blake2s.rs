//! Blake2s hash function (RFC 7693).
//!
//! Variable digest length 1..=32 bytes and optional keyed mode (the key is
//! padded to one 64-byte block and hashed first). Ten rounds of G-mixing
//! over the fixed sigma permutation table; the final block is signalled by
//! inverting v[14].

const BLAKE2S_BLOCKBYTES: usize = 64;
const BLAKE2S_OUTBYTES: usize = 32;
const BLAKE2S_KEYBYTES: usize = 32;

const BLAKE2S_IV: [u32; 8] = [
    0x6a09_e667,
    0xbb67_ae85,
    0x3c6e_f372,
    0xa54f_f53a,
    0x510e_527f,
    0x9b05_688c,
    0x1f83_d9ab,
    0x5be0_cd19,
];

const BLAKE2S_SIGMA: [[usize; 16]; 10] = [
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

/// Incremental Blake2s state. Stack-allocated per call site.
#[derive(Clone)]
pub struct Blake2s {
    h: [u32; 8],
    t: [u32; 2],
    buf: [u8; BLAKE2S_BLOCKBYTES],
    buflen: usize,
    outlen: usize,
}

impl Blake2s {
    /// Unkeyed hasher producing `outlen` bytes, 1..=32.
    pub fn new(outlen: usize) -> Self {
        assert!(
            (1..=BLAKE2S_OUTBYTES).contains(&outlen),
            "blake2s digest length must be 1..=32"
        );
        let mut h = BLAKE2S_IV;
        // Parameter block: digest_length | key_length << 8 | fanout << 16
        // | depth << 24, remaining fields zero.
        h[0] ^= 0x0101_0000 ^ (outlen as u32);
        Self {
            h,
            t: [0; 2],
            buf: [0; BLAKE2S_BLOCKBYTES],
            buflen: 0,
            outlen,
        }
    }

    /// Keyed hasher. The key (at most 32 bytes) is zero-padded to a full
    /// block and processed ahead of the message.
    pub fn new_keyed(key: &[u8], outlen: usize) -> Self {
        assert!(
            (1..=BLAKE2S_OUTBYTES).contains(&outlen),
            "blake2s digest length must be 1..=32"
        );
        assert!(key.len() <= BLAKE2S_KEYBYTES, "blake2s key must be <= 32 bytes");
        let mut h = BLAKE2S_IV;
        h[0] ^= 0x0101_0000 ^ ((key.len() as u32) << 8) ^ (outlen as u32);
        let mut state = Self {
            h,
            t: [0; 2],
            buf: [0; BLAKE2S_BLOCKBYTES],
            buflen: 0,
            outlen,
        };
        if !key.is_empty() {
            state.buf[..key.len()].copy_from_slice(key);
            state.buflen = BLAKE2S_BLOCKBYTES;
        }
        state
    }

    /// Absorb input data.
    pub fn update(&mut self, mut input: &[u8]) {
        while !input.is_empty() {
            if self.buflen == BLAKE2S_BLOCKBYTES {
                // Buffer is full and more data follows, so this cannot be
                // the final block yet.
                self.increment_counter(BLAKE2S_BLOCKBYTES as u32);
                let block = self.buf;
                self.compress(&block, false);
                self.buflen = 0;
            }
            let take = (BLAKE2S_BLOCKBYTES - self.buflen).min(input.len());
            self.buf[self.buflen..self.buflen + take].copy_from_slice(&input[..take]);
            self.buflen += take;
            input = &input[take..];
        }
    }

    /// Finish and write the digest prefix of `outlen` bytes.
    pub fn finalize(mut self) -> [u8; BLAKE2S_OUTBYTES] {
        self.increment_counter(self.buflen as u32);
        for b in self.buf[self.buflen..].iter_mut() {
            *b = 0;
        }
        let block = self.buf;
        self.compress(&block, true);

        let mut out = [0u8; BLAKE2S_OUTBYTES];
        for (i, &word) in self.h.iter().enumerate() {
            out[i * 4..(i + 1) * 4].copy_from_slice(&word.to_le_bytes());
        }
        for b in out[self.outlen..].iter_mut() {
            *b = 0;
        }
        out
    }

    /// Digest length this state was constructed with.
    pub fn outlen(&self) -> usize {
        self.outlen
    }

    fn increment_counter(&mut self, inc: u32) {
        self.t[0] = self.t[0].wrapping_add(inc);
        if self.t[0] < inc {
            self.t[1] = self.t[1].wrapping_add(1);
        }
    }

    fn compress(&mut self, block: &[u8; BLAKE2S_BLOCKBYTES], last: bool) {
        let mut m = [0u32; 16];
        for (i, chunk) in block.chunks_exact(4).enumerate() {
            m[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let mut v = [0u32; 16];
        v[..8].copy_from_slice(&self.h);
        v[8..].copy_from_slice(&BLAKE2S_IV);
        v[12] ^= self.t[0];
        v[13] ^= self.t[1];
        if last {
            v[14] ^= u32::MAX;
        }

        for sigma in &BLAKE2S_SIGMA {
            // Column mixing
            Self::g(&mut v, 0, 4, 8, 12, m[sigma[0]], m[sigma[1]]);
            Self::g(&mut v, 1, 5, 9, 13, m[sigma[2]], m[sigma[3]]);
            Self::g(&mut v, 2, 6, 10, 14, m[sigma[4]], m[sigma[5]]);
            Self::g(&mut v, 3, 7, 11, 15, m[sigma[6]], m[sigma[7]]);

            // Diagonal mixing
            Self::g(&mut v, 0, 5, 10, 15, m[sigma[8]], m[sigma[9]]);
            Self::g(&mut v, 1, 6, 11, 12, m[sigma[10]], m[sigma[11]]);
            Self::g(&mut v, 2, 7, 8, 13, m[sigma[12]], m[sigma[13]]);
            Self::g(&mut v, 3, 4, 9, 14, m[sigma[14]], m[sigma[15]]);
        }

        for i in 0..8 {
            self.h[i] ^= v[i] ^ v[i + 8];
        }
    }

    #[inline(always)]
    fn g(v: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize, x: u32, y: u32) {
        v[a] = v[a].wrapping_add(v[b]).wrapping_add(x);
        v[d] = (v[d] ^ v[a]).rotate_right(16);
        v[c] = v[c].wrapping_add(v[d]);
        v[b] = (v[b] ^ v[c]).rotate_right(12);
        v[a] = v[a].wrapping_add(v[b]).wrapping_add(y);
        v[d] = (v[d] ^ v[a]).rotate_right(8);
        v[c] = v[c].wrapping_add(v[d]);
        v[b] = (v[b] ^ v[c]).rotate_right(7);
    }
}

/// One-shot Blake2s over `data`, optionally keyed.
pub fn blake2s(outlen: usize, key: Option<&[u8]>, data: &[u8]) -> [u8; BLAKE2S_OUTBYTES] {
    let mut state = match key {
        Some(k) => Blake2s::new_keyed(k, outlen),
        None => Blake2s::new(outlen),
    };
    state.update(data);
    state.finalize()
}

/// RFC 7693 appendix B digest of "abc".
const RFC7693_ABC: [u8; 32] = [
    0x50, 0x8c, 0x5e, 0x8c, 0x32, 0x7c, 0x14, 0xe2, 0xe1, 0xa7, 0x2b, 0xa3, 0x4e, 0xeb, 0x45,
    0x2f, 0x37, 0x45, 0x8b, 0x20, 0x9e, 0xd6, 0x3a, 0x29, 0x4d, 0x99, 0x9b, 0x4c, 0x86, 0x67,
    0x59, 0x82,
];

/// Mandatory startup self-test against the RFC 7693 vector.
pub fn self_test() -> bool {
    blake2s(32, None, b"abc") == RFC7693_ABC
}
