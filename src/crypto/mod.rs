//! Hashing and stream-cipher primitives backing the entropy source.

pub mod blake2s;
pub mod chacha20;
pub mod seedfmt;

pub use blake2s::{Blake2s, blake2s};
pub use chacha20::ChaCha20;
pub use seedfmt::{SeedFormatError, decode_seed, encode_seed};
