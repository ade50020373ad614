//! Base64 exchange format for 256-bit seeds.
//!
//! A key is exactly 44 standard-alphabet base64 characters decoding to 32
//! bytes, read as 8 big-endian u32 words. Anything that does not carry
//! exactly 256 payload bits is rejected.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedFormatError {
    #[error("seed is not valid base64: {0}")]
    Malformed(String),
    #[error("seed decodes to {0} bytes, expected exactly 32")]
    WrongLength(usize),
}

/// Encode a 256-bit key (8 big-endian u32 words) as 44 base64 characters.
pub fn encode_seed(words: &[u32; 8]) -> String {
    let mut bytes = [0u8; 32];
    for (i, &w) in words.iter().enumerate() {
        bytes[i * 4..(i + 1) * 4].copy_from_slice(&w.to_be_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode 44 base64 characters into 8 big-endian u32 key words.
pub fn decode_seed(text: &str) -> Result<[u32; 8], SeedFormatError> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| SeedFormatError::Malformed(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(SeedFormatError::WrongLength(bytes.len()));
    }
    let mut words = [0u32; 8];
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        words[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(words)
}
