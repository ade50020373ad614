//! Deterministic ChaCha20-based seed source.
//!
//! The seeder keys a ChaCha20 instance with Blake2s-256 over either the OS
//! CSPRNG, a portable composite of hardware / timing / machine-id sources
//! (when the OS path is unavailable), a user-supplied text seed, or an
//! exact 256-bit base64 key. It is the single process-wide source of test
//! seeds and keeps a bounded audit log of every draw.
//!
//! This is NOT a cryptographic RNG; the seeder exists so battery runs are
//! reproducible and auditable, and is explicitly unsuitable for key
//! generation.

#[cfg(unix)]
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::warn;
use zeroize::Zeroize;

use crate::crypto::{self, ChaCha20, SeedFormatError, blake2s};

/// Fixed nonce used unless a caller overrides it.
const DEFAULT_NONCE: u64 = 0x5d3c_0a8f_9b42_711e;

/// Size of the composite bootstrap buffer.
const BOOTSTRAP_BYTES: usize = 128;

/// Audit log starts at this capacity and doubles up to the maximum.
const AUDIT_LOG_INITIAL: usize = 16;

/// Hard cap on audit records; draws beyond this stop being recorded.
const AUDIT_LOG_MAX: usize = 4096;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("crypto self-test failed: {0}")]
    SelfTest(&'static str),
    #[error(transparent)]
    Format(#[from] SeedFormatError),
}

/// One recorded seed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedRecord {
    pub thread_id: usize,
    pub seed: u64,
}

/// Process-wide seed source. Owns its ChaCha20 state and audit log; the
/// battery runner wraps it in a mutex and is the sole owner.
pub struct Entropy {
    rng: ChaCha20,
    log: Vec<SeedRecord>,
}

impl Entropy {
    /// Bootstrap from the OS CSPRNG, falling back to the composite
    /// entropy buffer with a warning when the OS path is unavailable.
    pub fn from_system() -> Result<Self, SeedError> {
        self_test()?;
        let mut buffer = [0u8; BOOTSTRAP_BYTES];
        let os_ok = fill_os_entropy(&mut buffer);
        if !os_ok {
            warn!("OS CSPRNG unavailable; falling back to composite entropy sources");
            fill_composite_entropy(&mut buffer);
        }
        let mut key = blake2s(32, None, &buffer);
        buffer.zeroize();
        let rng = ChaCha20::new(&key, DEFAULT_NONCE);
        key.zeroize();
        Ok(Self::with_rng(rng))
    }

    /// Deterministic seeder keyed by Blake2s-256 of a text seed.
    pub fn from_text(seed: &str) -> Result<Self, SeedError> {
        self_test()?;
        let key = blake2s(32, None, seed.as_bytes());
        Ok(Self::with_rng(ChaCha20::new(&key, DEFAULT_NONCE)))
    }

    /// Deterministic seeder from an exact 256-bit base64 key.
    pub fn from_base64(text: &str) -> Result<Self, SeedError> {
        self_test()?;
        let words = crypto::decode_seed(text)?;
        Self::from_key_words(words, DEFAULT_NONCE)
    }

    /// Deterministic seeder from explicit key words, overriding the
    /// default nonce.
    pub fn from_key_words(words: [u32; 8], nonce: u64) -> Result<Self, SeedError> {
        self_test()?;
        Ok(Self::with_rng(ChaCha20::from_key_words(&words, nonce)))
    }

    fn with_rng(rng: ChaCha20) -> Self {
        Self {
            rng,
            log: Vec::with_capacity(AUDIT_LOG_INITIAL),
        }
    }

    /// Draw 32 seed bits for `thread_id`, recording the draw.
    pub fn seed32(&mut self, thread_id: usize) -> u32 {
        let seed = self.rng.next32();
        self.record(thread_id, u64::from(seed));
        seed
    }

    /// Draw 64 seed bits for `thread_id`, recording the draw.
    pub fn seed64(&mut self, thread_id: usize) -> u64 {
        let seed = self.rng.next64();
        self.record(thread_id, seed);
        seed
    }

    fn record(&mut self, thread_id: usize, seed: u64) {
        if self.log.len() >= AUDIT_LOG_MAX {
            // Log is saturated; draws continue unrecorded.
            return;
        }
        if self.log.len() == self.log.capacity() {
            let grown = (self.log.capacity() * 2).min(AUDIT_LOG_MAX);
            self.log.reserve_exact(grown - self.log.len());
        }
        self.log.push(SeedRecord { thread_id, seed });
    }

    /// The audit log of draws so far (oldest first).
    pub fn audit_log(&self) -> &[SeedRecord] {
        &self.log
    }
}

/// Run the mandatory ChaCha20 / Blake2s RFC vector checks.
pub fn self_test() -> Result<(), SeedError> {
    if !crypto::chacha20::self_test() {
        return Err(SeedError::SelfTest("chacha20 RFC 7539 vector mismatch"));
    }
    if !crypto::blake2s::self_test() {
        return Err(SeedError::SelfTest("blake2s RFC 7693 vector mismatch"));
    }
    Ok(())
}

/// Fill `buffer` from the OS CSPRNG. Returns false when no OS source
/// could be read.
fn fill_os_entropy(buffer: &mut [u8]) -> bool {
    #[cfg(unix)]
    {
        for path in ["/dev/urandom", "/dev/random"] {
            if let Ok(mut file) = std::fs::File::open(path)
                && file.read_exact(buffer).is_ok()
            {
                return true;
            }
        }
        false
    }

    #[cfg(windows)]
    {
        // advapi32's RtlGenRandom, linked the same way the reference
        // entropy collectors do.
        #[link(name = "advapi32")]
        unsafe extern "system" {
            fn SystemFunction036(buffer: *mut u8, length: u32) -> u8;
        }
        unsafe { SystemFunction036(buffer.as_mut_ptr(), buffer.len() as u32) != 0 }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = buffer;
        false
    }
}

/// Populate the 128-byte fallback buffer: OS bytes (already zero here),
/// four hardware-RNG reads, wall time, cycle counter, two machine-id
/// words, a tick reading and the pid.
fn fill_composite_entropy(buffer: &mut [u8; BOOTSTRAP_BYTES]) {
    for i in 0..4 {
        let hw = read_hardware_rng();
        buffer[32 + i * 8..40 + i * 8].copy_from_slice(&hw.to_le_bytes());
    }

    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    buffer[64..72].copy_from_slice(&wall.to_le_bytes());

    buffer[72..80].copy_from_slice(&read_cycle_counter().to_le_bytes());

    let machine = machine_id_words();
    buffer[80..96].copy_from_slice(&machine);

    let ticks = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    buffer[96..104].copy_from_slice(&ticks.to_le_bytes());

    buffer[104..108].copy_from_slice(&std::process::id().to_le_bytes());
}

#[cfg(target_arch = "x86_64")]
fn read_hardware_rng() -> u64 {
    if std::arch::is_x86_feature_detected!("rdrand") {
        #[target_feature(enable = "rdrand")]
        fn rdrand64() -> u64 {
            let mut value = 0u64;
            let ok = unsafe { core::arch::x86_64::_rdrand64_step(&mut value) };
            if ok == 1 { value } else { 0 }
        }
        unsafe { rdrand64() }
    } else {
        0
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn read_hardware_rng() -> u64 {
    0
}

#[cfg(target_arch = "x86_64")]
fn read_cycle_counter() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
fn read_cycle_counter() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Blake2s-128 over a platform identifier source.
fn machine_id_words() -> [u8; 16] {
    let identifier = read_machine_identifier();
    let digest = blake2s(16, None, identifier.as_bytes());
    let mut words = [0u8; 16];
    words.copy_from_slice(&digest[..16]);
    words
}

fn read_machine_identifier() -> String {
    #[cfg(unix)]
    {
        for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(id) = std::fs::read_to_string(path) {
                return id;
            }
        }
    }
    // Last resort: executable path plus hostname-ish environment.
    let exe = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default();
    format!("{exe}:{host}")
}
