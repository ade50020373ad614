//! Generator adapter: the canonical interface a PRNG under test
//! implements, plus the host capabilities handed to generators and tests.
//!
//! Generators register through a static `GeneratorInfo` descriptor and a
//! factory; the live per-thread state exclusively owns its inner generator
//! and enforces the output-width contract. The host side is `CallerApi`:
//! thread-safe seed draws serialized through the entropy mutex, an
//! injected line printer, and a physical-RAM query.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::entropy::Entropy;

/// A PRNG under test. One draw per `get_bits` call, zero-extended to 64
/// bits; `get_sum` batches `len` draws for tests that consume bulk output
/// and may be overridden with a vectorized inner loop.
pub trait Generator: Send {
    fn get_bits(&mut self) -> u64;

    fn get_sum(&mut self, len: u64) -> u64 {
        let mut sum = 0u64;
        for _ in 0..len {
            sum = sum.wrapping_add(self.get_bits());
        }
        sum
    }
}

/// Static descriptor of a registered PRNG.
pub struct GeneratorInfo {
    pub name: &'static str,
    pub description: &'static str,
    /// Width of one draw; 32 or 64.
    pub nbits: u32,
    /// Builds a fresh state, drawing seeds through the api.
    pub create: fn(api: &CallerApi, thread_id: usize) -> Box<dyn Generator>,
    pub self_test: Option<fn(api: &CallerApi) -> bool>,
}

/// Live per-thread generator state. Exclusively owns its inner generator;
/// the descriptor is shared read-only.
pub struct GeneratorState {
    info: &'static GeneratorInfo,
    inner: Box<dyn Generator>,
}

impl GeneratorState {
    pub fn create(info: &'static GeneratorInfo, api: &CallerApi, thread_id: usize) -> Self {
        let inner = (info.create)(api, thread_id);
        Self { info, inner }
    }

    pub fn info(&self) -> &'static GeneratorInfo {
        self.info
    }

    pub fn nbits(&self) -> u32 {
        self.info.nbits
    }

    /// One draw, zero-extended to 64 bits.
    #[inline]
    pub fn get_bits(&mut self) -> u64 {
        let value = self.inner.get_bits();
        debug_assert!(
            self.info.nbits == 64 || value >> self.info.nbits == 0,
            "generator '{}' violated its {}-bit width contract",
            self.info.name,
            self.info.nbits
        );
        value
    }

    /// Sum modulo 2^64 of `len` consecutive draws.
    #[inline]
    pub fn get_sum(&mut self, len: u64) -> u64 {
        self.inner.get_sum(len)
    }

    /// Spot-check the width contract on a short run of draws. The runner
    /// calls this once after `create`; a violation is a battery error.
    pub fn verify_width(&mut self, ndraws: usize) -> bool {
        if self.info.nbits == 64 {
            return true;
        }
        (0..ndraws).all(|_| self.inner.get_bits() >> self.info.nbits == 0)
    }
}

/// Physical memory description returned by `CallerApi::ram_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Formatted-output capability injected into generators and tests. The
/// implementation decides whether lines are serialized across threads.
pub trait Printer: Send + Sync {
    fn print_line(&self, line: &str);
}

/// Default printer writing to stdout.
pub struct StdoutPrinter;

impl Printer for StdoutPrinter {
    fn print_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Printer that swallows output; used by tests and by `print_info` paths
/// that only need scheduling metadata.
pub struct NullPrinter;

impl Printer for NullPrinter {
    fn print_line(&self, _line: &str) {}
}

/// Host capabilities exposed to generators and tests. Process-wide; the
/// entropy seeder behind the mutex is the only shared mutable state.
pub struct CallerApi {
    entropy: Mutex<Entropy>,
    printer: Arc<dyn Printer>,
}

impl CallerApi {
    pub fn new(entropy: Entropy, printer: Arc<dyn Printer>) -> Self {
        Self {
            entropy: Mutex::new(entropy),
            printer,
        }
    }

    /// Draw 32 fresh seed bits. Thread-safe.
    pub fn get_seed32(&self, thread_id: usize) -> u32 {
        self.entropy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .seed32(thread_id)
    }

    /// Draw 64 fresh seed bits. Thread-safe.
    pub fn get_seed64(&self, thread_id: usize) -> u64 {
        self.entropy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .seed64(thread_id)
    }

    /// Hold the seeder across a whole `create` call. The seeder is
    /// single-threaded, so generator construction serializes here.
    pub fn lock_entropy(&self) -> MutexGuard<'_, Entropy> {
        self.entropy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn print_line(&self, line: &str) {
        self.printer.print_line(line);
    }

    /// Physical total / available RAM, or `None` when unknown.
    pub fn ram_info(&self) -> Option<RamInfo> {
        read_ram_info()
    }
}

#[cfg(target_os = "linux")]
fn read_ram_info() -> Option<RamInfo> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_meminfo_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = parse_meminfo_kb(rest);
        }
    }
    Some(RamInfo {
        total_bytes: total?,
        available_bytes: available.or(total)?,
    })
}

#[cfg(target_os = "linux")]
fn parse_meminfo_kb(rest: &str) -> Option<u64> {
    let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn read_ram_info() -> Option<RamInfo> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Const32(u64);

    impl Generator for Const32 {
        fn get_bits(&mut self) -> u64 {
            self.0
        }
    }

    fn make_api() -> CallerApi {
        let entropy = Entropy::from_text("generator tests").unwrap();
        CallerApi::new(entropy, Arc::new(NullPrinter))
    }

    static WIDTH_OK: GeneratorInfo = GeneratorInfo {
        name: "width_ok",
        description: "32-bit constant inside the contract",
        nbits: 32,
        create: |_, _| Box::new(Const32(0x1234_5678)),
        self_test: None,
    };

    static WIDTH_BAD: GeneratorInfo = GeneratorInfo {
        name: "width_bad",
        description: "claims 32 bits but emits 64",
        nbits: 32,
        create: |_, _| Box::new(Const32(u64::MAX)),
        self_test: None,
    };

    #[test]
    fn test_width_verification() {
        let api = make_api();
        let mut good = GeneratorState::create(&WIDTH_OK, &api, 0);
        assert!(good.verify_width(64));
        let mut bad = GeneratorState::create(&WIDTH_BAD, &api, 0);
        assert!(!bad.verify_width(64));
    }

    #[test]
    fn test_default_get_sum_matches_get_bits() {
        let api = make_api();
        let mut g = GeneratorState::create(&WIDTH_OK, &api, 0);
        let sum = g.get_sum(10);
        assert_eq!(sum, 0x1234_5678u64.wrapping_mul(10));
    }

    #[test]
    fn test_seed_draws_are_recorded_with_thread_id() {
        let api = make_api();
        let _ = api.get_seed64(5);
        let _ = api.get_seed32(2);
        let entropy = api.lock_entropy();
        let log = entropy.audit_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].thread_id, 5);
        assert_eq!(log[1].thread_id, 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_ram_info_on_linux() {
        let api = make_api();
        let info = api.ram_info().expect("/proc/meminfo should parse");
        assert!(info.total_bytes > 0);
        assert!(info.available_bytes <= info.total_bytes);
    }
}
