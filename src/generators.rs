//! Built-in PRNG registry.
//!
//! A small stable of generators used by the demo batteries and the harness
//! tests: two believed-good references (chacha20, splitmix64), the classic
//! structurally weak families the batteries are designed to expose (LCGs
//! with truncated output, additive lagged Fibonacci, subtract-with-borrow
//! with and without a Weyl mixer), and two degenerate sources for guard
//! and ordering tests.

use crate::crypto::ChaCha20;
use crate::generator::{CallerApi, Generator, GeneratorInfo};

/// All registered generators, in display order.
pub fn all() -> &'static [GeneratorInfo] {
    &REGISTRY
}

/// Look a generator up by name (case-sensitive, like the CLI).
pub fn find(name: &str) -> Option<&'static GeneratorInfo> {
    REGISTRY.iter().find(|info| info.name == name)
}

static REGISTRY: [GeneratorInfo; 9] = [
    GeneratorInfo {
        name: "chacha20",
        description: "ChaCha20 keystream, 64-bit draws (reference-quality)",
        nbits: 64,
        create: create_chacha20,
        self_test: Some(chacha20_self_test),
    },
    GeneratorInfo {
        name: "splitmix64",
        description: "SplitMix64, 64-bit draws (reference-quality)",
        nbits: 64,
        create: create_splitmix64,
        self_test: Some(splitmix64_self_test),
    },
    GeneratorInfo {
        name: "lcg64",
        description: "128-bit LCG truncated to the high 64 bits",
        nbits: 64,
        create: create_lcg64,
        self_test: None,
    },
    GeneratorInfo {
        name: "lcg69069",
        description: "32-bit LCG x = 69069 x + 1 (weak low bits)",
        nbits: 32,
        create: create_lcg69069,
        self_test: None,
    },
    GeneratorInfo {
        name: "alfib",
        description: "Additive lagged Fibonacci (55, 24) mod 2^64",
        nbits: 64,
        create: create_alfib,
        self_test: None,
    },
    GeneratorInfo {
        name: "swb",
        description: "Subtract-with-borrow (43, 22) mod 2^32",
        nbits: 32,
        create: create_swb,
        self_test: None,
    },
    GeneratorInfo {
        name: "swbw",
        description: "Subtract-with-borrow (43, 22) with a Weyl mixer",
        nbits: 32,
        create: create_swbw,
        self_test: None,
    },
    GeneratorInfo {
        name: "counter",
        description: "64-bit counter (degenerate, fails everything)",
        nbits: 64,
        create: create_counter,
        self_test: None,
    },
    GeneratorInfo {
        name: "zero",
        description: "Constant zero, 32-bit draws (degenerate)",
        nbits: 32,
        create: create_zero,
        self_test: None,
    },
];

// --- chacha20 ---------------------------------------------------------

struct ChaCha20Gen {
    rng: ChaCha20,
}

impl Generator for ChaCha20Gen {
    fn get_bits(&mut self) -> u64 {
        self.rng.next64()
    }
}

fn create_chacha20(api: &CallerApi, thread_id: usize) -> Box<dyn Generator> {
    let mut key = [0u8; 32];
    for chunk in key.chunks_exact_mut(8) {
        chunk.copy_from_slice(&api.get_seed64(thread_id).to_le_bytes());
    }
    let nonce = api.get_seed64(thread_id);
    Box::new(ChaCha20Gen {
        rng: ChaCha20::new(&key, nonce),
    })
}

fn chacha20_self_test(_api: &CallerApi) -> bool {
    crate::crypto::chacha20::self_test()
}

// --- splitmix64 -------------------------------------------------------

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn next(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

impl Generator for SplitMix64 {
    fn get_bits(&mut self) -> u64 {
        self.next()
    }

    fn get_sum(&mut self, len: u64) -> u64 {
        let mut sum = 0u64;
        for _ in 0..len {
            sum = sum.wrapping_add(self.next());
        }
        sum
    }
}

fn create_splitmix64(api: &CallerApi, thread_id: usize) -> Box<dyn Generator> {
    Box::new(SplitMix64 {
        state: api.get_seed64(thread_id),
    })
}

fn splitmix64_self_test(_api: &CallerApi) -> bool {
    // Known first output for seed 0.
    let mut g = SplitMix64 { state: 0 };
    g.next() == 0xe220_a839_7b1d_cdaf
}

// --- lcg64 (truncated 128-bit LCG) ------------------------------------

struct Lcg64 {
    state: u128,
}

impl Generator for Lcg64 {
    fn get_bits(&mut self) -> u64 {
        // PCG's 128-bit multiplier; output is the high half only, which
        // is exactly the truncation the decimated birthday test targets.
        self.state = self
            .state
            .wrapping_mul(0x2360_ed05_1fc6_5da4_4385_df64_9fcc_f645)
            .wrapping_add(0x5851_f42d_4c95_7f2d);
        (self.state >> 64) as u64
    }
}

fn create_lcg64(api: &CallerApi, thread_id: usize) -> Box<dyn Generator> {
    let hi = u128::from(api.get_seed64(thread_id));
    let lo = u128::from(api.get_seed64(thread_id));
    Box::new(Lcg64 {
        state: (hi << 64) | lo | 1,
    })
}

// --- lcg69069 ---------------------------------------------------------

struct Lcg69069 {
    state: u32,
}

impl Generator for Lcg69069 {
    fn get_bits(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(69069).wrapping_add(1);
        u64::from(self.state)
    }
}

fn create_lcg69069(api: &CallerApi, thread_id: usize) -> Box<dyn Generator> {
    Box::new(Lcg69069 {
        state: api.get_seed32(thread_id),
    })
}

// --- alfib ------------------------------------------------------------

const ALFIB_LONG: usize = 55;
const ALFIB_SHORT: usize = 24;

struct Alfib {
    lags: [u64; ALFIB_LONG],
    pos: usize,
}

impl Generator for Alfib {
    fn get_bits(&mut self) -> u64 {
        let short_pos = (self.pos + ALFIB_LONG - ALFIB_SHORT) % ALFIB_LONG;
        let value = self.lags[self.pos].wrapping_add(self.lags[short_pos]);
        self.lags[self.pos] = value;
        self.pos = (self.pos + 1) % ALFIB_LONG;
        value
    }
}

fn create_alfib(api: &CallerApi, thread_id: usize) -> Box<dyn Generator> {
    // Fill the lag table from a SplitMix64 expansion of one seed so a
    // single audit-log entry captures the whole state.
    let mut expander = SplitMix64 {
        state: api.get_seed64(thread_id),
    };
    let mut lags = [0u64; ALFIB_LONG];
    for lag in lags.iter_mut() {
        *lag = expander.next();
    }
    lags[0] |= 1;
    Box::new(Alfib { lags, pos: 0 })
}

// --- swb / swbw -------------------------------------------------------

const SWB_LONG: usize = 43;
const SWB_SHORT: usize = 22;

struct Swb {
    lags: [u32; SWB_LONG],
    carry: u32,
    pos: usize,
    weyl: u32,
    use_weyl: bool,
}

impl Generator for Swb {
    fn get_bits(&mut self) -> u64 {
        let short_pos = (self.pos + SWB_LONG - SWB_SHORT) % SWB_LONG;
        let (diff, borrow1) = self.lags[short_pos].overflowing_sub(self.lags[self.pos]);
        let (diff, borrow2) = diff.overflowing_sub(self.carry);
        self.carry = u32::from(borrow1 || borrow2);
        self.lags[self.pos] = diff;
        self.pos = (self.pos + 1) % SWB_LONG;
        if self.use_weyl {
            self.weyl = self.weyl.wrapping_add(0x9e37_79b9);
            u64::from(diff.wrapping_add(self.weyl))
        } else {
            u64::from(diff)
        }
    }
}

fn create_swb_common(api: &CallerApi, thread_id: usize, use_weyl: bool) -> Box<dyn Generator> {
    let mut expander = SplitMix64 {
        state: api.get_seed64(thread_id),
    };
    let mut lags = [0u32; SWB_LONG];
    for lag in lags.iter_mut() {
        *lag = expander.next() as u32;
    }
    Box::new(Swb {
        lags,
        carry: 0,
        pos: 0,
        weyl: expander.next() as u32,
        use_weyl,
    })
}

fn create_swb(api: &CallerApi, thread_id: usize) -> Box<dyn Generator> {
    create_swb_common(api, thread_id, false)
}

fn create_swbw(api: &CallerApi, thread_id: usize) -> Box<dyn Generator> {
    create_swb_common(api, thread_id, true)
}

// --- degenerate sources ------------------------------------------------

struct Counter {
    state: u64,
}

impl Generator for Counter {
    fn get_bits(&mut self) -> u64 {
        self.state = self.state.wrapping_add(1);
        self.state
    }
}

fn create_counter(api: &CallerApi, thread_id: usize) -> Box<dyn Generator> {
    Box::new(Counter {
        state: api.get_seed64(thread_id),
    })
}

struct Zero;

impl Generator for Zero {
    fn get_bits(&mut self) -> u64 {
        0
    }
}

fn create_zero(_api: &CallerApi, _thread_id: usize) -> Box<dyn Generator> {
    Box::new(Zero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::Entropy;
    use crate::generator::{GeneratorState, NullPrinter};
    use std::sync::Arc;

    fn make_api() -> CallerApi {
        CallerApi::new(
            Entropy::from_text("generators test seed").unwrap(),
            Arc::new(NullPrinter),
        )
    }

    #[test]
    fn test_registry_lookup() {
        assert!(find("chacha20").is_some());
        assert!(find("splitmix64").is_some());
        assert!(find("no_such_generator").is_none());
        assert_eq!(all().len(), 9);
    }

    #[test]
    fn test_splitmix64_reference_output() {
        let api = make_api();
        assert!(splitmix64_self_test(&api));
    }

    #[test]
    fn test_width_contract_for_32bit_generators() {
        let api = make_api();
        for name in ["lcg69069", "swb", "swbw", "zero"] {
            let info = find(name).unwrap();
            let mut state = GeneratorState::create(info, &api, 0);
            assert!(
                state.verify_width(1000),
                "{name} leaked bits above its declared width"
            );
        }
    }

    #[test]
    fn test_get_sum_matches_serial_draws() {
        for name in ["chacha20", "splitmix64", "lcg64", "alfib", "swb"] {
            let info = find(name).unwrap();
            // Two states from a deterministic seeder diverge, so rebuild
            // the api per state with the same text seed.
            let api_a = make_api();
            let api_b = make_api();
            let mut a = GeneratorState::create(info, &api_a, 0);
            let mut b = GeneratorState::create(info, &api_b, 0);
            let mut serial = 0u64;
            for _ in 0..257 {
                serial = serial.wrapping_add(a.get_bits());
            }
            assert_eq!(b.get_sum(257), serial, "get_sum mismatch for {name}");
        }
    }

    #[test]
    fn test_zero_generator_is_zero() {
        let api = make_api();
        let mut state = GeneratorState::create(find("zero").unwrap(), &api, 0);
        for _ in 0..10 {
            assert_eq!(state.get_bits(), 0);
        }
    }

    #[test]
    fn test_distinct_threads_get_distinct_streams() {
        let api = make_api();
        let info = find("splitmix64").unwrap();
        let mut a = GeneratorState::create(info, &api, 0);
        let mut b = GeneratorState::create(info, &api, 1);
        let xs: Vec<u64> = (0..8).map(|_| a.get_bits()).collect();
        let ys: Vec<u64> = (0..8).map(|_| b.get_bits()).collect();
        assert_ne!(xs, ys);
    }
}
