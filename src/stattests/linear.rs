//! Linear complexity of a single bit position, via Berlekamp-Massey and
//! the Rueppel distribution of the complexity deviation.

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::chi2_pvalue_exact;
use crate::stattests::{StatTest, TestResults};

/// Which bit of each draw feeds the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitPos {
    Low,
    Mid,
    High,
    Fixed(u32),
}

impl BitPos {
    fn index(self, gen_nbits: u32) -> u32 {
        match self {
            BitPos::Low => 0,
            BitPos::Mid => gen_nbits / 2,
            BitPos::High => gen_nbits - 1,
            BitPos::Fixed(b) => b,
        }
    }
}

/// Probabilities of the seven deviation classes of the linear complexity
/// statistic under the Rueppel distribution.
const LC_CLASS_PROBS: [f64; 7] = [
    0.010417, 0.03125, 0.125, 0.5, 0.25, 0.0625, 0.020833,
];

/// Linear complexity test: `nseq` sequences of `nbits` draws each are
/// reduced to the Berlekamp-Massey complexity of one selected bit
/// position, the deviation from the expected complexity is classified
/// into seven Rueppel classes, and the class counts are chi-squared
/// (df = 6).
#[derive(Debug, Clone)]
pub struct LinearComplexity {
    /// Draws per sequence, which is also the sequence length in bits.
    pub nbits: u64,
    pub nseq: u32,
    pub bitpos: BitPos,
}

impl StatTest for LinearComplexity {
    fn name(&self) -> &'static str {
        "linear_complexity"
    }

    fn validate(&self) -> Result<(), String> {
        if !(500..=16384).contains(&self.nbits) {
            return Err("linear_complexity: nbits must be 500..=16384".into());
        }
        if self.nseq < 8 {
            return Err("linear_complexity: nseq must be at least 8".into());
        }
        if let BitPos::Fixed(b) = self.bitpos
            && b > 63
        {
            return Err("linear_complexity: bitpos must be 0..=63".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let bit_index = self.bitpos.index(r#gen.nbits());
        if bit_index >= r#gen.nbits() {
            return TestResults::not_applicable(self.name());
        }

        let n = self.nbits as usize;
        let nf = n as f64;
        let sign_n = if n % 2 == 0 { 1.0 } else { -1.0 };
        // Expected complexity of a random sequence of length n; the
        // 2^-n term underflows for every accepted length.
        let mu = nf / 2.0 + (9.0 - sign_n) / 36.0
            - (nf / 3.0 + 2.0 / 9.0) * 2f64.powi(-(n.min(1000) as i32));

        let mut counts = [0u64; 7];
        let mut bits = vec![0u8; n];
        for _ in 0..self.nseq {
            for b in bits.iter_mut() {
                *b = ((r#gen.get_bits() >> bit_index) & 1) as u8;
            }
            let l = berlekamp_massey(&bits) as f64;
            let t = sign_n * (l - mu) + 2.0 / 9.0;
            let class = if t <= -2.5 {
                0
            } else if t <= -1.5 {
                1
            } else if t <= -0.5 {
                2
            } else if t <= 0.5 {
                3
            } else if t <= 1.5 {
                4
            } else if t <= 2.5 {
                5
            } else {
                6
            };
            counts[class] += 1;
        }

        let total = f64::from(self.nseq);
        let chi2: f64 = counts
            .iter()
            .zip(LC_CLASS_PROBS)
            .map(|(&o, pi)| {
                let e = total * pi;
                let d = o as f64 - e;
                d * d / e
            })
            .sum();
        debug!(test = self.name(), bit_index, chi2, "complexity classes binned");
        TestResults::new(self.name(), chi2, chi2_pvalue_exact(chi2, 6.0))
    }
}

/// Berlekamp-Massey over GF(2): length of the shortest LFSR generating
/// `bits`.
pub(crate) fn berlekamp_massey(bits: &[u8]) -> usize {
    let n = bits.len();
    let mut c = vec![0u8; n + 1];
    let mut b = vec![0u8; n + 1];
    c[0] = 1;
    b[0] = 1;
    let mut l = 0usize;
    // Steps since the auxiliary polynomial was last replaced.
    let mut m = 1usize;

    for pos in 0..n {
        let mut d = bits[pos];
        for i in 1..=l {
            d ^= c[i] & bits[pos - i];
        }
        if d == 0 {
            m += 1;
        } else if 2 * l <= pos {
            let t = c.clone();
            if m <= n {
                for i in 0..=n - m {
                    c[i + m] ^= b[i];
                }
            }
            l = pos + 1 - l;
            b = t;
            m = 1;
        } else {
            if m <= n {
                for i in 0..=n - m {
                    c[i + m] ^= b[i];
                }
            }
            m += 1;
        }
    }
    l
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stattests::testutil::named_state;

    #[test]
    fn test_bm_degenerate_sequences() {
        assert_eq!(berlekamp_massey(&[0, 0, 0, 0, 0, 0]), 0);
        // A lone trailing 1 needs an LFSR as long as the sequence.
        assert_eq!(berlekamp_massey(&[0, 0, 0, 0, 0, 1]), 6);
        // Alternating bits satisfy s_n = s_{n-2}.
        assert_eq!(berlekamp_massey(&[0, 1, 0, 1, 0, 1, 0, 1]), 2);
    }

    #[test]
    fn test_bm_recovers_lfsr_degree() {
        // x^4 + x + 1, a maximal-length LFSR of degree 4 (period 15).
        let mut state = [1u8, 0, 0, 0];
        let mut bits = Vec::new();
        for _ in 0..45 {
            let out = state[3];
            bits.push(out);
            let fb = state[3] ^ state[0];
            state = [fb, state[0], state[1], state[2]];
        }
        assert_eq!(berlekamp_massey(&bits), 4);
    }

    #[test]
    fn test_bm_reproduces_sequence_length_bound() {
        // Complexity can never exceed the sequence length.
        let bits: Vec<u8> = (0..50).map(|i| ((i * 7 + 3) % 5 == 0) as u8).collect();
        let l = berlekamp_massey(&bits);
        assert!(l <= bits.len());
        assert!(l > 0);
    }

    #[test]
    fn test_class_probs_sum_to_one() {
        let total: f64 = LC_CLASS_PROBS.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_bitpos_index() {
        assert_eq!(BitPos::Low.index(64), 0);
        assert_eq!(BitPos::Mid.index(64), 32);
        assert_eq!(BitPos::High.index(64), 63);
        assert_eq!(BitPos::High.index(32), 31);
        assert_eq!(BitPos::Fixed(17).index(64), 17);
    }

    #[test]
    fn test_validation() {
        let good = LinearComplexity {
            nbits: 512,
            nseq: 32,
            bitpos: BitPos::Low,
        };
        assert!(good.validate().is_ok());
        assert!(
            LinearComplexity {
                nbits: 100,
                nseq: 32,
                bitpos: BitPos::Low
            }
            .validate()
            .is_err()
        );
        assert!(
            LinearComplexity {
                nbits: 512,
                nseq: 2,
                bitpos: BitPos::Low
            }
            .validate()
            .is_err()
        );
        assert!(
            LinearComplexity {
                nbits: 512,
                nseq: 32,
                bitpos: BitPos::Fixed(64)
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_fixed_bit_beyond_generator_width() {
        let (api, mut r#gen) = named_state("lcg69069", "lc width");
        let test = LinearComplexity {
            nbits: 512,
            nseq: 8,
            bitpos: BitPos::Fixed(40),
        };
        let r = test.run(&mut r#gen, &api);
        assert!(r.p.is_nan());
    }

    #[test]
    fn test_good_generator_passes() {
        // Enough sequences that even the rarest deviation class expects
        // a couple of hits.
        let (api, mut r#gen) = named_state("chacha20", "lc good");
        let test = LinearComplexity {
            nbits: 512,
            nseq: 200,
            bitpos: BitPos::Mid,
        };
        let r = test.run(&mut r#gen, &api);
        assert!(r.p > 1e-6, "chi2 = {}, p = {}", r.x, r.p);
    }
}
