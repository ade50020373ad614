//! Hamming-weight histograms across doubling block sizes.

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::{binomial_pmf, chi2_to_stdnorm_approx, halfnorm_pvalue};
use crate::stattests::{StatTest, TestResults};

/// Minimum expected count for a histogram bin to enter the chi-square.
const DISTR_MIN_EXPECTED: f64 = 25.0;

/// For each level l in 0..nlevels, blocks of 2^l draws produce two
/// histograms: the summed Hamming weight of the block, and the Hamming
/// weight of the XOR of its two half-blocks. Each histogram is
/// chi-squared against the binomial restricted to bins with expected
/// count >= 25 and mapped to z; the reported statistic is the worst |z|
/// over all 2 * nlevels sub-tests, Bonferroni-corrected.
#[derive(Debug, Clone)]
pub struct HammingDistr {
    pub nlevels: u32,
    /// Blocks sampled per level.
    pub nblocks: u64,
}

impl StatTest for HammingDistr {
    fn name(&self) -> &'static str {
        "hamming_distr"
    }

    fn validate(&self) -> Result<(), String> {
        if !(1..=12).contains(&self.nlevels) {
            return Err("hamming_distr: nlevels must be 1..=12".into());
        }
        if self.nblocks < 1000 {
            return Err("hamming_distr: nblocks must be at least 1000".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let nbits = r#gen.nbits();
        let mut max_abs_z: f64 = 0.0;

        for level in 0..self.nlevels {
            let block_draws = 1usize << level;
            let sum_bits = block_draws as u32 * nbits;
            let xor_bits = sum_bits / 2;

            let mut sum_hist = vec![0u64; sum_bits as usize + 1];
            let mut xor_hist = vec![0u64; xor_bits as usize + 1];
            let mut block = vec![0u64; block_draws];

            for _ in 0..self.nblocks {
                for slot in block.iter_mut() {
                    *slot = r#gen.get_bits();
                }
                let weight: u32 = block.iter().map(|v| v.count_ones()).sum();
                sum_hist[weight as usize] += 1;

                let xor_weight: u32 = if block_draws == 1 {
                    // Halves of the single draw.
                    let half = nbits / 2;
                    let lo = block[0] & ((1u64 << half) - 1);
                    let hi = block[0] >> half;
                    (lo ^ hi).count_ones()
                } else {
                    let half = block_draws / 2;
                    (0..half)
                        .map(|i| (block[i] ^ block[i + half]).count_ones())
                        .sum()
                };
                xor_hist[xor_weight as usize] += 1;
            }

            let z_sum = histogram_z(&sum_hist, self.nblocks, sum_bits);
            let z_xor = histogram_z(&xor_hist, self.nblocks, xor_bits);
            debug!(test = self.name(), level, z_sum, z_xor, "level reduced");
            max_abs_z = max_abs_z.max(z_sum.abs()).max(z_xor.abs());
        }

        let p = (halfnorm_pvalue(max_abs_z) * f64::from(2 * self.nlevels)).min(1.0);
        TestResults::new(self.name(), max_abs_z, p)
    }
}

/// Chi-square of a weight histogram against Binomial(bits, 1/2) over the
/// well-populated bins, via Wilson-Hilferty.
fn histogram_z(hist: &[u64], nblocks: u64, bits: u32) -> f64 {
    let mut chi2 = 0.0;
    let mut kept = 0usize;
    for (w, &o) in hist.iter().enumerate() {
        let e = nblocks as f64 * binomial_pmf(w as u64, u64::from(bits), 0.5);
        if e < DISTR_MIN_EXPECTED {
            continue;
        }
        let d = o as f64 - e;
        chi2 += d * d / e;
        kept += 1;
    }
    if kept < 2 {
        return 0.0;
    }
    chi2_to_stdnorm_approx(chi2, (kept - 1) as f64)
}
