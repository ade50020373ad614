//! Frequency tests: monobit, w-bit word frequencies with a KS second
//! stage, and the halting block-frequency battery.

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::{
    chi2_cdf, halfnorm_pvalue, ks_pvalue, stdnorm_pvalue,
};
use crate::stattests::{BitPacker, StatTest, TestResults};

/// Signed bit-sum over `nvalues` draws. The statistic is
/// z = |sum| / sqrt(total bits) with a half-normal p-value.
#[derive(Debug, Clone)]
pub struct MonobitFreq {
    pub nvalues: u64,
}

impl StatTest for MonobitFreq {
    fn name(&self) -> &'static str {
        "monobit_freq"
    }

    fn validate(&self) -> Result<(), String> {
        if self.nvalues == 0 {
            return Err("monobit_freq: nvalues must be positive".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let nbits = u64::from(r#gen.nbits());
        let total_bits = self.nvalues * nbits;
        let mut ones: u64 = 0;
        for _ in 0..self.nvalues {
            ones += u64::from(r#gen.get_bits().count_ones());
        }
        // Signed sum of +1/-1 bits.
        let sum = 2.0 * ones as f64 - total_bits as f64;
        let z = sum.abs() / (total_bits as f64).sqrt();
        TestResults::new(self.name(), z, halfnorm_pvalue(z))
    }
}

/// Per-block chi-square over all 2^w w-bit words, with a second-stage
/// Kolmogorov-Smirnov test of the block chi-squares against their
/// theoretical CDF.
#[derive(Debug, Clone)]
pub struct NbitWordsFreq {
    pub bits_per_word: u32,
    /// Expected count per bin per block.
    pub average_freq: f64,
    pub nblocks: usize,
}

impl NbitWordsFreq {
    /// Byte specialization (w = 8).
    pub fn bytes(average_freq: f64, nblocks: usize) -> Self {
        Self {
            bits_per_word: 8,
            average_freq,
            nblocks,
        }
    }

    /// 16-bit specialization.
    pub fn words16(average_freq: f64, nblocks: usize) -> Self {
        Self {
            bits_per_word: 16,
            average_freq,
            nblocks,
        }
    }
}

impl StatTest for NbitWordsFreq {
    fn name(&self) -> &'static str {
        "nbit_words_freq"
    }

    fn validate(&self) -> Result<(), String> {
        if !(1..=16).contains(&self.bits_per_word) {
            return Err("nbit_words_freq: bits_per_word must be 1..=16".into());
        }
        if self.average_freq < 5.0 {
            return Err("nbit_words_freq: average_freq must be at least 5".into());
        }
        if self.nblocks < 8 {
            return Err("nbit_words_freq: nblocks must be at least 8".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let nbins = 1usize << self.bits_per_word;
        let words_per_block = (self.average_freq * nbins as f64).round() as u64;
        let expected = words_per_block as f64 / nbins as f64;
        let df = (nbins - 1) as f64;

        let mut packer = BitPacker::new();
        let mut chi2_values = Vec::with_capacity(self.nblocks);
        let mut counts = vec![0u64; nbins];
        for _ in 0..self.nblocks {
            counts.fill(0);
            for _ in 0..words_per_block {
                counts[packer.next(r#gen, self.bits_per_word) as usize] += 1;
            }
            let chi2: f64 = counts
                .iter()
                .map(|&o| {
                    let d = o as f64 - expected;
                    d * d / expected
                })
                .sum();
            chi2_values.push(chi2);
        }

        chi2_values.sort_by(f64::total_cmp);
        let n = chi2_values.len() as f64;
        let mut d_max: f64 = 0.0;
        for (i, &x) in chi2_values.iter().enumerate() {
            let f = chi2_cdf(x, df);
            let lo = (f - i as f64 / n).abs();
            let hi = ((i + 1) as f64 / n - f).abs();
            d_max = d_max.max(lo).max(hi);
        }
        let stat = (n.sqrt() + 0.12 + 0.11 / n.sqrt()) * d_max;
        debug!(test = self.name(), d_max, stat, "ks over per-block chi-squares");
        TestResults::new(self.name(), stat, ks_pvalue(stat))
    }
}

/// Running byte and 16-bit-word histograms over large blocks of draws,
/// halting the first time the full-bin chi-square or the maximum
/// standardized bin deviation crosses the Bonferroni-corrected stop
/// threshold.
#[derive(Debug, Clone)]
pub struct BlockFreq {
    /// log2 of the draws consumed per block.
    pub log2_block: u32,
    pub max_nblocks: u32,
    /// Corrected p-value that stops the scan.
    pub stop_p: f64,
}

impl Default for BlockFreq {
    fn default() -> Self {
        Self {
            log2_block: 30,
            max_nblocks: 16,
            stop_p: 1e-8,
        }
    }
}

impl BlockFreq {
    /// Corrected p-values of the two subtests over one histogram. Bins
    /// need a minimum expected count before either approximation is
    /// trustworthy; below it the histogram abstains for this block.
    fn histogram_pvalues(counts: &[u64], total: u64) -> (f64, f64) {
        let nbins = counts.len() as f64;
        let expected = total as f64 / nbins;
        if expected < 20.0 {
            return (1.0, 1.0);
        }
        let var = expected * (1.0 - 1.0 / nbins);
        let mut chi2 = 0.0;
        let mut z_max: f64 = 0.0;
        for &o in counts {
            let d = o as f64 - expected;
            chi2 += d * d / expected;
            z_max = z_max.max(d.abs() / var.sqrt());
        }
        let p_chi = stdnorm_pvalue(crate::numeric::chi2_to_stdnorm_approx(chi2, nbins - 1.0));
        // z-max is a family of nbins comparisons.
        let p_zmax = (halfnorm_pvalue(z_max) * nbins).min(1.0);
        (p_chi, p_zmax)
    }
}

impl StatTest for BlockFreq {
    fn name(&self) -> &'static str {
        "blockfreq"
    }

    fn validate(&self) -> Result<(), String> {
        if !(10..=34).contains(&self.log2_block) {
            return Err("blockfreq: log2_block must be 10..=34".into());
        }
        if self.max_nblocks == 0 {
            return Err("blockfreq: max_nblocks must be positive".into());
        }
        if !(self.stop_p > 0.0 && self.stop_p < 1.0) {
            return Err("blockfreq: stop_p must be in (0, 1)".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, api: &CallerApi) -> TestResults {
        let draws_per_block = 1u64 << self.log2_block;
        let bytes_per_draw = r#gen.nbits() / 8;
        let words_per_draw = r#gen.nbits() / 16;

        let mut byte_counts = vec![0u64; 256];
        let mut word_counts = vec![0u64; 65536];
        let mut total_draws = 0u64;
        let mut min_p = 1.0f64;

        for block in 1..=self.max_nblocks {
            for _ in 0..draws_per_block {
                let v = r#gen.get_bits();
                let mut b = v;
                for _ in 0..bytes_per_draw {
                    byte_counts[(b & 0xff) as usize] += 1;
                    b >>= 8;
                }
                let mut w = v;
                for _ in 0..words_per_draw {
                    word_counts[(w & 0xffff) as usize] += 1;
                    w >>= 16;
                }
                total_draws += 1;
            }

            let (pb_chi, pb_z) =
                Self::histogram_pvalues(&byte_counts, total_draws * u64::from(bytes_per_draw));
            let (pw_chi, pw_z) =
                Self::histogram_pvalues(&word_counts, total_draws * u64::from(words_per_draw));
            // Four subtests per block, `block` blocks examined so far.
            let correction = 4.0 * f64::from(block);
            let p_block = pb_chi.min(pb_z).min(pw_chi).min(pw_z);
            let corrected = (p_block * correction).min(1.0);
            min_p = min_p.min(corrected);
            debug!(test = self.name(), block, corrected, "blockfreq scan step");
            if corrected < self.stop_p {
                api.print_line(&format!(
                    "blockfreq: stopping after block {block} (corrected p = {corrected:.3e})"
                ));
                break;
            }
        }

        let z_equiv = -crate::numeric::stdnorm_inv(min_p.clamp(1e-300, 1.0));
        TestResults::new(self.name(), z_equiv, min_p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stattests::testutil::named_state;

    #[test]
    fn test_monobit_on_chacha_keystream() {
        let (api, mut r#gen) = named_state("chacha20", "monobit scenario");
        let test = MonobitFreq { nvalues: 1 << 20 };
        let r = test.run(&mut r#gen, &api);
        assert_eq!(r.name, "monobit_freq");
        assert!(r.p > 0.001 && r.p < 0.999, "p = {} out of range", r.p);
        assert!((r.p + r.alpha - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_monobit_on_zero_key_chacha_stream() {
        // The keystream for the all-zero key and nonce 0 is a fixed,
        // known-good reference stream.
        use crate::crypto::ChaCha20;
        use crate::generator::{Generator, GeneratorInfo, GeneratorState};

        struct ZeroKeyStream(ChaCha20);
        impl Generator for ZeroKeyStream {
            fn get_bits(&mut self) -> u64 {
                self.0.next64()
            }
        }
        static ZERO_KEY: GeneratorInfo = GeneratorInfo {
            name: "chacha20_zero_key",
            description: "ChaCha20 keystream, all-zero key, nonce 0",
            nbits: 64,
            create: |_, _| Box::new(ZeroKeyStream(ChaCha20::new(&[0u8; 32], 0))),
            self_test: None,
        };

        let (api, _gen) = named_state("zero", "unused");
        let mut r#gen = GeneratorState::create(&ZERO_KEY, &api, 0);
        let r = MonobitFreq { nvalues: 1 << 20 }.run(&mut r#gen, &api);
        assert!(r.p > 0.001 && r.p < 0.999, "p = {}", r.p);
    }

    #[test]
    fn test_monobit_detects_constant_stream() {
        let (api, mut r#gen) = named_state("zero", "monobit zero");
        let test = MonobitFreq { nvalues: 4096 };
        let r = test.run(&mut r#gen, &api);
        // All-zero bits: |sum| = N, z = sqrt(N), p collapses.
        assert!(r.p < 1e-12);
    }

    #[test]
    fn test_monobit_validation() {
        assert!(MonobitFreq { nvalues: 0 }.validate().is_err());
        assert!(MonobitFreq { nvalues: 1 }.validate().is_ok());
    }

    #[test]
    fn test_bytes_freq_on_good_generator() {
        let (api, mut r#gen) = named_state("chacha20", "bytes freq");
        let test = NbitWordsFreq::bytes(20.0, 32);
        let r = test.run(&mut r#gen, &api);
        assert!(r.p > 0.001, "p = {}", r.p);
        assert!(r.p <= 1.0);
    }

    #[test]
    fn test_bytes_freq_detects_zero_generator() {
        let (api, mut r#gen) = named_state("zero", "bytes freq zero");
        let test = NbitWordsFreq::bytes(10.0, 32);
        let r = test.run(&mut r#gen, &api);
        // Every word identical: per-block chi-square explodes, KS p
        // collapses.
        assert!(r.p < 1e-9, "p = {}", r.p);
    }

    #[test]
    fn test_nbit_words_validation() {
        assert!(NbitWordsFreq::bytes(20.0, 32).validate().is_ok());
        assert!(
            NbitWordsFreq {
                bits_per_word: 0,
                average_freq: 20.0,
                nblocks: 32
            }
            .validate()
            .is_err()
        );
        assert!(
            NbitWordsFreq {
                bits_per_word: 17,
                average_freq: 20.0,
                nblocks: 32
            }
            .validate()
            .is_err()
        );
        assert!(NbitWordsFreq::bytes(1.0, 32).validate().is_err());
        assert!(NbitWordsFreq::bytes(20.0, 4).validate().is_err());
    }

    #[test]
    fn test_blockfreq_passes_good_generator() {
        let (api, mut r#gen) = named_state("chacha20", "blockfreq");
        let test = BlockFreq {
            log2_block: 14,
            max_nblocks: 4,
            stop_p: 1e-8,
        };
        let r = test.run(&mut r#gen, &api);
        assert!(r.p > 1e-6, "corrected min p = {}", r.p);
    }

    #[test]
    fn test_blockfreq_halts_on_constant_stream() {
        let (api, mut r#gen) = named_state("zero", "blockfreq zero");
        let test = BlockFreq {
            log2_block: 12,
            max_nblocks: 8,
            stop_p: 1e-8,
        };
        let r = test.run(&mut r#gen, &api);
        assert!(r.p < 1e-8);
    }
}
