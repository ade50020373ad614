//! Gap tests: the classic single-zone gap histogram and the 65536-target
//! 16-bit gap analysis with zero-containment and duplicate-containment
//! side tables.

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::{binomial_cdf, binomial_pmf, chi2_pvalue, halfnorm_pvalue, stdnorm_inv};
use crate::stattests::{StatTest, TestResults};

/// Run lengths beyond these bounds mean the stream is stuck on one side
/// of the hit zone; the test aborts with the hard-fail sentinel. A run of
/// 4096 straight hits has probability at most 2^-4096 for any shl >= 1;
/// the miss bound scales with the zone so it stays near e^-64.
const GUARD_HIT_RUN: u64 = 4096;
const GUARD_MISS_RUN_FACTOR: u64 = 64;

/// Knuth-style gap test. A hit is a draw in `[0, 2^(nbits - shl))`; gap
/// lengths (misses between hits) build a histogram sized so the smallest
/// theoretical bin keeps an expected count of at least 10, compared by
/// chi-square.
#[derive(Debug, Clone)]
pub struct Gap {
    /// Zone shrink factor: hit probability is 2^-shl.
    pub shl: u32,
    pub ngaps: u64,
}

impl StatTest for Gap {
    fn name(&self) -> &'static str {
        "gap"
    }

    fn validate(&self) -> Result<(), String> {
        if self.shl == 0 || self.shl > 31 {
            return Err("gap: shl must be 1..=31".into());
        }
        if self.ngaps < 1000 {
            return Err("gap: ngaps must be at least 1000".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, api: &CallerApi) -> TestResults {
        let nbits = r#gen.nbits();
        if self.shl >= nbits {
            return TestResults::not_applicable(self.name());
        }
        let threshold = 1u64 << (nbits - self.shl);
        let p_hit = 2f64.powi(-(self.shl as i32));
        let q = 1.0 - p_hit;

        // Largest bin index whose expected count stays >= 10; one tail
        // bin collects everything longer.
        let nbins = {
            let mut j = 1usize;
            while self.ngaps as f64 * p_hit * q.powi(j as i32) >= 10.0 && j < 1 << 20 {
                j += 1;
            }
            j
        };
        let mut hist = vec![0u64; nbins + 1];

        let miss_guard = GUARD_MISS_RUN_FACTOR << self.shl;
        let mut gap_len = 0u64;
        let mut hit_run = 0u64;
        let mut collected = 0u64;
        while collected < self.ngaps {
            let draw = r#gen.get_bits();
            if draw < threshold {
                hit_run += 1;
                if hit_run >= GUARD_HIT_RUN {
                    api.print_line("gap: stream never leaves the hit zone; aborting");
                    return TestResults::hard_fail(self.name());
                }
                let bin = (gap_len as usize).min(nbins);
                hist[bin] += 1;
                collected += 1;
                gap_len = 0;
            } else {
                hit_run = 0;
                gap_len += 1;
                if gap_len >= miss_guard {
                    api.print_line("gap: no hit within the calibrated number of draws; aborting");
                    return TestResults::hard_fail(self.name());
                }
            }
        }

        let n = self.ngaps as f64;
        let mut chi2 = 0.0;
        for (j, &o) in hist.iter().enumerate() {
            let e = if j < nbins {
                n * p_hit * q.powi(j as i32)
            } else {
                n * q.powi(nbins as i32)
            };
            let d = o as f64 - e;
            chi2 += d * d / e;
        }
        let df = hist.len() as f64 - 1.0;
        debug!(test = self.name(), nbins, chi2, "gap histogram complete");
        TestResults::new(self.name(), chi2, chi2_pvalue(chi2, df))
    }
}

/// Maximum examined gap length for the 16-bit analysis; beyond it counts
/// fold into a tail slot.
const GAP16_TARGETS: usize = 65536;

/// Gap analysis over the stream viewed as 16-bit words, all 65536 target
/// values sharing one histogram, with two derived containment tables:
/// value-to-value gaps holding a zero word inside, and zero-to-value gaps
/// holding an earlier duplicate of the closing value. Each table reduces
/// to its worst standardized deviation; the reported statistic is the
/// largest |z| after a Bonferroni correction across every examined gap
/// length.
#[derive(Debug, Clone)]
pub struct Gap16Count0 {
    pub ngaps: u64,
}

impl StatTest for Gap16Count0 {
    fn name(&self) -> &'static str {
        "gap16_count0"
    }

    fn validate(&self) -> Result<(), String> {
        if self.ngaps < 100_000 {
            return Err("gap16_count0: ngaps must be at least 100000".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let words_per_draw = r#gen.nbits() / 16;
        let q = (GAP16_TARGETS as f64 - 1.0) / GAP16_TARGETS as f64;
        let p_word = 1.0 / GAP16_TARGETS as f64;

        // Interior lengths with theoretical frequency-count >= 30 are
        // examined individually; longer gaps fold into the frequency
        // table's tail and are excluded from the containment tables
        // (their containment probability depends on the exact length).
        let expected0 = self.ngaps as f64 * p_word;
        let len_cap = if expected0 < 30.0 {
            1
        } else {
            (((expected0 / 30.0).ln() / -q.ln()).floor() as usize + 1).min(1 << 22)
        };

        let mut freq = vec![0u64; len_cap + 1];
        let mut zero_total = vec![0u64; len_cap + 1];
        let mut zero_inside = vec![0u64; len_cap + 1];
        let mut dup_total = vec![0u64; len_cap + 1];
        let mut dup_inside = vec![0u64; len_cap + 1];

        let mut last_pos = vec![-1i64; GAP16_TARGETS];
        let mut last_zero: i64 = -1;
        let mut pos: i64 = 0;
        let mut collected = 0u64;

        'outer: loop {
            let mut draw = r#gen.get_bits();
            for _ in 0..words_per_draw {
                let w = (draw & 0xffff) as usize;
                draw >>= 16;

                if w == 0 {
                    last_zero = pos;
                    last_pos[0] = pos;
                    pos += 1;
                    continue;
                }

                let prev = last_pos[w];
                if prev >= 0 {
                    // Interior length of the [v .. v] gap.
                    let raw_len = (pos - prev - 1) as usize;
                    freq[raw_len.min(len_cap)] += 1;
                    if raw_len < len_cap {
                        zero_total[raw_len] += 1;
                        if last_zero > prev {
                            zero_inside[raw_len] += 1;
                        }
                    }
                    collected += 1;
                }
                if last_zero >= 0 {
                    // The [0 .. v] window closing at this word.
                    let len2 = (pos - last_zero - 1) as usize;
                    if len2 < len_cap {
                        dup_total[len2] += 1;
                        if prev > last_zero {
                            dup_inside[len2] += 1;
                        }
                    }
                }

                last_pos[w] = pos;
                pos += 1;
                if collected >= self.ngaps {
                    break 'outer;
                }
            }
        }

        // Shared-histogram z per examined length: counts at interior
        // length L are approximately Binomial(ngaps, p q^L).
        let mut comparisons = 0u64;
        let mut max_abs_z: f64 = 0.0;
        let n = collected;
        for (len, &o) in freq.iter().enumerate() {
            let p_len = if len < len_cap {
                p_word * q.powi(len as i32)
            } else {
                q.powi(len_cap as i32)
            };
            if let Some(z) = binomial_z(o, n, p_len) {
                max_abs_z = max_abs_z.max(z.abs());
                comparisons += 1;
            }
        }
        // Zero-containment: conditionally Binomial(freq[len], 1 - q^len).
        for len in 0..len_cap {
            let p_zero = 1.0 - q.powi(len as i32);
            if let Some(z) = binomial_z_small_ok(zero_inside[len], zero_total[len], p_zero) {
                max_abs_z = max_abs_z.max(z.abs());
                comparisons += 1;
            }
        }
        // Duplicate-containment for the asymmetric [0 .. v] windows.
        for len in 0..len_cap {
            let p_dup = 1.0 - q.powi(len as i32);
            if let Some(z) = binomial_z_small_ok(dup_inside[len], dup_total[len], p_dup) {
                max_abs_z = max_abs_z.max(z.abs());
                comparisons += 1;
            }
        }

        let p_corrected =
            (halfnorm_pvalue(max_abs_z) * comparisons.max(1) as f64).min(1.0);
        debug!(
            test = self.name(),
            len_cap, comparisons, max_abs_z, "gap16 tables reduced"
        );
        TestResults::new(self.name(), max_abs_z, p_corrected)
    }
}

/// Standardized deviation of a binomial count, or `None` when the cell is
/// too thin to judge.
fn binomial_z(observed: u64, n: u64, p: f64) -> Option<f64> {
    if n == 0 || p <= 0.0 || p >= 1.0 {
        return None;
    }
    let mean = n as f64 * p;
    let var = mean * (1.0 - p);
    if mean < 10.0 || (n as f64 - mean) < 10.0 {
        return None;
    }
    Some((observed as f64 - mean) / var.sqrt())
}

/// Like [`binomial_z`] but switches to the exact binomial CDF when the
/// normal approximation would be poor, converting the tail back to z.
fn binomial_z_small_ok(observed: u64, n: u64, p: f64) -> Option<f64> {
    if n == 0 || p <= 0.0 || p >= 1.0 {
        return None;
    }
    let mean = n as f64 * p;
    let anti_mean = n as f64 - mean;
    if n < 30 {
        return None;
    }
    if mean >= 10.0 && anti_mean >= 10.0 {
        let var = mean * (1.0 - p);
        return Some((observed as f64 - mean) / var.sqrt());
    }
    // Exact mid-p conversion: half the atom at the observation keeps
    // discrete mass from inflating the percentile.
    let p_eq = binomial_pmf(observed, n, p);
    let p_lt = if observed == 0 {
        0.0
    } else {
        binomial_cdf(observed - 1, n, p)
    };
    let p_mid = (p_lt + 0.5 * p_eq).clamp(1e-300, 1.0 - 1e-16);
    Some(stdnorm_inv(p_mid))
}
