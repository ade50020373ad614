//! Birthday-spacings tests: the n-dimensional spacings test, the
//! decimated 4-bit projection variant aimed at truncated 128-bit LCGs,
//! and the RAM-sized birthday-paradox battery.

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::{poisson_cdf, poisson_pvalue, quicksort64, radixsort32, radixsort64};
use crate::stattests::{StatTest, TestResults};

/// Count adjacent equal pairs in a sorted slice; a value occurring m
/// times contributes m - 1.
fn count_adjacent_duplicates64(sorted: &[u64]) -> u64 {
    sorted.windows(2).filter(|w| w[0] == w[1]).count() as u64
}

fn count_adjacent_duplicates32(sorted: &[u32]) -> u64 {
    sorted.windows(2).filter(|w| w[0] == w[1]).count() as u64
}

/// Sort selecting radix or in-place quicksort by available memory: the
/// radix pass needs one auxiliary buffer of the input length.
fn sort_for_spacings(values: &mut [u64], api: &CallerApi) {
    let aux_bytes = values.len() as u64 * 8;
    let radix_fits = match api.ram_info() {
        Some(info) => aux_bytes < info.available_bytes / 2,
        None => values.len() <= (1 << 27),
    };
    if radix_fits {
        radixsort64(values);
    } else {
        quicksort64(values);
    }
}

/// Marsaglia birthday spacings over k-tuples of d-bit points.
///
/// Each sample draws `n = round(2^((k d + 4) / 3))` non-overlapping
/// k-tuples, sorts them, sorts the spacings, and counts duplicate
/// spacings; the total over all samples is Poisson with mean
/// `nsamples * n^3 / 2^(k d + 2)`.
#[derive(Debug, Clone)]
pub struct BspaceNd {
    pub nbits_per_dim: u32,
    pub ndims: u32,
    pub nsamples: u32,
    /// Take each point from the high end of the draw instead of the low.
    pub high_bits: bool,
}

impl BspaceNd {
    fn effective_dims(&self, gen_nbits: u32) -> (u32, u32) {
        // A 1-D 64-bit request cannot be served by a 32-bit generator;
        // fall back to 2-D 32-bit with the same sample count.
        if self.nbits_per_dim == 64 && self.ndims == 1 && gen_nbits == 32 {
            (32, 2)
        } else {
            (self.nbits_per_dim, self.ndims)
        }
    }
}

impl StatTest for BspaceNd {
    fn name(&self) -> &'static str {
        "bspace_nd"
    }

    fn validate(&self) -> Result<(), String> {
        if self.nbits_per_dim == 0 || self.ndims == 0 {
            return Err("bspace_nd: nbits_per_dim and ndims must be positive".into());
        }
        if self.nsamples == 0 {
            return Err("bspace_nd: nsamples must be positive".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, api: &CallerApi) -> TestResults {
        let nbits = r#gen.nbits();
        let (d, k) = self.effective_dims(nbits);
        let tuple_bits = d.saturating_mul(k);
        if tuple_bits > 64 || d > nbits {
            return TestResults::not_applicable(self.name());
        }

        let n = 2f64.powf((f64::from(tuple_bits) + 4.0) / 3.0).round() as usize;
        let lambda = (n as f64).powi(3) / 2f64.powi(tuple_bits as i32 + 2);
        let mask = if d == nbits { u64::MAX } else { (1u64 << d) - 1 };

        let mut total_dups = 0u64;
        let mut values = vec![0u64; n];
        for _ in 0..self.nsamples {
            for slot in values.iter_mut() {
                let mut tuple = 0u64;
                for j in 0..k {
                    let draw = r#gen.get_bits();
                    let part = if self.high_bits {
                        draw >> (nbits - d)
                    } else {
                        draw & mask
                    };
                    tuple = if j == 0 { part } else { (tuple << d) | part };
                }
                *slot = tuple;
            }
            sort_for_spacings(&mut values, api);
            for i in 0..n - 1 {
                values[i] = values[i + 1] - values[i];
            }
            let spacings = &mut values[..n - 1];
            sort_for_spacings(spacings, api);
            total_dups += count_adjacent_duplicates64(spacings);
        }

        let lambda_total = lambda * f64::from(self.nsamples);
        debug!(
            test = self.name(),
            n, lambda_total, total_dups, "birthday spacings sample complete"
        );
        TestResults::with_alpha(
            self.name(),
            total_dups as f64,
            poisson_pvalue(total_dups as f64, lambda_total),
            poisson_cdf(total_dups as f64, lambda_total),
        )
    }
}

/// Reverse the bit order of a 4-bit value.
#[inline]
fn reverse4(v: u64) -> u64 {
    ((v & 1) << 3) | ((v & 2) << 1) | ((v & 4) >> 1) | ((v & 8) >> 3)
}

/// Decimated 8-digit 4-bit birthday spacings.
///
/// Builds 32-bit tuples from eight 4-bit digits taken `step` draws apart
/// and runs the spacings analysis on three projections at once: the low
/// nibble, the high nibble bit-reversed, and the high nibble as-is. The
/// reported result is the worst projection. Designed to expose 128-bit
/// LCGs with truncated output.
#[derive(Debug, Clone)]
pub struct Bspace4x8Decimated {
    pub step: u32,
    pub nsamples: u32,
}

const DECIMATED_DIGITS: usize = 8;
const DECIMATED_TUPLE_BITS: u32 = 32;

impl StatTest for Bspace4x8Decimated {
    fn name(&self) -> &'static str {
        "bspace4_8d_decimated"
    }

    fn validate(&self) -> Result<(), String> {
        if self.step == 0 {
            return Err("bspace4_8d_decimated: step must be at least 1".into());
        }
        if self.nsamples == 0 {
            return Err("bspace4_8d_decimated: nsamples must be positive".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, api: &CallerApi) -> TestResults {
        let nbits = r#gen.nbits();
        let n = 2f64
            .powf((f64::from(DECIMATED_TUPLE_BITS) + 4.0) / 3.0)
            .round() as usize;
        let lambda = (n as f64).powi(3) / 2f64.powi(DECIMATED_TUPLE_BITS as i32 + 2);

        const PROJECTIONS: [&str; 3] = ["low4", "high4_reversed", "high4"];
        let mut dups = [0u64; 3];
        let mut tuples: [Vec<u32>; 3] = [vec![0; n], vec![0; n], vec![0; n]];

        for _ in 0..self.nsamples {
            for t in 0..n {
                let mut packed = [0u32; 3];
                for _ in 0..DECIMATED_DIGITS {
                    let draw = r#gen.get_bits();
                    let high = draw >> (nbits - 4);
                    let digits = [draw & 0xf, reverse4(high), high];
                    for (acc, digit) in packed.iter_mut().zip(digits) {
                        *acc = (*acc << 4) | digit as u32;
                    }
                    // Decimation: discard step - 1 draws between digits.
                    for _ in 1..self.step {
                        let _ = r#gen.get_bits();
                    }
                }
                for (proj, &value) in tuples.iter_mut().zip(packed.iter()) {
                    proj[t] = value;
                }
            }
            for (proj, dup) in tuples.iter_mut().zip(dups.iter_mut()) {
                radixsort32(proj);
                for i in 0..n - 1 {
                    proj[i] = proj[i + 1] - proj[i];
                }
                let spacings = &mut proj[..n - 1];
                radixsort32(spacings);
                *dup += count_adjacent_duplicates32(spacings);
            }
        }

        let lambda_total = lambda * f64::from(self.nsamples);
        let mut worst = 0usize;
        let mut worst_p = f64::INFINITY;
        for (i, &d) in dups.iter().enumerate() {
            let p = poisson_pvalue(d as f64, lambda_total);
            if p < worst_p {
                worst_p = p;
                worst = i;
            }
        }
        api.print_line(&format!(
            "bspace4_8d_decimated: worst projection {} ({} duplicates, p = {:.3e})",
            PROJECTIONS[worst], dups[worst], worst_p
        ));
        TestResults::with_alpha(
            self.name(),
            dups[worst] as f64,
            worst_p,
            poisson_cdf(dups[worst] as f64, lambda_total),
        )
    }
}

/// RAM-sized birthday-paradox test over filtered 64-bit draws.
///
/// Keeps only draws whose low `e` bits are zero so the kept values live
/// in an effective range of 2^(64-e), with `e` tuned so the expected
/// duplicate count is the target lambda. Runs at lambda = 4 and, when no
/// duplicate shows up, again at lambda = 16, combining the counts.
#[derive(Debug, Clone)]
pub struct BirthdayTest {
    /// Override for the RAM-derived point-count exponent.
    pub log2_n: Option<u32>,
}

const BIRTHDAY_MIN_LOG2N: u32 = 19;
const BIRTHDAY_MAX_LOG2N: u32 = 30;

impl BirthdayTest {
    fn pick_log2_n(&self, api: &CallerApi) -> u32 {
        if let Some(v) = self.log2_n {
            return v;
        }
        let from_ram = api
            .ram_info()
            .map(|info| {
                let points = info.total_bytes / 2 / 8;
                63 - points.max(1).leading_zeros()
            })
            .unwrap_or(BIRTHDAY_MIN_LOG2N);
        from_ram.clamp(BIRTHDAY_MIN_LOG2N, BIRTHDAY_MAX_LOG2N)
    }
}

/// One filtered pass: collect `n` draws whose low `e` bits are zero,
/// sort, and count duplicates.
pub(crate) fn birthday_pass(r#gen: &mut GeneratorState, api: &CallerApi, n: usize, e: u32) -> u64 {
    let low_mask = if e == 0 { 0 } else { (1u64 << e) - 1 };
    let compose = r#gen.nbits() == 32;
    let mut kept = vec![0u64; n];
    let mut filled = 0usize;
    while filled < n {
        let value = if compose {
            (r#gen.get_bits() << 32) | r#gen.get_bits()
        } else {
            r#gen.get_bits()
        };
        if value & low_mask == 0 {
            kept[filled] = value;
            filled += 1;
        }
    }
    sort_for_spacings(&mut kept, api);
    count_adjacent_duplicates64(&kept)
}

impl StatTest for BirthdayTest {
    fn name(&self) -> &'static str {
        "birthday_test"
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(v) = self.log2_n
            && !(10..=33).contains(&v)
        {
            return Err("birthday_test: log2_n must be 10..=33".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, api: &CallerApi) -> TestResults {
        let log2_n = self.pick_log2_n(api);
        let n = 1usize << log2_n;
        // lambda = n^2 / 2^(65 - e); e solves for lambda = 4.
        let e4 = 67u32.saturating_sub(2 * log2_n);

        let dups4 = birthday_pass(r#gen, api, n, e4);
        debug!(test = self.name(), log2_n, e4, dups4, "first birthday pass");
        let (total, lambda_total) = if dups4 == 0 {
            // Nothing at lambda = 4: re-run with four times the density
            // and judge the combined count.
            let dups16 = birthday_pass(r#gen, api, n, e4 + 2);
            (dups16, 4.0 + 16.0)
        } else {
            (dups4, 4.0)
        };

        TestResults::with_alpha(
            self.name(),
            total as f64,
            poisson_pvalue(total as f64, lambda_total),
            poisson_cdf(total as f64, lambda_total),
        )
    }
}
