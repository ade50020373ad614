//! Overlapping base-3 tuple frequencies.

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::{chi2_to_stdnorm_approx, halfnorm_pvalue};
use crate::stattests::{StatTest, TestResults};

const MOD3_DIGITS: u32 = 9;
const MOD3_CELLS: usize = 19_683; // 3^9

/// Draws reduced modulo 3 (with rejection of the single biased top value
/// so digits are exactly uniform) feed overlapping 9-digit base-3 tuples;
/// the 3^9-cell table is chi-squared and mapped to z.
#[derive(Debug, Clone)]
pub struct Mod3 {
    /// Counted tuples.
    pub nvalues: u64,
}

impl StatTest for Mod3 {
    fn name(&self) -> &'static str {
        "mod3"
    }

    fn validate(&self) -> Result<(), String> {
        if self.nvalues < 1_000_000 {
            return Err("mod3: nvalues must be at least 1000000".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        // Largest multiple of 3 representable in the draw width; the one
        // or two values at the top are rejected so `draw % 3` is exact.
        let nbits = r#gen.nbits();
        let limit = if nbits == 64 {
            (u64::MAX / 3) * 3
        } else {
            (u64::from(u32::MAX) / 3) * 3
        };

        let mut next_digit = move |g: &mut GeneratorState| -> u32 {
            loop {
                let draw = g.get_bits();
                if draw < limit {
                    return (draw % 3) as u32;
                }
            }
        };

        let mut counts = vec![0u64; MOD3_CELLS];
        let mut state: u32 = 0;
        for _ in 0..MOD3_DIGITS - 1 {
            state = state * 3 + next_digit(r#gen);
        }
        for _ in 0..self.nvalues {
            state = (state * 3 + next_digit(r#gen)) % MOD3_CELLS as u32;
            counts[state as usize] += 1;
        }

        let expected = self.nvalues as f64 / MOD3_CELLS as f64;
        let chi2: f64 = counts
            .iter()
            .map(|&o| {
                let d = o as f64 - expected;
                d * d / expected
            })
            .sum();
        let z = chi2_to_stdnorm_approx(chi2, (MOD3_CELLS - 1) as f64);
        debug!(test = self.name(), chi2, z, "mod3 table reduced");
        TestResults::new(self.name(), z, halfnorm_pvalue(z))
    }
}
