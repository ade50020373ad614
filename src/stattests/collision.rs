//! Collision counting over overlapping k-tuples.

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::{poisson_cdf, poisson_pvalue, radixsort64};
use crate::stattests::{StatTest, TestResults};

/// Overlapping-tuple collision test.
///
/// From `n` draws a sliding window of `ndims` draws forms `n - ndims + 1`
/// overlapping tuples, each contributing `nbits_per_dim` low bits per
/// draw. The number of colliding tuples follows Poisson with mean
/// `m (lambda - 1 + e^-lambda)` where `m = 2^(k d)` and
/// `lambda = (n - k + 1) / m`.
#[derive(Debug, Clone)]
pub struct CollisionOver {
    /// Draws consumed per sample.
    pub n: u64,
    pub nbits_per_dim: u32,
    pub ndims: u32,
    pub nsamples: u32,
}

impl StatTest for CollisionOver {
    fn name(&self) -> &'static str {
        "collision_over"
    }

    fn validate(&self) -> Result<(), String> {
        if self.nbits_per_dim == 0 || self.ndims == 0 {
            return Err("collision_over: nbits_per_dim and ndims must be positive".into());
        }
        if self.nsamples == 0 {
            return Err("collision_over: nsamples must be positive".into());
        }
        if self.n <= u64::from(self.ndims) {
            return Err("collision_over: n must exceed ndims".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let d = self.nbits_per_dim;
        let k = self.ndims;
        let tuple_bits = d.saturating_mul(k);
        if tuple_bits > 64 || d > r#gen.nbits() {
            return TestResults::not_applicable(self.name());
        }

        let ntuples = self.n - u64::from(k) + 1;
        let m = 2f64.powi(tuple_bits as i32);
        let lambda = ntuples as f64 / m;
        let mu = m * (lambda - 1.0 + (-lambda).exp());

        let mask = if d == 64 { u64::MAX } else { (1u64 << d) - 1 };
        let keep_mask = if tuple_bits == 64 {
            u64::MAX
        } else {
            (1u64 << tuple_bits) - 1
        };

        let mut total_collisions = 0u64;
        let mut values = vec![0u64; ntuples as usize];
        for _ in 0..self.nsamples {
            // Prime the window with the first k - 1 draws.
            let mut window = 0u64;
            for _ in 0..k - 1 {
                window = ((window << d) | (r#gen.get_bits() & mask)) & keep_mask;
            }
            for slot in values.iter_mut() {
                window = ((window << d) | (r#gen.get_bits() & mask)) & keep_mask;
                *slot = window;
            }
            radixsort64(&mut values);
            // Collisions: tuples beyond the first occupant of each cell.
            total_collisions += values.windows(2).filter(|w| w[0] == w[1]).count() as u64;
        }

        let mu_total = mu * f64::from(self.nsamples);
        debug!(
            test = self.name(),
            mu_total, total_collisions, "collision counting complete"
        );
        TestResults::with_alpha(
            self.name(),
            total_collisions as f64,
            poisson_pvalue(total_collisions as f64, mu_total),
            poisson_cdf(total_collisions as f64, mu_total),
        )
    }
}
