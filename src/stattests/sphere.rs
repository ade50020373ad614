//! Monte Carlo unit-hypersphere volume.

use std::f64::consts::PI;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::{halfnorm_pvalue, lgamma};
use crate::stattests::{StatTest, TestResults, uniform53};

/// Estimates the volume of the d-dimensional unit ball intersected with
/// the unit cube: points with all coordinates in [0,1) land inside when
/// their squared norm is below 1. The statistic is the z-score of the
/// inside-count against the exact orthant volume.
#[derive(Debug, Clone)]
pub struct SphereVolume {
    pub ndims: u32,
    pub npoints: u64,
}

impl SphereVolume {
    /// V_d / 2^d: the exact probability a uniform cube point falls in
    /// the ball.
    fn inside_probability(&self) -> f64 {
        let d = f64::from(self.ndims);
        ((d / 2.0) * PI.ln() - lgamma(d / 2.0 + 1.0) - d * 2f64.ln()).exp()
    }
}

impl StatTest for SphereVolume {
    fn name(&self) -> &'static str {
        "sphere_volume"
    }

    fn validate(&self) -> Result<(), String> {
        if !(2..=20).contains(&self.ndims) {
            return Err("sphere_volume: ndims must be 2..=20".into());
        }
        if self.npoints < 10_000 {
            return Err("sphere_volume: npoints must be at least 10000".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let p = self.inside_probability();
        let mut inside = 0u64;
        for _ in 0..self.npoints {
            let mut norm2 = 0.0f64;
            for _ in 0..self.ndims {
                let u = uniform53(r#gen);
                norm2 += u * u;
            }
            if norm2 < 1.0 {
                inside += 1;
            }
        }
        let n = self.npoints as f64;
        let z = (inside as f64 - n * p) / (n * p * (1.0 - p)).sqrt();
        TestResults::new(self.name(), z, halfnorm_pvalue(z))
    }
}
