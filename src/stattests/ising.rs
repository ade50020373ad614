//! 2D Ising model sampling at the critical coupling.
//!
//! A 16x16 toroidal lattice is driven by the generator through either
//! Wolff cluster updates or Metropolis single-spin sweeps. Block averages
//! of the energy per site and the specific heat are compared against
//! finite-lattice reference values with Student-t statistics. Acceptance
//! decisions use scaled 32-bit integer comparisons so each decision costs
//! one draw.

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::student_t_pvalue;
use crate::stattests::{StatTest, TestResults, top32};

/// Lattice side and site count.
const ISING_L: usize = 16;
const ISING_N: usize = ISING_L * ISING_L;

/// Critical coupling ln(1 + sqrt(2)) / 2.
const ISING_JC: f64 = 0.440_686_793_509_772;

/// Finite-lattice (16x16, periodic) reference values at the critical
/// coupling: energy per site and specific heat per site.
const ISING_ENERGY_REF: f64 = -1.453_065;
const ISING_HEAT_CAP_REF: f64 = 1.498_704;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsingAlgorithm {
    Wolff,
    Metropolis,
}

#[derive(Debug, Clone)]
pub struct Ising2d {
    pub algorithm: IsingAlgorithm,
    /// Updates per block; also the warm-up length.
    pub sample_len: u32,
    /// Number of blocks sampled.
    pub nsamples: u32,
}

/// Toroidal spin lattice with precomputed neighbor indices.
struct Lattice {
    spins: [i8; ISING_N],
    neighbors: [[u16; 4]; ISING_N],
    /// Wolff add-probability 1 - e^(-2 jc), scaled to 2^32.
    wolff_threshold: u32,
    /// Metropolis acceptance for spin * neighbor-sum = 2 and 4.
    metro_thresholds: [u32; 2],
    /// Explicit cluster stack for the Wolff flips.
    stack: Vec<u16>,
}

impl Lattice {
    fn new(r#gen: &mut GeneratorState) -> Self {
        let mut neighbors = [[0u16; 4]; ISING_N];
        for y in 0..ISING_L {
            for x in 0..ISING_L {
                let i = y * ISING_L + x;
                neighbors[i] = [
                    (y * ISING_L + (x + 1) % ISING_L) as u16,
                    (y * ISING_L + (x + ISING_L - 1) % ISING_L) as u16,
                    (((y + 1) % ISING_L) * ISING_L + x) as u16,
                    (((y + ISING_L - 1) % ISING_L) * ISING_L + x) as u16,
                ];
            }
        }
        let mut spins = [0i8; ISING_N];
        for s in spins.iter_mut() {
            *s = if r#gen.get_bits() & 1 == 1 { 1 } else { -1 };
        }
        let scale = 4_294_967_296.0;
        let p_add = 1.0 - (-2.0 * ISING_JC).exp();
        Self {
            spins,
            neighbors,
            wolff_threshold: (p_add * scale) as u32,
            metro_thresholds: [
                ((-2.0 * ISING_JC * 2.0).exp() * scale) as u32,
                ((-2.0 * ISING_JC * 4.0).exp() * scale) as u32,
            ],
            stack: Vec::with_capacity(ISING_N),
        }
    }

    /// One Wolff cluster flip driven by an explicit work stack.
    fn wolff_step(&mut self, r#gen: &mut GeneratorState) {
        let seed = (top32(r#gen) as usize) % ISING_N;
        let target = self.spins[seed];
        self.spins[seed] = -target;
        self.stack.clear();
        self.stack.push(seed as u16);
        while let Some(site) = self.stack.pop() {
            for &nb in &self.neighbors[site as usize] {
                if self.spins[nb as usize] == target && top32(r#gen) < self.wolff_threshold {
                    self.spins[nb as usize] = -target;
                    self.stack.push(nb);
                }
            }
        }
    }

    /// One Metropolis sweep: N random single-spin updates.
    fn metropolis_sweep(&mut self, r#gen: &mut GeneratorState) {
        for _ in 0..ISING_N {
            let site = (top32(r#gen) as usize) % ISING_N;
            let nbsum: i32 = self.neighbors[site]
                .iter()
                .map(|&nb| i32::from(self.spins[nb as usize]))
                .sum();
            let product = i32::from(self.spins[site]) * nbsum;
            let accept = match product {
                i32::MIN..=0 => true,
                2 => top32(r#gen) < self.metro_thresholds[0],
                4 => top32(r#gen) < self.metro_thresholds[1],
                _ => unreachable!("square lattice neighbor sums are even"),
            };
            if accept {
                self.spins[site] = -self.spins[site];
            }
        }
    }

    /// Energy per site, -1/N * sum over bonds of s_i s_j.
    fn energy_per_site(&self) -> f64 {
        let mut bond_sum = 0i32;
        for (i, nbs) in self.neighbors.iter().enumerate() {
            // Right and down neighbors cover each bond exactly once.
            let s = i32::from(self.spins[i]);
            bond_sum += s * i32::from(self.spins[nbs[0] as usize]);
            bond_sum += s * i32::from(self.spins[nbs[2] as usize]);
        }
        -f64::from(bond_sum) / ISING_N as f64
    }
}

impl StatTest for Ising2d {
    fn name(&self) -> &'static str {
        "ising_2d"
    }

    fn description(&self) -> String {
        "16x16 critical Ising sampling; reference energy and specific heat are \
         finite-lattice calibration constants"
            .to_string()
    }

    fn validate(&self) -> Result<(), String> {
        if self.sample_len < 100 {
            return Err("ising_2d: sample_len must be at least 100".into());
        }
        if self.nsamples < 16 {
            return Err("ising_2d: nsamples must be at least 16".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let mut lattice = Lattice::new(r#gen);
        let step = |lat: &mut Lattice, g: &mut GeneratorState| match self.algorithm {
            IsingAlgorithm::Wolff => lat.wolff_step(g),
            IsingAlgorithm::Metropolis => lat.metropolis_sweep(g),
        };

        // Warm-up pass.
        for _ in 0..self.sample_len {
            step(&mut lattice, r#gen);
        }

        // Each sample is a block of sample_len updates reduced to a block
        // energy mean and a block specific heat.
        let mut energies = Vec::with_capacity(self.nsamples as usize);
        let mut heat_caps = Vec::with_capacity(self.nsamples as usize);
        for _ in 0..self.nsamples {
            let mut sum_e = 0.0f64;
            let mut sum_e2 = 0.0f64;
            for _ in 0..self.sample_len {
                step(&mut lattice, r#gen);
                let e = lattice.energy_per_site();
                sum_e += e;
                sum_e2 += e * e;
            }
            let n = f64::from(self.sample_len);
            let mean_e = sum_e / n;
            let var_e = (sum_e2 / n - mean_e * mean_e).max(0.0);
            energies.push(mean_e);
            heat_caps.push(ISING_JC * ISING_JC * ISING_N as f64 * var_e);
        }

        let t_energy = t_statistic(&energies, ISING_ENERGY_REF);
        let t_heat = t_statistic(&heat_caps, ISING_HEAT_CAP_REF);
        let df = f64::from(self.nsamples - 1);
        let worst_t = if t_energy.abs() >= t_heat.abs() {
            t_energy
        } else {
            t_heat
        };
        // Two comparisons share the verdict.
        let p = (student_t_pvalue(worst_t, df) * 2.0).min(1.0);
        debug!(test = self.name(), t_energy, t_heat, "ising blocks reduced");
        TestResults::new(self.name(), worst_t, p)
    }
}

/// Student-t statistic of a sample mean against a reference value.
fn t_statistic(samples: &[f64], reference: f64) -> f64 {
    let n = samples.len() as f64;
    let mean: f64 = samples.iter().sum::<f64>() / n;
    let var: f64 = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1.0);
    if var <= 0.0 {
        return f64::INFINITY * (mean - reference).signum();
    }
    (mean - reference) / (var / n).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stattests::testutil::named_state;

    #[test]
    fn test_lattice_neighbors_wrap() {
        let (_api, mut r#gen) = named_state("chacha20", "ising lattice");
        let lat = Lattice::new(&mut r#gen);
        // Site 0 = (0,0): right (0,1), left (0,15), down (1,0), up (15,0).
        assert_eq!(lat.neighbors[0], [1, 15, 16, 240]);
        // Every site appears in exactly four neighbor lists.
        let mut appearances = [0u32; ISING_N];
        for nbs in &lat.neighbors {
            for &nb in nbs {
                appearances[nb as usize] += 1;
            }
        }
        assert!(appearances.iter().all(|&c| c == 4));
    }

    #[test]
    fn test_energy_bounds_and_ground_state() {
        let (_api, mut r#gen) = named_state("chacha20", "ising energy");
        let mut lat = Lattice::new(&mut r#gen);
        let e = lat.energy_per_site();
        assert!((-2.0..=2.0).contains(&e));
        // Fully aligned lattice sits at the ground state energy -2.
        lat.spins = [1i8; ISING_N];
        assert_eq!(lat.energy_per_site(), -2.0);
        lat.spins = [-1i8; ISING_N];
        assert_eq!(lat.energy_per_site(), -2.0);
    }

    #[test]
    fn test_wolff_step_flips_a_cluster() {
        let (_api, mut r#gen) = named_state("chacha20", "ising wolff");
        let mut lat = Lattice::new(&mut r#gen);
        let before = lat.spins;
        lat.wolff_step(&mut r#gen);
        let flipped = before
            .iter()
            .zip(lat.spins.iter())
            .filter(|(a, b)| a != b)
            .count();
        assert!(flipped >= 1, "a Wolff step flips at least its seed site");
    }

    #[test]
    fn test_metropolis_preserves_spin_values() {
        let (_api, mut r#gen) = named_state("chacha20", "ising metro");
        let mut lat = Lattice::new(&mut r#gen);
        for _ in 0..10 {
            lat.metropolis_sweep(&mut r#gen);
        }
        assert!(lat.spins.iter().all(|&s| s == 1 || s == -1));
    }

    #[test]
    fn test_t_statistic() {
        let t = t_statistic(&[1.0, 2.0, 3.0, 4.0, 5.0], 3.0);
        assert!(t.abs() < 1e-12);
        let t = t_statistic(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.0);
        assert!(t > 3.0);
    }

    #[test]
    fn test_validation() {
        let good = Ising2d {
            algorithm: IsingAlgorithm::Wolff,
            sample_len: 500,
            nsamples: 64,
        };
        assert!(good.validate().is_ok());
        assert!(
            Ising2d {
                algorithm: IsingAlgorithm::Wolff,
                sample_len: 10,
                nsamples: 64
            }
            .validate()
            .is_err()
        );
        assert!(
            Ising2d {
                algorithm: IsingAlgorithm::Metropolis,
                sample_len: 500,
                nsamples: 4
            }
            .validate()
            .is_err()
        );
    }
}
