//! GF(2) matrix rank of generator-filled binary matrices.

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::chi2_pvalue_exact;
use crate::stattests::{BitPacker, StatTest, TestResults};

/// Rank test: `nmatrices` square binary matrices of side `dim` are built
/// from the stream (up to `max_nbits` of each draw) and their GF(2) ranks
/// are compared against the closed-form distribution, which concentrates
/// at dim, dim-1 and dim-2.
#[derive(Debug, Clone)]
pub struct MatrixRank {
    pub dim: usize,
    /// Bits taken from each draw; clipped to the generator width.
    pub max_nbits: u32,
    pub nmatrices: u32,
}

impl StatTest for MatrixRank {
    fn name(&self) -> &'static str {
        "matrix_rank"
    }

    fn validate(&self) -> Result<(), String> {
        if !(8..=128).contains(&self.dim) {
            return Err("matrix_rank: dim must be 8..=128".into());
        }
        if !(1..=64).contains(&self.max_nbits) {
            return Err("matrix_rank: max_nbits must be 1..=64".into());
        }
        if self.nmatrices < 50 {
            return Err("matrix_rank: nmatrices must be at least 50".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let width = self.max_nbits.min(r#gen.nbits());
        let words_per_row = self.dim.div_ceil(64);
        let probs = rank_probabilities(self.dim);

        let mut packer = BitPacker::new();
        let mut counts = [0u64; 3]; // full, dim-1, the rest
        let mut rows = vec![vec![0u64; words_per_row]; self.dim];
        for _ in 0..self.nmatrices {
            for row in rows.iter_mut() {
                row.fill(0);
                let mut filled = 0usize;
                while filled < self.dim {
                    let take = width.min((self.dim - filled) as u32);
                    let bits = packer.next(r#gen, take);
                    row[filled / 64] |= bits << (filled % 64);
                    let spill = filled % 64 + take as usize;
                    if spill > 64 {
                        row[filled / 64 + 1] |= bits >> (64 - filled % 64);
                    }
                    filled += take as usize;
                }
                // Clear any overhang beyond dim in the last word.
                if self.dim % 64 != 0 {
                    let last = words_per_row - 1;
                    row[last] &= (1u64 << (self.dim % 64)) - 1;
                }
            }
            let r = rank_gf2(&mut rows, self.dim);
            let bin = match self.dim - r {
                0 => 0,
                1 => 1,
                _ => 2,
            };
            counts[bin] += 1;
        }

        let total = f64::from(self.nmatrices);
        let chi2: f64 = counts
            .iter()
            .zip(probs)
            .map(|(&o, p)| {
                let e = total * p;
                let d = o as f64 - e;
                d * d / e
            })
            .sum();
        debug!(test = self.name(), chi2, "rank distribution binned");
        TestResults::new(self.name(), chi2, chi2_pvalue_exact(chi2, 2.0))
    }
}

/// Probabilities of rank dim, dim-1 and everything below for a random
/// dim x dim binary matrix.
pub(crate) fn rank_probabilities(dim: usize) -> [f64; 3] {
    let p_full = rank_probability(dim, dim);
    let p_minus1 = rank_probability(dim, dim - 1);
    [p_full, p_minus1, (1.0 - p_full - p_minus1).max(0.0)]
}

/// P(rank = r) for a random n x n matrix over GF(2).
fn rank_probability(n: usize, r: usize) -> f64 {
    let nf = n as i32;
    let rf = r as i32;
    // 2^(r(2n - r) - n^2) = 2^(-(n - r)^2)
    let mut p = 2f64.powi(-((nf - rf) * (nf - rf)));
    for i in 0..r {
        let a = 1.0 - 2f64.powi(i as i32 - nf);
        let b = 1.0 - 2f64.powi(i as i32 - rf);
        p *= a * a / b;
    }
    p
}

/// Rank over GF(2) by in-place elimination of bit-packed rows.
pub(crate) fn rank_gf2(rows: &mut [Vec<u64>], dim: usize) -> usize {
    let mut rank = 0usize;
    for col in 0..dim {
        let word = col / 64;
        let bit = 1u64 << (col % 64);
        let Some(pivot) = (rank..dim).find(|&r| rows[r][word] & bit != 0) else {
            continue;
        };
        rows.swap(rank, pivot);
        for r in rank + 1..dim {
            if rows[r][word] & bit != 0 {
                let (head, tail) = rows.split_at_mut(rank + 1);
                let pivot_row = &head[rank];
                for (dst, src) in tail[r - rank - 1].iter_mut().zip(pivot_row) {
                    *dst ^= src;
                }
            }
        }
        rank += 1;
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stattests::testutil::named_state;

    #[test]
    fn test_rank_of_identity() {
        let dim = 32;
        let mut rows: Vec<Vec<u64>> = (0..dim).map(|i| vec![1u64 << i]).collect();
        assert_eq!(rank_gf2(&mut rows, dim), 32);
    }

    #[test]
    fn test_rank_of_zero_and_duplicates() {
        let mut zero = vec![vec![0u64]; 16];
        assert_eq!(rank_gf2(&mut zero, 16), 0);
        let mut dup = vec![vec![0b1011u64]; 16];
        assert_eq!(rank_gf2(&mut dup, 16), 1);
    }

    #[test]
    fn test_rank_wide_matrix() {
        // dim > 64 exercises multi-word rows.
        let dim = 80;
        let mut rows: Vec<Vec<u64>> = (0..dim)
            .map(|i| {
                let mut row = vec![0u64; 2];
                row[i / 64] = 1u64 << (i % 64);
                row
            })
            .collect();
        assert_eq!(rank_gf2(&mut rows, dim), 80);
    }

    #[test]
    fn test_rank_probabilities_match_known_values() {
        // Classical asymptotics for random binary matrices.
        let [p_full, p_m1, p_rest] = rank_probabilities(32);
        assert!((p_full - 0.2888).abs() < 0.001, "p_full = {p_full}");
        assert!((p_m1 - 0.5776).abs() < 0.001, "p_m1 = {p_m1}");
        assert!((p_full + p_m1 + p_rest - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_validation() {
        let good = MatrixRank {
            dim: 32,
            max_nbits: 32,
            nmatrices: 200,
        };
        assert!(good.validate().is_ok());
        assert!(
            MatrixRank {
                dim: 4,
                max_nbits: 32,
                nmatrices: 200
            }
            .validate()
            .is_err()
        );
        assert!(
            MatrixRank {
                dim: 32,
                max_nbits: 0,
                nmatrices: 200
            }
            .validate()
            .is_err()
        );
        assert!(
            MatrixRank {
                dim: 32,
                max_nbits: 32,
                nmatrices: 10
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_good_generator_passes() {
        let (api, mut r#gen) = named_state("chacha20", "rank good");
        let test = MatrixRank {
            dim: 32,
            max_nbits: 32,
            nmatrices: 400,
        };
        let r = test.run(&mut r#gen, &api);
        assert!(r.p > 1e-6, "chi2 = {}, p = {}", r.x, r.p);
    }

    #[test]
    fn test_constant_stream_has_degenerate_rank() {
        let (api, mut r#gen) = named_state("zero", "rank zero");
        let test = MatrixRank {
            dim: 32,
            max_nbits: 32,
            nmatrices: 64,
        };
        let r = test.run(&mut r#gen, &api);
        // Every matrix is all-zero (rank 0): everything lands in the
        // residual bin whose probability is ~0.13.
        assert!(r.p < 1e-12, "p = {}", r.p);
    }
}
