//! Sum-collector renewal test (Ugrin-Sparac).
//!
//! Uniform variates accumulate until the partial sum exceeds the
//! threshold g; the number of draws needed has a closed-form distribution
//! through the Irwin-Hall CDF, computed here by direct alternating sum
//! (numerically safe for the small thresholds the test accepts).

use tracing::debug;

use crate::generator::{CallerApi, GeneratorState};
use crate::numeric::{chi2_pvalue_exact, lgamma};
use crate::stattests::{StatTest, TestResults, uniform_top32};

/// Minimum expected count per chi-square bin.
const SUMCOLL_MIN_EXPECTED: f64 = 10.0;

/// Hard cap on the tracked draw count per renewal cycle.
const SUMCOLL_MAX_COUNT: usize = 128;

#[derive(Debug, Clone)]
pub struct SumCollector {
    /// Renewal threshold; draws accumulate until the sum exceeds it.
    pub g: f64,
    pub nsamples: u64,
}

impl StatTest for SumCollector {
    fn name(&self) -> &'static str {
        "sum_collector"
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.g > 1.0 && self.g <= 10.0) {
            return Err("sum_collector: g must be in (1, 10]".into());
        }
        if self.nsamples < 10_000 {
            return Err("sum_collector: nsamples must be at least 10000".into());
        }
        Ok(())
    }

    fn run(&self, r#gen: &mut GeneratorState, _api: &CallerApi) -> TestResults {
        let mut hist = vec![0u64; SUMCOLL_MAX_COUNT + 1];
        for _ in 0..self.nsamples {
            let mut sum = 0.0f64;
            let mut count = 0usize;
            loop {
                sum += uniform_top32(r#gen);
                count += 1;
                if sum > self.g || count >= SUMCOLL_MAX_COUNT {
                    break;
                }
            }
            hist[count] += 1;
        }

        let probs = renewal_count_probabilities(self.g, SUMCOLL_MAX_COUNT);
        let (chi2, df) = binned_chi2(&hist, &probs, self.nsamples);
        debug!(test = self.name(), chi2, df, "renewal histogram binned");
        if df < 1.0 {
            return TestResults::hard_fail(self.name());
        }
        TestResults::new(self.name(), chi2, chi2_pvalue_exact(chi2, df))
    }
}

/// P(N = n) for n in 0..=max_count, where N is the number of uniforms
/// needed for the partial sum to exceed g. The final slot absorbs the
/// remaining tail mass.
pub(crate) fn renewal_count_probabilities(g: f64, max_count: usize) -> Vec<f64> {
    let mut probs = vec![0.0f64; max_count + 1];
    let mut prev_cdf = 1.0; // P(S_0 <= g) with an empty sum
    let mut tail_used = 0.0;
    for n in 1..max_count {
        let cdf = irwin_hall_cdf(n, g);
        probs[n] = (prev_cdf - cdf).max(0.0);
        tail_used += probs[n];
        prev_cdf = cdf;
    }
    probs[max_count] = (1.0 - tail_used).max(0.0);
    probs
}

/// P(S_n <= g) for the sum of n iid U(0,1) variables.
fn irwin_hall_cdf(n: usize, g: f64) -> f64 {
    if g <= 0.0 {
        return 0.0;
    }
    if g >= n as f64 {
        return 1.0;
    }
    let nf = n as f64;
    let mut acc = 0.0f64;
    let jmax = g.floor() as usize;
    for j in 0..=jmax.min(n) {
        let jf = j as f64;
        // C(n, j) (g - j)^n / n!, log-form against overflow.
        let log_term = lgamma(nf + 1.0) - lgamma(jf + 1.0) - lgamma(nf - jf + 1.0)
            + nf * (g - jf).ln()
            - lgamma(nf + 1.0);
        let term = log_term.exp();
        acc += if j % 2 == 0 { term } else { -term };
    }
    acc.clamp(0.0, 1.0)
}

/// Chi-square over count bins, lumping neighbors until every bin's
/// expectation clears the minimum. Returns (chi2, df).
fn binned_chi2(hist: &[u64], probs: &[f64], nsamples: u64) -> (f64, f64) {
    let n = nsamples as f64;
    let mut chi2 = 0.0;
    let mut nbins = 0usize;
    let mut acc_o = 0.0;
    let mut acc_e = 0.0;
    for (&o, &p) in hist.iter().zip(probs) {
        acc_o += o as f64;
        acc_e += n * p;
        if acc_e >= SUMCOLL_MIN_EXPECTED {
            let d = acc_o - acc_e;
            chi2 += d * d / acc_e;
            nbins += 1;
            acc_o = 0.0;
            acc_e = 0.0;
        }
    }
    if (acc_e > 0.0 || acc_o > 0.0) && nbins > 0 {
        // Remainder folds into a final open bin when it carries weight.
        let d = acc_o - acc_e;
        chi2 += d * d / acc_e.max(1e-9);
        nbins += 1;
    }
    (chi2, nbins.saturating_sub(1) as f64)
}
