//! Numeric kernel: special functions and sorting primitives.

pub mod sort;
pub mod special;

pub use sort::{quicksort64, radixsort32, radixsort64};
pub use special::{
    binomial_cdf, binomial_pmf, chi2_cdf, chi2_pvalue, chi2_pvalue_exact, chi2_to_stdnorm_approx,
    erf, erfc,
    halfnorm_pvalue, igam, igamc, incbeta, ks_pvalue, lgamma, poisson_cdf, poisson_pvalue,
    stdnorm_cdf, stdnorm_inv, stdnorm_pvalue, student_t_cdf, student_t_pvalue,
};
