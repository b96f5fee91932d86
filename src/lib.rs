//! # PRISM Crate
//!
//! This library contains the core risk-model engine for the `prism`
//! package: polygenic risk models that predict an individual's cumulative
//! disease risk from genotypes at a set of modifier SNPs, assuming a Cox
//! proportional-hazards model, Hardy-Weinberg equilibrium, and linkage
//! equilibrium between loci.
//!
//! The binaries `prism-build` and `prism-predict` call functions from this
//! library. `prism-build` turns SNP and annual-incidence source tables
//! into serialized [`model::RiskModel`] objects; `prism-predict` loads
//! those objects and scores individual genotype files against them.

pub mod baseline;
pub mod distribution;
pub mod incidence;
pub mod individual;
pub mod io;
pub mod model;
pub mod snp;

pub use model::RiskModel;
pub use snp::{AlleleOrientation, Snp};

use serde::{Deserialize, Serialize};

/// Numerical policy for risk-model construction.
///
/// The defaults are the production constants; tests may substitute
/// smaller Monte Carlo samples (with correspondingly wider tolerances)
/// to keep runtimes reasonable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of SNPs above which a Monte Carlo sample from the
    /// multivariant genotype distribution must be used.
    pub max_snps_exact: usize,
    /// Monte Carlo sample size. The default of 1e7 keeps the Monte Carlo
    /// estimate of the marginal survivor function within 6.16e-4 of its
    /// true value in 99.9% of samples (Hoeffding inequality).
    pub monte_carlo_samp_size: usize,
    /// Seed for the Monte Carlo random number generator (first 9 digits
    /// of pi), rendering samples effectively deterministic.
    pub mc_seed: u64,
    /// Absolute accuracy within which two probabilities are considered
    /// equal.
    pub prob_cmp_epsilon: f64,
    /// Maximum number of objective-function evaluations allowed to the
    /// baseline survivor root-finder per time point.
    pub solver_max_eval: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            max_snps_exact: 15,
            monte_carlo_samp_size: 10_000_000,
            mc_seed: 314_159_265,
            prob_cmp_epsilon: 1e-10,
            solver_max_eval: 100,
        }
    }
}

/// True when `a` and `b` are equal or bit-adjacent doubles (equality
/// within one ULP). Survivor-function boundary tests use this rather
/// than exact equality so that values one rounding step away from 0 or 1
/// are treated as the endpoint.
pub(crate) fn ulp_eq(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    if a.is_nan() || b.is_nan() {
        return false;
    }
    // Map the IEEE-754 bit patterns onto a single monotone integer line
    // so that adjacent floats differ by exactly 1.
    fn ordinal(x: f64) -> i64 {
        let bits = x.to_bits() as i64;
        if bits < 0 {
            i64::MIN - bits
        } else {
            bits
        }
    }
    (ordinal(a) as i128 - ordinal(b) as i128).abs() <= 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_published_constants() {
        let config = ModelConfig::default();
        assert_eq!(config.max_snps_exact, 15);
        assert_eq!(config.monte_carlo_samp_size, 10_000_000);
        assert_eq!(config.mc_seed, 314_159_265);
        assert_eq!(config.prob_cmp_epsilon, 1e-10);
        assert_eq!(config.solver_max_eval, 100);
    }

    #[test]
    fn ulp_equality() {
        assert!(ulp_eq(1.0, 1.0));
        assert!(ulp_eq(0.0, -0.0));
        assert!(ulp_eq(1.0, f64::from_bits(1.0f64.to_bits() + 1)));
        assert!(!ulp_eq(1.0, f64::from_bits(1.0f64.to_bits() + 2)));
        assert!(!ulp_eq(1.0, 0.9999999));
        assert!(!ulp_eq(f64::NAN, f64::NAN));
        // The smallest positive subnormal is one step from zero.
        assert!(ulp_eq(0.0, f64::from_bits(1)));
        assert!(ulp_eq(0.0, -f64::from_bits(1)));
    }
}
