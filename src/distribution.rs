//! Multivariant genotype distributions over a set of model SNPs.
//!
//! Assuming Hardy-Weinberg equilibrium at each locus and linkage
//! equilibrium between loci, the joint genotype distribution over k SNPs
//! factorizes per locus. Two representations are supported: direct
//! enumeration of all 3^k multivariant genotypes with exact log
//! probabilities, and a fixed-seed Monte Carlo sample of linear
//! predictors for models too large to enumerate.

use crate::snp::Snp;
use rand_mt::Mt19937GenRand64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chunk length for parallel expectation sums. Fixed chunk boundaries
/// with a sequential reduction over chunk partials keep the floating
/// point summation order independent of thread scheduling.
const SUM_CHUNK: usize = 8192;

#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("cannot enumerate the multivariant genotypes of {n_snps} SNPs")]
    TooManySnps { n_snps: usize },
    #[error(
        "cumulative probability over all possible multivariant genotypes \
         is {total:e}, not numerically 1"
    )]
    ProbabilityMass { total: f64 },
}

/// Distribution of the Cox model linear predictor over the population of
/// multivariant genotypes.
///
/// The `Exact` variant carries one entry per possible genotype together
/// with its ln probability; the `MonteCarlo` variant carries one entry
/// per sampled genotype, each implicitly weighted 1/N.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GenotypeDistribution {
    Exact { etas: Vec<f64>, ln_probs: Vec<f64> },
    MonteCarlo { etas: Vec<f64> },
}

impl GenotypeDistribution {
    /// Enumerates all 3^k multivariant genotypes.
    ///
    /// Index digit convention: genotype index i is read as a k-digit
    /// base-3 number in which the digit for SNP j (0-based, in stored
    /// order) is `(i / 3^(k-1-j)) % 3`, so the first SNP varies slowest.
    /// Verifies that the genotype probabilities sum to 1 within
    /// `prob_epsilon`.
    pub fn exact(snps: &[Snp], prob_epsilon: f64) -> Result<Self, DistributionError> {
        let k = snps.len();
        // 3^k overflows well past any enumerable size; the model-level
        // SNP-count limit is enforced by the caller.
        let n_genos = u32::try_from(k)
            .ok()
            .and_then(|k| 3usize.checked_pow(k))
            .ok_or(DistributionError::TooManySnps { n_snps: k })?;
        let place: Vec<usize> = (0..k).map(|j| 3usize.pow((k - 1 - j) as u32)).collect();
        let entries: Vec<(f64, f64)> = (0..n_genos)
            .into_par_iter()
            .map(|geno_idx| {
                let mut eta = 0.0;
                let mut ln_prob = 0.0;
                for (locus_idx, snp) in snps.iter().enumerate() {
                    let geno = (geno_idx / place[locus_idx]) % 3;
                    eta += geno as f64 * snp.allele2_ln_hr();
                    ln_prob += snp.ln_prob_geno(geno as u8);
                }
                (eta, ln_prob)
            })
            .collect();
        let total: f64 = entries.iter().map(|&(_, ln_prob)| ln_prob.exp()).sum();
        if (total - 1.0).abs() > prob_epsilon {
            return Err(DistributionError::ProbabilityMass { total });
        }
        let (etas, ln_probs) = entries.into_iter().unzip();
        Ok(GenotypeDistribution::Exact { etas, ln_probs })
    }

    /// Draws `sample_size` multivariant genotypes from a Mersenne Twister
    /// stream seeded with `seed` and caches their linear predictors.
    ///
    /// A single generator serves all draws so that sequential values from
    /// the underlying stream are used: samples form the outer loop, SNPs
    /// (in stored order) the middle loop, and each SNP consumes two
    /// uniforms. Equal seeds therefore reproduce equal samples.
    pub fn monte_carlo(snps: &[Snp], sample_size: usize, seed: u64) -> Self {
        let mut rng = Mt19937GenRand64::new(seed);
        let mut etas = Vec::with_capacity(sample_size);
        for _ in 0..sample_size {
            let mut eta = 0.0;
            for snp in snps {
                eta += f64::from(snp.random_geno(&mut rng)) * snp.allele2_ln_hr();
            }
            etas.push(eta);
        }
        GenotypeDistribution::MonteCarlo { etas }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, GenotypeDistribution::Exact { .. })
    }

    /// Number of enumerated or sampled multivariant genotypes.
    pub fn len(&self) -> usize {
        self.etas().len()
    }

    pub fn is_empty(&self) -> bool {
        self.etas().is_empty()
    }

    /// Cached linear predictor values.
    pub fn etas(&self) -> &[f64] {
        match self {
            GenotypeDistribution::Exact { etas, .. } => etas,
            GenotypeDistribution::MonteCarlo { etas } => etas,
        }
    }

    /// Linear predictor of genotype `i`.
    pub fn eta(&self, i: usize) -> f64 {
        self.etas()[i]
    }

    /// Ln probability of genotype `i`; `None` for Monte Carlo samples,
    /// where genotypes are equally weighted instead.
    pub fn ln_prob(&self, i: usize) -> Option<f64> {
        match self {
            GenotypeDistribution::Exact { ln_probs, .. } => Some(ln_probs[i]),
            GenotypeDistribution::MonteCarlo { .. } => None,
        }
    }

    /// Probability weight of genotype `i`: exp(lnP_i) when exact, 1/N for
    /// a Monte Carlo sample.
    pub fn weight(&self, i: usize) -> f64 {
        match self {
            GenotypeDistribution::Exact { ln_probs, .. } => ln_probs[i].exp(),
            GenotypeDistribution::MonteCarlo { etas } => 1.0 / etas.len() as f64,
        }
    }

    /// E[s^exp(eta)] over the genotype distribution, for s in (0,1).
    ///
    /// Each term is computed in log space as exp(lnP + ln(s)*exp(eta))
    /// (with lnP = -ln N for Monte Carlo samples). Terms are summed in
    /// fixed-size chunks in parallel and the chunk partials reduced
    /// sequentially, so the result does not depend on thread scheduling.
    pub fn expected_survival(&self, s: f64) -> f64 {
        let ln_s = s.ln();
        match self {
            GenotypeDistribution::Exact { etas, ln_probs } => {
                let partials: Vec<f64> = etas
                    .par_chunks(SUM_CHUNK)
                    .zip(ln_probs.par_chunks(SUM_CHUNK))
                    .map(|(eta_chunk, ln_prob_chunk)| {
                        eta_chunk
                            .iter()
                            .zip(ln_prob_chunk)
                            .map(|(&eta, &ln_prob)| (ln_prob + ln_s * eta.exp()).exp())
                            .sum()
                    })
                    .collect();
                partials.iter().sum()
            }
            GenotypeDistribution::MonteCarlo { etas } => {
                let partials: Vec<f64> = etas
                    .par_chunks(SUM_CHUNK)
                    .map(|eta_chunk| {
                        eta_chunk
                            .iter()
                            .map(|&eta| (ln_s * eta.exp()).exp())
                            .sum()
                    })
                    .collect();
                partials.iter().sum::<f64>() / etas.len() as f64
            }
        }
    }

    /// Fraction of the genotype population with linear predictor <= `eta`
    /// (ties included).
    pub fn percentile(&self, eta: f64) -> f64 {
        match self {
            GenotypeDistribution::Exact { etas, ln_probs } => etas
                .iter()
                .zip(ln_probs)
                .filter(|&(&value, _)| value <= eta)
                .map(|(_, &ln_prob)| ln_prob.exp())
                .sum(),
            GenotypeDistribution::MonteCarlo { etas } => {
                let below = etas.par_iter().filter(|&&value| value <= eta).count();
                below as f64 / etas.len() as f64
            }
        }
    }
}
