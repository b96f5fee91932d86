//! The polygenic risk model.
//!
//! A [`RiskModel`] composes a set of modifier SNPs, a marginal survivor
//! function observed at a vector of times, the multivariant genotype
//! distribution implied by the SNP allele frequencies, and the baseline
//! survivor function recovered from the marginal one. Construction does
//! all the numerical work; a constructed model is immutable and safe to
//! share across threads, and prediction never mutates it.
//!
//! The model follows Antoniou AC et al., Cancer Res 2010;70(23):9742-54,
//! except that the baseline survivor function is obtained directly at
//! each age as the root of a well-behaved equation.

use crate::baseline::{self, BaselineError};
use crate::distribution::{DistributionError, GenotypeDistribution};
use crate::individual::{Genotypes, RiskPrediction};
use crate::snp::{Snp, SnpError};
use crate::{ulp_eq, ModelConfig};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("a risk model requires at least one SNP")]
    NoSnps,
    #[error("times array elements are not in strictly increasing order")]
    TimesNotIncreasing,
    #[error("times array elements are not all non-negative")]
    NegativeTime,
    #[error("times and marginal survivor arrays differ in length ({times} vs {marg_surv})")]
    LengthMismatch { times: usize, marg_surv: usize },
    #[error("marginal survivor function values are not in non-increasing order")]
    MargSurvIncreasing,
    #[error("marginal survivor function values are not all in [0,1]")]
    MargSurvOutOfRange,
    #[error(
        "cannot calculate the exact genotype distribution with more than \
         {max_snps_exact} SNPs; use the Monte Carlo approximation instead"
    )]
    TooManySnpsForExact { max_snps_exact: usize },
    #[error(transparent)]
    Distribution(#[from] DistributionError),
    #[error(transparent)]
    Baseline(#[from] BaselineError),
    #[error(transparent)]
    Genotype(#[from] SnpError),
}

/// Genetic risk prediction model over a set of modifier SNPs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskModel {
    model_name: String,
    snps: Vec<Snp>,
    times: Array1<f64>,
    marg_surv: Array1<f64>,
    base_surv: Array1<f64>,
    distribution: GenotypeDistribution,
    config: ModelConfig,
}

impl RiskModel {
    /// Builds a risk model with the production configuration, choosing
    /// the exact genotype distribution when the SNP count permits and a
    /// Monte Carlo sample otherwise.
    pub fn new(
        model_name: impl Into<String>,
        snps: Vec<Snp>,
        times: Array1<f64>,
        marg_surv: Array1<f64>,
    ) -> Result<Self, ModelError> {
        Self::with_config(model_name, snps, times, marg_surv, None, ModelConfig::default())
    }

    /// Builds a risk model with full control over the distribution mode
    /// and numerical configuration.
    ///
    /// `use_exact` forces direct enumeration (`Some(true)`, rejected when
    /// the SNP count exceeds `config.max_snps_exact`) or Monte Carlo
    /// sampling (`Some(false)`); `None` selects enumeration whenever it
    /// is permitted, logging a warning when the model is forced down to
    /// the Monte Carlo approximation.
    pub fn with_config(
        model_name: impl Into<String>,
        snps: Vec<Snp>,
        times: Array1<f64>,
        marg_surv: Array1<f64>,
        use_exact: Option<bool>,
        config: ModelConfig,
    ) -> Result<Self, ModelError> {
        let model_name = model_name.into();
        check_constructor_args(&snps, &times, &marg_surv)?;
        let use_exact = match use_exact {
            Some(true) if snps.len() > config.max_snps_exact => {
                return Err(ModelError::TooManySnpsForExact {
                    max_snps_exact: config.max_snps_exact,
                });
            }
            Some(requested) => requested,
            None => {
                let permitted = snps.len() <= config.max_snps_exact;
                if !permitted {
                    log::warn!(
                        "model {}: {} SNPs exceed the exact-enumeration limit of {}; \
                         falling back to a Monte Carlo sample of size {}",
                        model_name,
                        snps.len(),
                        config.max_snps_exact,
                        config.monte_carlo_samp_size
                    );
                }
                permitted
            }
        };
        let distribution = if use_exact {
            log::debug!(
                "model {}: enumerating 3^{} multivariant genotypes",
                model_name,
                snps.len()
            );
            GenotypeDistribution::exact(&snps, config.prob_cmp_epsilon)?
        } else {
            log::debug!(
                "model {}: sampling {} multivariant genotypes (seed {})",
                model_name,
                config.monte_carlo_samp_size,
                config.mc_seed
            );
            GenotypeDistribution::monte_carlo(&snps, config.monte_carlo_samp_size, config.mc_seed)
        };
        let base_surv = baseline::solve_baseline(
            &distribution,
            &times,
            &marg_surv,
            config.prob_cmp_epsilon,
            config.solver_max_eval,
        )?;
        Ok(RiskModel {
            model_name,
            snps,
            times,
            marg_surv,
            base_surv,
            distribution,
            config,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn snps(&self) -> &[Snp] {
        &self.snps
    }

    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    pub fn marg_surv(&self) -> &Array1<f64> {
        &self.marg_surv
    }

    pub fn base_surv(&self) -> &Array1<f64> {
        &self.base_surv
    }

    pub fn distribution(&self) -> &GenotypeDistribution {
        &self.distribution
    }

    pub fn is_exact(&self) -> bool {
        self.distribution.is_exact()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Predicts cumulative risk for one individual.
    ///
    /// Input genotypes for SNPs outside the model are ignored; model SNPs
    /// missing from the input are integrated over under HWE and linkage
    /// equilibrium, so the returned prognostic index is the expectation
    /// of the linear predictor given the observed genotypes. When the
    /// input declares no orientation for a SNP the model's stored
    /// orientation is assumed, which disables strand flipping for that
    /// SNP; inputs that may be on the opposite strand must say so.
    pub fn predict(&self, input_genos: &Genotypes) -> Result<RiskPrediction, ModelError> {
        let mut used_genotypes = Vec::with_capacity(self.snps.len());
        let mut eta = 0.0;
        for snp in &self.snps {
            let rs_id = snp.rs_id();
            let allele1 = input_genos.allele1(rs_id);
            let allele2 = input_genos.allele2(rs_id);
            let orient_rs = input_genos.orient_rs(rs_id).unwrap_or_else(|| snp.orient_rs());
            used_genotypes.push((rs_id.to_string(), format!("{allele1}/{allele2}")));
            eta += snp.geno_score(allele1, allele2, orient_rs)?;
        }
        let prognostic_index_pctl = self.distribution.percentile(eta);
        let hazard_scale = eta.exp();
        let pred_cum_risk = self.base_surv.mapv(|base_surv_t| {
            if ulp_eq(base_surv_t, 1.0) {
                0.0
            } else if ulp_eq(base_surv_t, 0.0) {
                1.0
            } else {
                1.0 - (base_surv_t.ln() * hazard_scale).exp()
            }
        });
        Ok(RiskPrediction {
            indiv_id: input_genos.indiv_id().to_string(),
            model_name: self.model_name.clone(),
            used_genotypes,
            prognostic_index: eta,
            prognostic_index_pctl,
            times: self.times.clone(),
            pred_cum_risk,
        })
    }

    /// Writes a human-readable model summary: SNP details with hazard
    /// ratios and source references, followed by the marginal and
    /// baseline survivor functions.
    pub fn write_summary<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        writeln!(w, "{}", "=".repeat(self.model_name.len()))?;
        writeln!(w, "{}", self.model_name)?;
        writeln!(w, "{}", "=".repeat(self.model_name.len()))?;
        writeln!(w)?;
        writeln!(w, "SUMMARY")?;
        writeln!(w, "-------")?;
        writeln!(w, "Number of SNPs Included: {}", self.snps.len())?;
        writeln!(
            w,
            "Genotype Distribution: {}",
            if self.is_exact() {
                "Direct Enumeration"
            } else {
                "Monte Carlo Approximation"
            }
        )?;
        if !self.is_exact() {
            writeln!(w, "Monte Carlo Sample Size: {}", self.distribution.len())?;
        }
        writeln!(
            w,
            "Number of Survivor Function Evaluation Times: {}",
            self.times.len()
        )?;
        writeln!(w)?;
        writeln!(w, "MODEL SNP DETAILS")?;
        let snp_header = format!(
            "{:<14} | {:<8} | {:<8} | {:<7} | {:<7} | {:<7} | {:<3}",
            "RS #", "A1", "A2", "ORIENT", "A2 FREQ", "A2 HR", "REF"
        );
        let snp_hrule: String = snp_header
            .chars()
            .map(|c| if c == '|' { '+' } else { '-' })
            .collect();
        writeln!(w, "{snp_hrule}")?;
        writeln!(w, "{snp_header}")?;
        writeln!(w, "{snp_hrule}")?;
        // Source publications are numbered in order of first appearance.
        let mut source_pubs: Vec<&str> = Vec::new();
        for snp in &self.snps {
            if !source_pubs.contains(&snp.source_pub()) {
                source_pubs.push(snp.source_pub());
            }
            let ref_num = source_pubs
                .iter()
                .position(|&pub_ref| pub_ref == snp.source_pub())
                .map_or(0, |idx| idx + 1);
            writeln!(
                w,
                "{:<14} | {:<8} | {:<8} | {:<7} | {:<7.3} | {:<7.3} | {:<3}",
                snp.rs_id(),
                snp.allele1(),
                snp.allele2(),
                snp.orient_rs().to_string(),
                snp.allele2_freq(),
                snp.allele2_ln_hr().exp(),
                ref_num
            )?;
        }
        writeln!(w, "{snp_hrule}")?;
        for (idx, pub_ref) in source_pubs.iter().enumerate() {
            writeln!(w, "{}) {}", idx + 1, pub_ref)?;
        }
        writeln!(w)?;
        writeln!(w, "SURVIVOR FUNCTIONS")?;
        let life_header = format!("{:<7} | {:<7} | {:<7}", "t", "S(t)", "So(t)");
        let life_hrule: String = life_header
            .chars()
            .map(|c| if c == '|' { '+' } else { '-' })
            .collect();
        writeln!(w, "{life_hrule}")?;
        writeln!(w, "{life_header}")?;
        writeln!(w, "{life_hrule}")?;
        for time_idx in 0..self.times.len() {
            writeln!(
                w,
                "{:<7.3} | {:<7.3} | {:<7.3}",
                self.times[time_idx], self.marg_surv[time_idx], self.base_surv[time_idx]
            )?;
        }
        writeln!(w, "{life_hrule}")?;
        Ok(())
    }
}

fn check_constructor_args(
    snps: &[Snp],
    times: &Array1<f64>,
    marg_surv: &Array1<f64>,
) -> Result<(), ModelError> {
    if snps.is_empty() {
        return Err(ModelError::NoSnps);
    }
    if times.len() != marg_surv.len() {
        return Err(ModelError::LengthMismatch {
            times: times.len(),
            marg_surv: marg_surv.len(),
        });
    }
    for pair in times.windows(2) {
        if !(pair[1] > pair[0]) {
            return Err(ModelError::TimesNotIncreasing);
        }
    }
    if times.iter().any(|&t| t < 0.0) {
        return Err(ModelError::NegativeTime);
    }
    if marg_surv.iter().any(|&s| !(0.0..=1.0).contains(&s)) {
        return Err(ModelError::MargSurvOutOfRange);
    }
    for pair in marg_surv.windows(2) {
        if pair[1] > pair[0] {
            return Err(ModelError::MargSurvIncreasing);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snp::AlleleOrientation;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn snp(rs: &str, freq: f64, ln_hr: f64) -> Snp {
        Snp::new(rs, "Foo et al. Title. AJHG 2012; 21(3):1-5", "A", "T",
            AlleleOrientation::Forward, freq, ln_hr)
        .unwrap()
    }

    fn simple_model() -> RiskModel {
        // Single A/T SNP, p = 0.2, lnHR = 0.5.
        RiskModel::new(
            "TestModel",
            vec![snp("rs1", 0.2, 0.5)],
            array![0.0, 1.0, 2.0, 3.0],
            array![1.0, 0.9, 0.75, 0.5],
        )
        .unwrap()
    }

    #[test]
    fn constructor_rejects_bad_arguments() {
        let snps = vec![snp("rs1", 0.14, -0.123); 10];
        let good_times = array![0.0, 1.0, 2.0, 3.0];
        let good_marg = array![1.0, 0.75, 0.75, 0.5];
        let build = |times: Array1<f64>, marg: Array1<f64>| {
            RiskModel::new("M", snps.clone(), times, marg)
        };
        assert!(matches!(
            build(array![0.0, 1.0, 1.0, 2.0], good_marg.clone()),
            Err(ModelError::TimesNotIncreasing)
        ));
        assert!(matches!(
            build(array![-1.0, 0.0, 1.0, 2.0], good_marg.clone()),
            Err(ModelError::NegativeTime)
        ));
        assert!(matches!(
            build(good_times.clone(), array![1.0, 0.75, 0.8, 0.5]),
            Err(ModelError::MargSurvIncreasing)
        ));
        assert!(matches!(
            build(good_times.clone(), array![1.1, 0.75, 0.75, 0.0]),
            Err(ModelError::MargSurvOutOfRange)
        ));
        assert!(matches!(
            build(good_times.clone(), array![1.0, 0.75, 0.75, -0.01]),
            Err(ModelError::MargSurvOutOfRange)
        ));
        assert!(matches!(
            build(good_times.clone(), array![1.0, 0.75, 0.75]),
            Err(ModelError::LengthMismatch { .. })
        ));
        assert!(matches!(
            RiskModel::new("M", vec![], good_times.clone(), good_marg.clone()),
            Err(ModelError::NoSnps)
        ));
        let many = vec![snp("rs1", 0.14, -0.123); 20];
        assert!(matches!(
            RiskModel::with_config(
                "M",
                many,
                good_times,
                good_marg,
                Some(true),
                ModelConfig::default()
            ),
            Err(ModelError::TooManySnpsForExact { max_snps_exact: 15 })
        ));
    }

    #[test]
    fn small_models_enumerate_by_default() {
        let model = simple_model();
        assert!(model.is_exact());
        assert_eq!(model.distribution().len(), 3);
    }

    #[test]
    fn forced_monte_carlo_is_honored_for_small_models() {
        let config = ModelConfig {
            monte_carlo_samp_size: 50_000,
            ..ModelConfig::default()
        };
        let model = RiskModel::with_config(
            "MC",
            vec![snp("rs1", 0.2, 0.5)],
            array![0.0, 1.0, 2.0],
            array![1.0, 0.9, 0.8],
            Some(false),
            config,
        )
        .unwrap();
        assert!(!model.is_exact());
        assert_eq!(model.distribution().len(), 50_000);
    }

    #[test]
    fn prediction_scores_genotypes_in_snp_order() {
        let model = simple_model();
        let mut genos = Genotypes::new("I1");
        genos
            .add("rs1", "A", "T", AlleleOrientation::Forward)
            .unwrap();
        // Genotypes for SNPs outside the model are ignored.
        genos
            .add("rs999", "C", "C", AlleleOrientation::Forward)
            .unwrap();
        let pred = model.predict(&genos).unwrap();
        assert_eq!(pred.indiv_id(), "I1");
        assert_eq!(pred.model_name(), "TestModel");
        assert_eq!(
            pred.used_genotypes(),
            &[("rs1".to_string(), "A/T".to_string())]
        );
        assert_abs_diff_eq!(pred.prognostic_index(), 0.5, epsilon = 1e-12);
        // One allele-2 copy sits above the g=0 mass, tied with g=1:
        // 0.8^2 + 2*0.2*0.8 = 0.96.
        assert_abs_diff_eq!(pred.prognostic_index_pctl(), 0.96, epsilon = 1e-12);
    }

    #[test]
    fn missing_snps_score_as_hwe_expectation() {
        let model = simple_model();
        let genos = Genotypes::new("I2");
        let pred = model.predict(&genos).unwrap();
        assert_eq!(
            pred.used_genotypes(),
            &[("rs1".to_string(), "0/0".to_string())]
        );
        assert_abs_diff_eq!(pred.prognostic_index(), 0.2, epsilon = 1e-12);
        // The expectation falls between the g=0 and g=1 predictor values.
        assert_abs_diff_eq!(pred.prognostic_index_pctl(), 0.64, epsilon = 1e-12);
    }

    #[test]
    fn prediction_errors_do_not_poison_the_model() {
        let model = simple_model();
        let mut bad = Genotypes::new("bad");
        bad.add("rs1", "C", "C", AlleleOrientation::Forward).unwrap();
        assert!(matches!(
            model.predict(&bad),
            Err(ModelError::Genotype(SnpError::PopulationMismatch { .. }))
        ));
        let good = Genotypes::new("good");
        let pred = model.predict(&good).unwrap();
        assert_abs_diff_eq!(pred.prognostic_index(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn cumulative_risk_follows_the_cox_identity() {
        let model = simple_model();
        let mut genos = Genotypes::new("I3");
        genos
            .add("rs1", "T", "T", AlleleOrientation::Forward)
            .unwrap();
        let pred = model.predict(&genos).unwrap();
        assert_abs_diff_eq!(pred.prognostic_index(), 1.0, epsilon = 1e-12);
        let base = model.base_surv();
        for t in 0..model.times().len() {
            let expected = if ulp_eq(base[t], 1.0) {
                0.0
            } else {
                1.0 - (base[t].ln() * 1.0f64.exp()).exp()
            };
            assert_abs_diff_eq!(pred.pred_cum_risk()[t], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn cumulative_risk_is_monotone_for_all_etas() {
        // T = 100 ages with a strictly decreasing marginal survivor.
        let n_times = 100;
        let times = Array1::from_iter((0..n_times).map(|t| t as f64));
        let marg = Array1::from_iter((0..n_times).map(|t| (-0.03 * t as f64).exp()));
        let model = RiskModel::new(
            "Mono",
            vec![snp("rs1", 0.3, 2.0), snp("rs2", 0.4, -2.0)],
            times,
            marg,
        )
        .unwrap();
        for (allele1, allele2, rs) in
            [("T", "T", "rs2"), ("A", "A", "rs1"), ("T", "T", "rs1")]
        {
            let mut genos = Genotypes::new("I");
            genos.add(rs, allele1, allele2, AlleleOrientation::Forward).unwrap();
            let pred = model.predict(&genos).unwrap();
            let risk = pred.pred_cum_risk();
            for t in 1..risk.len() {
                assert!(
                    risk[t] >= risk[t - 1],
                    "cumulative risk decreased at t={t} for eta={}",
                    pred.prognostic_index()
                );
            }
            assert!(risk.iter().all(|&r| (0.0..=1.0).contains(&r)));
        }
    }

    #[test]
    fn survivor_boundaries_pin_risk_for_every_eta() {
        let model = RiskModel::new(
            "Bounds",
            vec![snp("rs1", 0.2, 1.5)],
            array![0.0, 1.0, 2.0],
            array![1.0, 0.4, 0.0],
        )
        .unwrap();
        assert_eq!(model.base_surv()[0], 1.0);
        assert_eq!(model.base_surv()[2], 0.0);
        for genotype in [("A", "A"), ("A", "T"), ("T", "T")] {
            let mut genos = Genotypes::new("I");
            genos
                .add("rs1", genotype.0, genotype.1, AlleleOrientation::Forward)
                .unwrap();
            let pred = model.predict(&genos).unwrap();
            assert_eq!(pred.pred_cum_risk()[0], 0.0);
            assert_eq!(pred.pred_cum_risk()[2], 1.0);
        }
    }

    #[test]
    fn summary_lists_snps_and_survivor_functions() {
        let model = simple_model();
        let mut out = Vec::new();
        model.write_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("TestModel"));
        assert!(text.contains("Number of SNPs Included: 1"));
        assert!(text.contains("Direct Enumeration"));
        assert!(text.contains("rs1"));
        assert!(text.contains("1) Foo et al. Title. AJHG 2012; 21(3):1-5"));
        assert!(text.contains("SURVIVOR FUNCTIONS"));
    }
}
