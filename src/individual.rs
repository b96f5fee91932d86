//! Per-individual genotype input and risk-prediction output types.

use crate::snp::AlleleOrientation;
use ndarray::Array1;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenotypesError {
    #[error("'{rs_id}' is an invalid rs ID for individual {indiv_id}")]
    InvalidRsId { rs_id: String, indiv_id: String },
    #[error(
        "invalid input allele for SNP {rs_id} in individual {indiv_id}; \
         valid input alleles are '-', '0', or a string over the \
         characters 'A', 'C', 'G' and 'T'"
    )]
    InvalidAllele { rs_id: String, indiv_id: String },
    #[error(
        "Neither or both of the two input alleles should be '0' for SNP \
         {rs_id} in individual {indiv_id}"
    )]
    HalfMissingGenotype { rs_id: String, indiv_id: String },
}

fn is_valid_rs_id(s: &str) -> bool {
    match s.strip_prefix("rs") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn is_valid_input_allele(s: &str) -> bool {
    s == "-" || s == "0" || (!s.is_empty() && s.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T')))
}

/// An individual's typed genotypes, keyed by rs ID.
///
/// Genotypes for SNPs a risk model does not use are simply ignored at
/// prediction time; model SNPs absent from this collection are treated
/// as fully missing ("0"/"0").
#[derive(Debug, Clone)]
pub struct Genotypes {
    indiv_id: String,
    by_rs_id: HashMap<String, (String, String, AlleleOrientation)>,
}

impl Genotypes {
    pub fn new(indiv_id: impl Into<String>) -> Self {
        Genotypes {
            indiv_id: indiv_id.into(),
            by_rs_id: HashMap::new(),
        }
    }

    /// Records the genotype at one SNP. Alleles are validated and
    /// normalized to uppercase; either both must be the missing code "0"
    /// or neither.
    pub fn add(
        &mut self,
        rs_id: &str,
        allele1: &str,
        allele2: &str,
        orient_rs: AlleleOrientation,
    ) -> Result<(), GenotypesError> {
        if !is_valid_rs_id(rs_id) {
            return Err(GenotypesError::InvalidRsId {
                rs_id: rs_id.to_string(),
                indiv_id: self.indiv_id.clone(),
            });
        }
        let allele1 = allele1.to_ascii_uppercase();
        let allele2 = allele2.to_ascii_uppercase();
        if !(is_valid_input_allele(&allele1) && is_valid_input_allele(&allele2)) {
            return Err(GenotypesError::InvalidAllele {
                rs_id: rs_id.to_string(),
                indiv_id: self.indiv_id.clone(),
            });
        }
        if (allele1 == "0") != (allele2 == "0") {
            return Err(GenotypesError::HalfMissingGenotype {
                rs_id: rs_id.to_string(),
                indiv_id: self.indiv_id.clone(),
            });
        }
        self.by_rs_id
            .insert(rs_id.to_string(), (allele1, allele2, orient_rs));
        Ok(())
    }

    pub fn indiv_id(&self) -> &str {
        &self.indiv_id
    }

    /// Allele 1 at `rs_id`, or the missing code "0" when the SNP was not
    /// typed.
    pub fn allele1(&self, rs_id: &str) -> &str {
        self.by_rs_id
            .get(rs_id)
            .map_or("0", |(allele1, _, _)| allele1.as_str())
    }

    /// Allele 2 at `rs_id`, or the missing code "0" when the SNP was not
    /// typed.
    pub fn allele2(&self, rs_id: &str) -> &str {
        self.by_rs_id
            .get(rs_id)
            .map_or("0", |(_, allele2, _)| allele2.as_str())
    }

    /// Declared orientation of the input alleles at `rs_id`, when one was
    /// provided.
    pub fn orient_rs(&self, rs_id: &str) -> Option<AlleleOrientation> {
        self.by_rs_id.get(rs_id).map(|&(_, _, orient)| orient)
    }
}

/// An individual's risk prediction under one risk model.
///
/// Produced by [`crate::model::RiskModel::predict`]; read-only to
/// consumers. The used-genotype pairs are stored in the model's SNP
/// order.
#[derive(Debug, Clone)]
pub struct RiskPrediction {
    pub(crate) indiv_id: String,
    pub(crate) model_name: String,
    pub(crate) used_genotypes: Vec<(String, String)>,
    pub(crate) prognostic_index: f64,
    pub(crate) prognostic_index_pctl: f64,
    pub(crate) times: Array1<f64>,
    pub(crate) pred_cum_risk: Array1<f64>,
}

impl RiskPrediction {
    pub fn indiv_id(&self) -> &str {
        &self.indiv_id
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Genotypes actually used for this prediction, as
    /// `(rsID, "allele1/allele2")` pairs in the model's SNP order.
    pub fn used_genotypes(&self) -> &[(String, String)] {
        &self.used_genotypes
    }

    /// The Cox model linear predictor (expected over missing genotypes).
    pub fn prognostic_index(&self) -> f64 {
        self.prognostic_index
    }

    /// Population percentile of the prognostic index, in [0,1].
    pub fn prognostic_index_pctl(&self) -> f64 {
        self.prognostic_index_pctl
    }

    /// Times at which the predicted cumulative risk is evaluated.
    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    /// Predicted cumulative risk at each time, in [0,1].
    pub fn pred_cum_risk(&self) -> &Array1<f64> {
        &self.pred_cum_risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_snps_read_as_fully_missing() {
        let genos = Genotypes::new("I1");
        assert_eq!(genos.allele1("rs99"), "0");
        assert_eq!(genos.allele2("rs99"), "0");
        assert_eq!(genos.orient_rs("rs99"), None);
    }

    #[test]
    fn add_normalizes_case_and_stores_orientation() {
        let mut genos = Genotypes::new("I1");
        genos
            .add("rs1", "a", "g", AlleleOrientation::Reverse)
            .unwrap();
        assert_eq!(genos.allele1("rs1"), "A");
        assert_eq!(genos.allele2("rs1"), "G");
        assert_eq!(genos.orient_rs("rs1"), Some(AlleleOrientation::Reverse));
    }

    #[test]
    fn add_validates_inputs() {
        let mut genos = Genotypes::new("I1");
        assert!(matches!(
            genos.add("snp1", "A", "G", AlleleOrientation::Forward),
            Err(GenotypesError::InvalidRsId { .. })
        ));
        assert!(matches!(
            genos.add("rs1", "A", "N", AlleleOrientation::Forward),
            Err(GenotypesError::InvalidAllele { .. })
        ));
        assert!(matches!(
            genos.add("rs1", "0", "G", AlleleOrientation::Forward),
            Err(GenotypesError::HalfMissingGenotype { .. })
        ));
        // Two missing alleles are a valid (fully missing) genotype.
        genos
            .add("rs1", "0", "0", AlleleOrientation::Forward)
            .unwrap();
    }
}
