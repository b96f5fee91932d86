//! Model SNP descriptors and per-locus genotype scoring.
//!
//! A [`Snp`] stores the information published for a single biallelic
//! modifier locus: the dbSNP refSNP identifier, the source publication,
//! the two population alleles, their orientation relative to the refSNP
//! alleles, the allele 2 frequency, and the Cox model ln hazard ratio per
//! additional copy of allele 2.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnpError {
    #[error("'{0}' is an invalid rs ID")]
    InvalidRsId(String),
    #[error(
        "invalid allele for SNP {rs_id}; valid alleles are '-' or a \
         string over the characters 'A', 'C', 'G' and 'T'"
    )]
    InvalidAllele { rs_id: String },
    #[error("allele 2 frequency for SNP {rs_id} is not in (0,1)")]
    FrequencyOutOfRange { rs_id: String },
    #[error("ln hazard ratio for SNP {rs_id} is not finite")]
    NonFiniteLnHazardRatio { rs_id: String },
    #[error(
        "invalid input allele for SNP {rs_id}; valid input alleles are \
         '-', '0', or a string over the characters 'A', 'C', 'G' and 'T'"
    )]
    InvalidInputAllele { rs_id: String },
    #[error("Neither or both of the two input alleles should be '0' for SNP {rs_id}")]
    HalfMissingGenotype { rs_id: String },
    #[error(
        "one or both input alleles differ from the possible population \
         alleles for SNP {rs_id}"
    )]
    PopulationMismatch { rs_id: String },
}

/// Orientation of a pair of alleles relative to the dbSNP refSNP alleles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlleleOrientation {
    Forward,
    Reverse,
}

impl FromStr for AlleleOrientation {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(AlleleOrientation::Forward),
            "reverse" => Ok(AlleleOrientation::Reverse),
            _ => Err("Unknown allele orientation. Use 'Forward' or 'Reverse'."),
        }
    }
}

impl fmt::Display for AlleleOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlleleOrientation::Forward => write!(f, "Forward"),
            AlleleOrientation::Reverse => write!(f, "Reverse"),
        }
    }
}

/// Single nucleotide polymorphism characteristics, as obtained from a
/// source publication. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snp {
    rs_id: String,
    source_pub: String,
    allele1: String,
    allele2: String,
    orient_rs: AlleleOrientation,
    allele2_freq: f64,
    allele2_ln_hr: f64,
}

fn is_valid_rs_id(s: &str) -> bool {
    match s.strip_prefix("rs") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn is_acgt(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T'))
}

fn is_valid_stored_allele(s: &str) -> bool {
    s == "-" || is_acgt(s)
}

fn is_valid_input_allele(s: &str) -> bool {
    s == "-" || s == "0" || is_acgt(s)
}

/// Translates an uppercase allele string to the opposite strand:
/// A <-> T and C <-> G, character by character. The indel code '-' has no
/// complement and passes through unchanged.
pub(crate) fn complement(allele: &str) -> String {
    allele
        .chars()
        .map(|c| match c {
            'A' => 'T',
            'C' => 'G',
            'G' => 'C',
            'T' => 'A',
            other => other,
        })
        .collect()
}

impl Snp {
    /// Constructs a SNP, validating the rs ID form, the allele strings
    /// (uppercased before storage), the allele 2 frequency (must lie
    /// strictly inside (0,1)), and the ln hazard ratio (must be finite).
    pub fn new(
        rs_id: impl Into<String>,
        source_pub: impl Into<String>,
        allele1: &str,
        allele2: &str,
        orient_rs: AlleleOrientation,
        allele2_freq: f64,
        allele2_ln_hr: f64,
    ) -> Result<Self, SnpError> {
        let rs_id = rs_id.into();
        if !is_valid_rs_id(&rs_id) {
            return Err(SnpError::InvalidRsId(rs_id));
        }
        let allele1 = allele1.to_ascii_uppercase();
        let allele2 = allele2.to_ascii_uppercase();
        if !(is_valid_stored_allele(&allele1) && is_valid_stored_allele(&allele2)) {
            return Err(SnpError::InvalidAllele { rs_id });
        }
        if !(allele2_freq > 0.0 && allele2_freq < 1.0) {
            return Err(SnpError::FrequencyOutOfRange { rs_id });
        }
        if !allele2_ln_hr.is_finite() {
            return Err(SnpError::NonFiniteLnHazardRatio { rs_id });
        }
        Ok(Snp {
            rs_id,
            source_pub: source_pub.into(),
            allele1,
            allele2,
            orient_rs,
            allele2_freq,
            allele2_ln_hr,
        })
    }

    pub fn rs_id(&self) -> &str {
        &self.rs_id
    }

    pub fn source_pub(&self) -> &str {
        &self.source_pub
    }

    pub fn allele1(&self) -> &str {
        &self.allele1
    }

    pub fn allele2(&self) -> &str {
        &self.allele2
    }

    pub fn orient_rs(&self) -> AlleleOrientation {
        self.orient_rs
    }

    pub fn allele2_freq(&self) -> f64 {
        self.allele2_freq
    }

    pub fn allele2_ln_hr(&self) -> f64 {
        self.allele2_ln_hr
    }

    /// Ln probability of a genotype (number of allele 2 copies, in
    /// {0,1,2}) under Hardy-Weinberg equilibrium:
    ///
    /// ```text
    /// ln(p_0) = 2*ln(1-p)
    /// ln(p_1) = ln(2) + ln(p) + ln(1-p)
    /// ln(p_2) = 2*ln(p)
    /// ```
    pub fn ln_prob_geno(&self, allele2_count: u8) -> f64 {
        debug_assert!(allele2_count <= 2);
        let g = f64::from(allele2_count);
        let ln2 = if allele2_count == 1 { 2.0f64.ln() } else { 0.0 };
        ln2 + g * self.allele2_freq.ln() + (2.0 - g) * (1.0 - self.allele2_freq).ln()
    }

    /// Draws a random genotype (number of allele 2 copies) under HWE.
    ///
    /// The genotype is Binomial(2, p), realized as the sum of two
    /// independent Bernoulli(p) trials. Exactly two uniforms are consumed
    /// from `rng`, in order, so that a fixed stream yields a fixed
    /// sequence of genotypes.
    pub fn random_geno<R: Rng>(&self, rng: &mut R) -> u8 {
        let first = u8::from(rng.gen::<f64>() < self.allele2_freq);
        let second = u8::from(rng.gen::<f64>() < self.allele2_freq);
        first + second
    }

    /// Scores an input genotype against this SNP: the number of times the
    /// stored allele 2 appears in the input genotype, times the
    /// per-allele-2 ln hazard ratio.
    ///
    /// Input alleles are case-insensitive and reconciled to the stored
    /// strand first: when `in_orient_rs` differs from the stored
    /// orientation, both input alleles are complemented. A fully missing
    /// genotype (both alleles "0") scores as the expectation of the
    /// per-locus Cox term over the HWE genotype distribution.
    pub fn geno_score(
        &self,
        in_allele1: &str,
        in_allele2: &str,
        in_orient_rs: AlleleOrientation,
    ) -> Result<f64, SnpError> {
        let upper1 = in_allele1.to_ascii_uppercase();
        let upper2 = in_allele2.to_ascii_uppercase();
        if !(is_valid_input_allele(&upper1) && is_valid_input_allele(&upper2)) {
            return Err(SnpError::InvalidInputAllele {
                rs_id: self.rs_id.clone(),
            });
        }
        if (upper1 == "0") != (upper2 == "0") {
            return Err(SnpError::HalfMissingGenotype {
                rs_id: self.rs_id.clone(),
            });
        }
        if upper1 == "0" {
            // Fully missing: expected X*beta over the HWE genotype
            // distribution, 1*lnHR*2p(1-p) + 2*lnHR*p^2.
            let p = self.allele2_freq;
            return Ok(self.allele2_ln_hr * 2.0 * p * (1.0 - p)
                + 2.0 * self.allele2_ln_hr * p * p);
        }
        let (oriented1, oriented2) = if in_orient_rs != self.orient_rs {
            (complement(&upper1), complement(&upper2))
        } else {
            (upper1, upper2)
        };
        for oriented in [&oriented1, &oriented2] {
            if *oriented != self.allele1 && *oriented != self.allele2 {
                return Err(SnpError::PopulationMismatch {
                    rs_id: self.rs_id.clone(),
                });
            }
        }
        let allele2_count =
            u8::from(oriented1 == self.allele2) + u8::from(oriented2 == self.allele2);
        Ok(f64::from(allele2_count) * self.allele2_ln_hr)
    }
}
