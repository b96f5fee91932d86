//! Conversion of annual incidence tables into marginal survivor curves.
//!
//! Annual incidences are treated as piecewise-constant yearly hazards:
//! the cumulative hazard to age a is the running sum of the incidences
//! through age a, and S(a) = exp(-H(a)). Requiring the incidence in the
//! year preceding birth to be zero pins S(0) = 1.

use crate::ulp_eq;
use ndarray::Array1;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IncidenceError {
    #[error(
        "annual incidence in the year preceding birth (age 0) must be 0 \
         so that S(0) = 1"
    )]
    NonzeroAtBirth,
    #[error("annual incidence {value} at age {age} is negative")]
    NegativeIncidence { age: u32, value: f64 },
    #[error(
        "annual incidences must be supplied for consecutive yearly ages \
         starting at 0 (expected age {expected}, found {found})"
    )]
    NonContiguousAge { expected: u32, found: u32 },
}

/// Ordered table of annual incidences for consecutive yearly ages
/// starting at 0.
#[derive(Debug, Clone, Default)]
pub struct IncidenceTable {
    ann_inc: Vec<f64>,
}

impl IncidenceTable {
    pub fn new() -> Self {
        IncidenceTable::default()
    }

    /// Appends the annual incidence in the year preceding `age_yrs`.
    /// Rows must arrive in consecutive age order starting at 0, with a
    /// zero incidence at age 0 and non-negative incidences throughout.
    pub fn push(&mut self, age_yrs: u32, ann_inc: f64) -> Result<(), IncidenceError> {
        let expected = self.ann_inc.len() as u32;
        if age_yrs != expected {
            return Err(IncidenceError::NonContiguousAge {
                expected,
                found: age_yrs,
            });
        }
        if age_yrs == 0 && !ulp_eq(ann_inc, 0.0) {
            return Err(IncidenceError::NonzeroAtBirth);
        }
        if ann_inc < 0.0 {
            return Err(IncidenceError::NegativeIncidence {
                age: age_yrs,
                value: ann_inc,
            });
        }
        self.ann_inc.push(ann_inc);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ann_inc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ann_inc.is_empty()
    }

    /// Converts the table into survivor-function evaluation times
    /// (ages 0..=A as doubles) and marginal survivor values
    /// `S(a) = exp(-sum_{j<=a} h_j)`.
    pub fn to_survivor(&self) -> (Array1<f64>, Array1<f64>) {
        let times = Array1::from_iter((0..self.ann_inc.len()).map(|age| age as f64));
        let mut cum_haz = 0.0;
        let marg_surv = Array1::from_iter(self.ann_inc.iter().map(|&hazard| {
            cum_haz += hazard;
            (-cum_haz).exp()
        }));
        (times, marg_surv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn survivor_is_cumulative_hazard_exponential() {
        let mut table = IncidenceTable::new();
        let hazards = [0.0, 0.01, 0.02, 0.015, 0.0];
        for (age, &h) in hazards.iter().enumerate() {
            table.push(age as u32, h).unwrap();
        }
        let (times, marg_surv) = table.to_survivor();
        assert_eq!(times.len(), 5);
        assert_eq!(marg_surv.len(), 5);
        assert_eq!(marg_surv[0], 1.0);
        let mut cum = 0.0;
        for (age, &h) in hazards.iter().enumerate() {
            cum += h;
            assert_abs_diff_eq!(times[age], age as f64);
            assert_abs_diff_eq!(marg_surv[age], (-cum).exp(), epsilon = 1e-15);
        }
        // A zero hazard year leaves the survivor flat.
        assert_eq!(marg_surv[4], marg_surv[3]);
    }

    #[test]
    fn rejects_nonzero_incidence_at_birth() {
        let mut table = IncidenceTable::new();
        assert!(matches!(
            table.push(0, 0.001),
            Err(IncidenceError::NonzeroAtBirth)
        ));
    }

    #[test]
    fn rejects_negative_incidence() {
        let mut table = IncidenceTable::new();
        table.push(0, 0.0).unwrap();
        assert!(matches!(
            table.push(1, -0.5),
            Err(IncidenceError::NegativeIncidence { age: 1, .. })
        ));
    }

    #[test]
    fn rejects_age_gaps_and_reordering() {
        let mut table = IncidenceTable::new();
        assert!(matches!(
            table.push(1, 0.01),
            Err(IncidenceError::NonContiguousAge {
                expected: 0,
                found: 1
            })
        ));
        table.push(0, 0.0).unwrap();
        table.push(1, 0.01).unwrap();
        assert!(matches!(
            table.push(3, 0.01),
            Err(IncidenceError::NonContiguousAge {
                expected: 2,
                found: 3
            })
        ));
        assert!(matches!(
            table.push(1, 0.01),
            Err(IncidenceError::NonContiguousAge {
                expected: 2,
                found: 1
            })
        ));
    }
}
