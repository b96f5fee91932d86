//! Baseline survivor recovery.
//!
//! Under the Cox model the observed marginal survivor function satisfies
//! `S(t) = E_eta[S0(t)^exp(eta)]`, with the expectation taken over the
//! multivariant genotype distribution. For fixed t the right-hand side is
//! continuous and strictly increasing in S0(t) on (0,1), so the baseline
//! survivor value at each time is the unique root of a bracketed monotone
//! equation on [0,1]. Roots are found with Ridders' method, a regula
//! falsi scheme with guaranteed convergence and good speed properties.
//! See: Ridders C. IEEE Trans. Circuits and Systems 1979;26(11):979-80,
//! and Press et al., Numerical Recipes, 3rd ed., section 9.2.1.

use crate::distribution::GenotypeDistribution;
use crate::ulp_eq;
use ndarray::Array1;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("root is not bracketed by [{lo}, {hi}]")]
    NotBracketed { lo: f64, hi: f64 },
    #[error("root-finder did not converge within {max_eval} function evaluations")]
    MaxEvaluations { max_eval: usize },
    #[error("objective function evaluation failed")]
    Evaluation(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Error, Debug)]
pub enum BaselineError {
    #[error("failed to solve for the baseline survivor function at t = {time}")]
    Solver {
        time: f64,
        #[source]
        source: SolverError,
    },
    #[error("solved baseline survivor function is increasing as a function of time")]
    NonMonotone,
    #[error(
        "times and marginal survivor arrays differ in length ({times} vs {marg_surv})"
    )]
    LengthMismatch { times: usize, marg_surv: usize },
}

/// Raised when the root-finder proposes a baseline survivor value
/// outside [0,1]; bracketing makes this unreachable, but the objective
/// guards its domain rather than returning garbage.
#[derive(Error, Debug)]
#[error("baseline survivor function guess {0} is not in [0,1]")]
struct GuessOutOfRange(f64);

/// Finds a root of `f` on the bracketing interval `[lo, hi]` by Ridders'
/// method.
///
/// Converges when successive estimates, or the bracket width, fall within
/// `abs_acc`. At most `max_eval` evaluations of `f` are performed; errors
/// returned by `f` abort the search immediately and are propagated
/// unwrapped.
pub fn ridders<F>(
    mut f: F,
    lo: f64,
    hi: f64,
    abs_acc: f64,
    max_eval: usize,
) -> Result<f64, SolverError>
where
    F: FnMut(f64) -> Result<f64, SolverError>,
{
    let (mut xl, mut xh) = (lo, hi);
    let mut fl = f(xl)?;
    let mut fh = f(xh)?;
    let mut n_eval = 2usize;
    if fl == 0.0 {
        return Ok(xl);
    }
    if fh == 0.0 {
        return Ok(xh);
    }
    if fl.signum() == fh.signum() {
        return Err(SolverError::NotBracketed { lo, hi });
    }
    let mut ans = f64::NAN;
    while n_eval + 2 <= max_eval {
        // Evaluate at the midpoint, then apply the exponential
        // interpolation that is the heart of Ridders' method.
        let xm = 0.5 * (xl + xh);
        let fm = f(xm)?;
        n_eval += 1;
        let s = (fm * fm - fl * fh).sqrt();
        if s == 0.0 {
            return Ok(if ans.is_nan() { xm } else { ans });
        }
        let step = (xm - xl) * fm / s;
        let xnew = if fl >= fh { xm + step } else { xm - step };
        if !ans.is_nan() && (xnew - ans).abs() <= abs_acc {
            return Ok(xnew);
        }
        ans = xnew;
        let fnew = f(ans)?;
        n_eval += 1;
        if fnew == 0.0 {
            return Ok(ans);
        }
        // Re-bracket with whichever of xm, ans straddles the root.
        if fm.signum() != fnew.signum() {
            xl = xm;
            fl = fm;
            xh = ans;
            fh = fnew;
        } else if fl.signum() != fnew.signum() {
            xh = ans;
            fh = fnew;
        } else if fh.signum() != fnew.signum() {
            xl = ans;
            fl = fnew;
        } else {
            // Unreachable for continuous objectives.
            return Err(SolverError::NotBracketed { lo: xl, hi: xh });
        }
        if (xh - xl).abs() <= abs_acc {
            return Ok(ans);
        }
    }
    Err(SolverError::MaxEvaluations { max_eval })
}

/// Solves for the baseline survivor function at every
/// `(times[i], marg_surv[i])` point, given the cached genotype
/// distribution.
///
/// Marginal survivor values that are numerically 0 or 1 (within one ULP)
/// map to baseline values of exactly 0 or 1 without invoking the solver.
/// A solved value within `prob_epsilon` of its predecessor is snapped to
/// it, and the completed curve is verified to be non-increasing.
pub fn solve_baseline(
    dist: &GenotypeDistribution,
    times: &Array1<f64>,
    marg_surv: &Array1<f64>,
    prob_epsilon: f64,
    max_eval: usize,
) -> Result<Array1<f64>, BaselineError> {
    if times.len() != marg_surv.len() {
        return Err(BaselineError::LengthMismatch {
            times: times.len(),
            marg_surv: marg_surv.len(),
        });
    }
    let mut base_surv = Array1::zeros(times.len());
    for time_idx in 0..times.len() {
        let marg_surv_t = marg_surv[time_idx];
        if ulp_eq(marg_surv_t, 1.0) {
            // The marginal survivor function is 1 if and only if the
            // baseline survivor function is 1, and likewise for 0.
            base_surv[time_idx] = 1.0;
        } else if ulp_eq(marg_surv_t, 0.0) {
            base_surv[time_idx] = 0.0;
        } else {
            let objective = |s0_t: f64| -> Result<f64, SolverError> {
                if !(0.0..=1.0).contains(&s0_t) {
                    return Err(SolverError::Evaluation(Box::new(GuessOutOfRange(s0_t))));
                }
                if ulp_eq(s0_t, 0.0) {
                    Ok(-marg_surv_t)
                } else if ulp_eq(s0_t, 1.0) {
                    Ok(1.0 - marg_surv_t)
                } else {
                    Ok(dist.expected_survival(s0_t) - marg_surv_t)
                }
            };
            let mut solved = ridders(objective, 0.0, 1.0, prob_epsilon, max_eval)
                .map_err(|source| BaselineError::Solver {
                    time: times[time_idx],
                    source,
                })?;
            // A solved value indistinguishable from the previous one
            // should equal it exactly, keeping flat stretches flat.
            if time_idx > 0 && (solved - base_surv[time_idx - 1]).abs() <= prob_epsilon {
                solved = base_surv[time_idx - 1];
            }
            base_surv[time_idx] = solved;
        }
    }
    for time_idx in 1..base_surv.len() {
        if base_surv[time_idx] > base_surv[time_idx - 1] {
            return Err(BaselineError::NonMonotone);
        }
    }
    Ok(base_surv)
}
