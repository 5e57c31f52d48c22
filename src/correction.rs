//! Multiple-hypothesis-testing correction.
//!
//! [`adjust`] applies a family-wise or false-discovery-rate procedure to a
//! batch of p-values **jointly** — the caller is expected to pool every
//! p-value tested under one aggregation slice before calling. The output
//! is aligned index-for-index with the input, so per-metric rows can be
//! extracted back out losslessly.
//!
//! NaN p-values (untestable pairings) are excluded from the family: they
//! do not inflate the comparison count and come back as NaN.
//!
//! ```
//! use splitlab::correction::{adjust, CorrectionMethod};
//!
//! let adjusted = adjust(&[0.01, 0.04, 0.03, 0.005], CorrectionMethod::Holm);
//! assert!((adjusted[3] - 0.02).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};

/// Correction procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    /// Bonferroni: p·m, clipped at 1. Most conservative.
    Bonferroni,
    /// Holm step-down: controls the family-wise error rate uniformly
    /// better than Bonferroni. The default, matching the report default.
    #[default]
    Holm,
    /// Benjamini-Hochberg step-up: controls the false discovery rate.
    BenjaminiHochberg,
}

/// Adjusts a batch of p-values with the chosen method.
///
/// The result has the same length and ordering as `p_values`; NaN inputs
/// map to NaN outputs and do not count toward the family size.
pub fn adjust(p_values: &[f64], method: CorrectionMethod) -> Vec<f64> {
    let finite: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    let m = finite.len();
    let mut adjusted = vec![f64::NAN; p_values.len()];
    if m == 0 {
        return adjusted;
    }

    match method {
        CorrectionMethod::Bonferroni => {
            for &i in &finite {
                adjusted[i] = (p_values[i] * m as f64).min(1.0);
            }
        }
        CorrectionMethod::Holm => {
            // step-down: ascending p, adjusted_(k) = max_j<=k (m-j)·p_(j)
            let mut order = finite.clone();
            order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
            let mut running_max = 0.0_f64;
            for (rank, &i) in order.iter().enumerate() {
                let candidate = ((m - rank) as f64 * p_values[i]).min(1.0);
                running_max = running_max.max(candidate);
                adjusted[i] = running_max;
            }
        }
        CorrectionMethod::BenjaminiHochberg => {
            // step-up: ascending p, adjusted_(k) = min_j>=k p_(j)·m/(j+1)
            let mut order = finite.clone();
            order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
            let mut running_min = 1.0_f64;
            for (rank, &i) in order.iter().enumerate().rev() {
                let candidate = (p_values[i] * m as f64 / (rank + 1) as f64).min(1.0);
                running_min = running_min.min(candidate);
                adjusted[i] = running_min;
            }
        }
    }
    adjusted
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-12, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn bonferroni_scales_and_clips() {
        let adjusted = adjust(&[0.01, 0.3, 0.5], CorrectionMethod::Bonferroni);
        assert_close(&adjusted, &[0.03, 0.9, 1.0]);
    }

    #[test]
    fn holm_step_down_reference_values() {
        // sorted: .005 .01 .03 .04 -> 4*.005, 3*.01, 2*.03, 1*.04
        // with the running max: .02 .03 .06 .06
        let adjusted = adjust(&[0.01, 0.04, 0.03, 0.005], CorrectionMethod::Holm);
        assert_close(&adjusted, &[0.03, 0.06, 0.06, 0.02]);
    }

    #[test]
    fn holm_never_below_raw_pvalue() {
        let raw = [0.001, 0.2, 0.04, 0.9, 0.03];
        let adjusted = adjust(&raw, CorrectionMethod::Holm);
        for (a, r) in adjusted.iter().zip(raw.iter()) {
            assert!(a >= r);
        }
    }

    #[test]
    fn benjamini_hochberg_reference_values() {
        // sorted: .005 .01 .03 .04 -> .005*4/1, .01*4/2, .03*4/3, .04*4/4
        // monotone from the top: .02 .02 .04 .04
        let adjusted = adjust(&[0.01, 0.04, 0.03, 0.005], CorrectionMethod::BenjaminiHochberg);
        assert_close(&adjusted, &[0.02, 0.04, 0.04, 0.02]);
    }

    #[test]
    fn bh_no_more_conservative_than_bonferroni() {
        let raw = [0.01, 0.02, 0.04, 0.2];
        let bh = adjust(&raw, CorrectionMethod::BenjaminiHochberg);
        let bf = adjust(&raw, CorrectionMethod::Bonferroni);
        for (a, b) in bh.iter().zip(bf.iter()) {
            assert!(a <= b);
        }
    }

    #[test]
    fn nan_excluded_from_family_and_propagated() {
        let adjusted = adjust(&[0.01, f64::NAN, 0.04], CorrectionMethod::Bonferroni);
        assert!((adjusted[0] - 0.02).abs() < 1e-12); // m = 2, not 3
        assert!(adjusted[1].is_nan());
        assert!((adjusted[2] - 0.08).abs() < 1e-12);
    }

    #[test]
    fn all_nan_input() {
        let adjusted = adjust(&[f64::NAN, f64::NAN], CorrectionMethod::Holm);
        assert!(adjusted.iter().all(|p| p.is_nan()));
    }

    #[test]
    fn empty_input() {
        assert!(adjust(&[], CorrectionMethod::Holm).is_empty());
    }

    #[test]
    fn single_pvalue_unchanged() {
        for method in [
            CorrectionMethod::Bonferroni,
            CorrectionMethod::Holm,
            CorrectionMethod::BenjaminiHochberg,
        ] {
            let adjusted = adjust(&[0.037], method);
            assert_close(&adjusted, &[0.037]);
        }
    }
}
