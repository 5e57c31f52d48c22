//! Two-sample hypothesis testing between a control and its treatment arms.
//!
//! A [`Hypothesis`] binds a statistical test kind to a set of
//! (control, test) [`GroupPairing`]s and evaluates them against a metric
//! output table: the chi-square proportions test over ratio metrics, or
//! Student's / Welch's t-test over continuous metrics.
//!
//! Untestable pairings never abort a run. A pairing whose test group is
//! absent from the table is skipped outright (no record); a pairing with
//! zero counts (chi-square) or a single-observation arm (t-test) is
//! recorded as [`Outcome::Insufficient`] with a NaN p-value, a `false`
//! significance flag, and a warn-level diagnostic naming the hypothesis,
//! the pairing, and the reason.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};
use tracing::{debug, warn};

use crate::error::{AbError, Result};
use crate::metric::{MetricOutput, MetricRow, RowData};

/// Default significance level (α).
pub const DEFAULT_SIGNIFICANCE_LEVEL: f64 = 0.05;

// ── Configuration ─────────────────────────────────────────────────────

/// Statistical test family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatTest {
    /// Two-sample chi-square test of proportions (ratio metrics).
    #[serde(rename = "chisquare")]
    ChiSquare,
    /// Two-sample t-test with pooled variance (continuous metrics).
    #[serde(rename = "ttest")]
    TTest,
    /// Welch's t-test, no equal-variance assumption (continuous metrics).
    #[serde(rename = "ttest_welsh")]
    WelchTTest,
}

impl StatTest {
    /// Equal-variance assumption of the t-test family; exact kind match.
    pub fn equal_var(self) -> bool {
        self == Self::TTest
    }
}

/// Enumerated hypothesis configuration, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HypothesisConfig {
    pub stat_test: StatTest,
    pub significance_level: f64,
}

impl HypothesisConfig {
    /// Configuration with the default significance level.
    pub fn new(stat_test: StatTest) -> Self {
        Self {
            stat_test,
            significance_level: DEFAULT_SIGNIFICANCE_LEVEL,
        }
    }

    /// Sets the significance level (α).
    pub fn with_significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = alpha;
        self
    }
}

/// One (control, test) group pair to compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPairing {
    /// Combination name, conventionally `"<test>-<control>"`.
    pub name: String,
    pub control: String,
    pub test: String,
}

impl GroupPairing {
    /// Builds a pairing with the conventional `"<test>-<control>"` name.
    pub fn new(control: &str, test: &str) -> Self {
        Self {
            name: format!("{test}-{control}"),
            control: control.to_string(),
            test: test.to_string(),
        }
    }
}

// ── Results ───────────────────────────────────────────────────────────

/// Outcome of testing one pairing.
///
/// Pairings whose test group is absent from the data slice produce no
/// outcome at all; this enum only distinguishes "tested" from "recorded
/// but untestable".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Outcome {
    /// The test ran.
    Tested {
        p_value: f64,
        control_value: f64,
        test_value: f64,
        significant: bool,
    },
    /// Too little data to run the test; p-value is NaN and the pairing is
    /// never flagged significant.
    Insufficient {
        control_value: f64,
        test_value: f64,
        reason: String,
    },
}

impl Outcome {
    /// P-value; NaN for insufficient data.
    pub fn p_value(&self) -> f64 {
        match self {
            Self::Tested { p_value, .. } => *p_value,
            Self::Insufficient { .. } => f64::NAN,
        }
    }

    /// Significance flag; always `false` for insufficient data (no claim
    /// of significance without evidence).
    pub fn significant(&self) -> bool {
        match self {
            Self::Tested { significant, .. } => *significant,
            Self::Insufficient { .. } => false,
        }
    }

    /// Control-arm metric value (NaN when unavailable).
    pub fn control_value(&self) -> f64 {
        match self {
            Self::Tested { control_value, .. } | Self::Insufficient { control_value, .. } => {
                *control_value
            }
        }
    }

    /// Test-arm metric value (NaN when unavailable).
    pub fn test_value(&self) -> f64 {
        match self {
            Self::Tested { test_value, .. } | Self::Insufficient { test_value, .. } => *test_value,
        }
    }
}

/// Result row for one evaluated pairing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairingResult {
    pub pairing: String,
    pub significance_level: f64,
    pub outcome: Outcome,
}

/// Ordered per-pairing results of one `test()` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TestReport {
    rows: Vec<PairingResult>,
}

impl TestReport {
    /// Result rows in pairing order.
    pub fn rows(&self) -> &[PairingResult] {
        &self.rows
    }

    /// Returns `true` when no pairing produced a record.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up a pairing's result by combination name.
    pub fn get(&self, pairing: &str) -> Option<&PairingResult> {
        self.rows.iter().find(|r| r.pairing == pairing)
    }

    /// Transposed orientation: rows (p-value, significance level,
    /// significance) by pairing columns. Downstream joining and correction
    /// pooling consume this view.
    pub fn transposed(&self) -> TransposedReport {
        TransposedReport {
            pairings: self.rows.iter().map(|r| r.pairing.clone()).collect(),
            p_values: self.rows.iter().map(|r| r.outcome.p_value()).collect(),
            significance_levels: self.rows.iter().map(|r| r.significance_level).collect(),
            significant: self.rows.iter().map(|r| r.outcome.significant()).collect(),
        }
    }
}

/// Column-per-pairing view of a [`TestReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransposedReport {
    pub pairings: Vec<String>,
    pub p_values: Vec<f64>,
    pub significance_levels: Vec<f64>,
    pub significant: Vec<bool>,
}

// ── Hypothesis ────────────────────────────────────────────────────────

/// A named hypothesis: test kind + significance level + group pairings.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    name: String,
    config: HypothesisConfig,
    group_col: String,
    pairings: Vec<GroupPairing>,
    stored: Option<TestReport>,
}

impl Hypothesis {
    /// Creates a hypothesis over the given pairings.
    pub fn new(
        name: &str,
        config: HypothesisConfig,
        group_col: &str,
        pairings: Vec<GroupPairing>,
    ) -> Self {
        Self {
            name: name.to_string(),
            config,
            group_col: group_col.to_string(),
            pairings,
            stored: None,
        }
    }

    /// Hypothesis name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Test configuration.
    pub fn config(&self) -> &HypothesisConfig {
        &self.config
    }

    /// Configured pairings.
    pub fn pairings(&self) -> &[GroupPairing] {
        &self.pairings
    }

    /// Runs the configured test for every pairing and stores the report
    /// when `save_testing` is true (the default across the crate).
    pub fn test(&mut self, output: &MetricOutput, save_testing: bool) -> Result<TestReport> {
        let report = self.evaluate(output)?;
        if save_testing {
            self.stored = Some(report.clone());
        }
        Ok(report)
    }

    /// Runs the configured test without touching the stored report; used
    /// for exploratory re-testing over time windows.
    pub fn evaluate(&self, output: &MetricOutput) -> Result<TestReport> {
        if self.pairings.is_empty() {
            return Err(AbError::NoPairings {
                hypothesis: self.name.clone(),
            });
        }
        let level = output.level_index(&self.group_col)?;

        // one control lookup per distinct control name, shared by every
        // pairing against that control
        let mut control_rows: HashMap<&str, Option<&MetricRow>> = HashMap::new();
        for pairing in &self.pairings {
            control_rows
                .entry(pairing.control.as_str())
                .or_insert_with(|| output.row_matching(level, &pairing.control));
        }

        let mut rows = Vec::new();
        for pairing in &self.pairings {
            let Some(control_row) = control_rows[pairing.control.as_str()] else {
                warn!(
                    hypothesis = %self.name,
                    pairing = %pairing.name,
                    control = %pairing.control,
                    "control group absent from metric output; pairing skipped"
                );
                continue;
            };
            let Some(test_row) = output.row_matching(level, &pairing.test) else {
                debug!(
                    hypothesis = %self.name,
                    pairing = %pairing.name,
                    test_group = %pairing.test,
                    "test group absent from metric output; pairing skipped"
                );
                continue;
            };

            let outcome = match self.config.stat_test {
                StatTest::ChiSquare => self.chisquare_outcome(pairing, control_row, test_row)?,
                StatTest::TTest | StatTest::WelchTTest => {
                    self.ttest_outcome(pairing, control_row, test_row)?
                }
            };
            rows.push(PairingResult {
                pairing: pairing.name.clone(),
                significance_level: self.config.significance_level,
                outcome,
            });
        }

        Ok(TestReport { rows })
    }

    /// The report stored by the last saving `test()` call.
    pub fn get_test(&self) -> Option<&TestReport> {
        self.stored.as_ref()
    }

    // ── test paths ───────────────────────────────────────────────

    fn chisquare_outcome(
        &self,
        pairing: &GroupPairing,
        control: &MetricRow,
        test: &MetricRow,
    ) -> Result<Outcome> {
        let (RowData::Ratio {
            nominator: c_nom,
            denominator: c_den,
            ratio: c_ratio,
        }, RowData::Ratio {
            nominator: t_nom,
            denominator: t_den,
            ratio: t_ratio,
        }) = (&control.data, &test.data)
        else {
            return Err(AbError::TestKindMismatch {
                hypothesis: self.name.clone(),
                expected: "ratio",
            });
        };

        // zero trials or zero successes on either arm: the test is not
        // attempted at all
        if *c_nom <= 0.0 || *c_den <= 0.0 || *t_nom <= 0.0 || *t_den <= 0.0 {
            warn!(
                hypothesis = %self.name,
                pairing = %pairing.name,
                control_counts = %format!("{c_nom}/{c_den}"),
                test_counts = %format!("{t_nom}/{t_den}"),
                "chi-square skipped: zero counts"
            );
            return Ok(Outcome::Insufficient {
                control_value: *c_ratio,
                test_value: *t_ratio,
                reason: "zero counts".to_string(),
            });
        }

        match proportions_chisquare_pvalue(*c_nom, *c_den, *t_nom, *t_den)? {
            Some(p_value) => Ok(Outcome::Tested {
                p_value,
                control_value: *c_ratio,
                test_value: *t_ratio,
                significant: p_value < self.config.significance_level,
            }),
            None => {
                warn!(
                    hypothesis = %self.name,
                    pairing = %pairing.name,
                    "chi-square skipped: degenerate contingency table"
                );
                Ok(Outcome::Insufficient {
                    control_value: *c_ratio,
                    test_value: *t_ratio,
                    reason: "degenerate contingency table".to_string(),
                })
            }
        }
    }

    fn ttest_outcome(
        &self,
        pairing: &GroupPairing,
        control: &MetricRow,
        test: &MetricRow,
    ) -> Result<Outcome> {
        let (RowData::Continuous {
            samples: c_samples, ..
        }, RowData::Continuous {
            samples: t_samples, ..
        }) = (&control.data, &test.data)
        else {
            return Err(AbError::TestKindMismatch {
                hypothesis: self.name.clone(),
                expected: "continuous",
            });
        };

        if c_samples.len() <= 1 || t_samples.len() <= 1 {
            // recorded, unlike a missing group: NaN p-value and means,
            // significance explicitly false
            warn!(
                hypothesis = %self.name,
                pairing = %pairing.name,
                control_n = c_samples.len(),
                test_n = t_samples.len(),
                "t-test skipped: fewer than two observations in an arm"
            );
            return Ok(Outcome::Insufficient {
                control_value: f64::NAN,
                test_value: f64::NAN,
                reason: "fewer than two observations".to_string(),
            });
        }

        let (p_value, c_mean, t_mean) =
            ttest_ind_pvalue(c_samples, t_samples, self.config.stat_test.equal_var())?;
        Ok(Outcome::Tested {
            p_value,
            control_value: c_mean,
            test_value: t_mean,
            significant: p_value < self.config.significance_level,
        })
    }
}

// ── Statistical routines ──────────────────────────────────────────────

/// Two-sample chi-square test of proportions over a 2×2 contingency table
/// (successes vs. failures per arm), Pearson statistic without continuity
/// correction, df = 1.
///
/// Returns `None` when the pooled proportion is 0 or 1 (an expected cell
/// is zero, so the statistic is undefined).
fn proportions_chisquare_pvalue(
    c_nom: f64,
    c_den: f64,
    t_nom: f64,
    t_den: f64,
) -> Result<Option<f64>> {
    let observed = [
        [c_nom, c_den - c_nom],
        [t_nom, t_den - t_nom],
    ];
    let total = c_den + t_den;
    let col_success = c_nom + t_nom;
    let col_failure = total - col_success;

    let mut statistic = 0.0;
    for (row, &row_total) in observed.iter().zip([c_den, t_den].iter()) {
        for (cell, col_total) in row.iter().zip([col_success, col_failure]) {
            let expected = row_total * col_total / total;
            if expected <= 0.0 {
                return Ok(None);
            }
            statistic += (cell - expected).powi(2) / expected;
        }
    }

    let dist = ChiSquared::new(1.0).map_err(|e| AbError::Stat(e.to_string()))?;
    Ok(Some(1.0 - dist.cdf(statistic)))
}

/// Independent two-sample t-test; `equal_var` selects pooled variance
/// (Student) vs. Welch-Satterthwaite. Returns (two-sided p, mean1, mean2).
///
/// Callers guarantee both samples have at least two observations.
fn ttest_ind_pvalue(sample1: &[f64], sample2: &[f64], equal_var: bool) -> Result<(f64, f64, f64)> {
    let n1 = sample1.len() as f64;
    let n2 = sample2.len() as f64;
    let mean1 = sample1.iter().sum::<f64>() / n1;
    let mean2 = sample2.iter().sum::<f64>() / n2;
    let var1 = sample1.iter().map(|&x| (x - mean1).powi(2)).sum::<f64>() / (n1 - 1.0);
    let var2 = sample2.iter().map(|&x| (x - mean2).powi(2)).sum::<f64>() / (n2 - 1.0);

    let (t, df) = if equal_var {
        let pooled = ((n1 - 1.0) * var1 + (n2 - 1.0) * var2) / (n1 + n2 - 2.0);
        let se = (pooled * (1.0 / n1 + 1.0 / n2)).sqrt();
        ((mean1 - mean2) / se, n1 + n2 - 2.0)
    } else {
        let se = (var1 / n1 + var2 / n2).sqrt();
        let t = (mean1 - mean2) / se;
        let df = (var1 / n1 + var2 / n2).powi(2)
            / ((var1 / n1).powi(2) / (n1 - 1.0) + (var2 / n2).powi(2) / (n2 - 1.0));
        (t, df)
    };

    // identical zero-variance arms give t = 0/0 = NaN; the NaN p-value
    // propagates and the pairing is never significant
    if t.is_nan() || !df.is_finite() || df <= 0.0 {
        return Ok((f64::NAN, mean1, mean2));
    }
    let dist = StudentsT::new(0.0, 1.0, df).map_err(|e| AbError::Stat(e.to_string()))?;
    let p = 2.0 * (1.0 - dist.cdf(t.abs()));
    Ok((p, mean1, mean2))
}

// ── Tests ─────────────────────────────────────────────────────────────
