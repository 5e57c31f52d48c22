//! Time-sliced views of a metric: per-period values and cumulative
//! p-value trajectories.
//!
//! Both helpers slice by a label column holding the period of each row
//! (a date string, a week number). Periods are taken in sorted label
//! order, which lines up with ISO dates. [`period_series`] computes the
//! metric independently inside each period; [`pvalue_series`] re-runs a
//! hypothesis on each growing prefix of periods, showing how the p-value
//! settles as data accumulates.

use crate::error::Result;
use crate::hypothesis::Hypothesis;
use crate::metric::{CalcOptions, Metric};

/// One (group, period) metric value.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub group: String,
    pub period: String,
    pub value: f64,
}

/// One pairing's p-value over the data up to and including `period`.
#[derive(Debug, Clone, PartialEq)]
pub struct PValuePoint {
    pub pairing: String,
    pub period: String,
    pub p_value: f64,
}

fn sorted_periods(metric: &Metric, time_col: &str) -> Result<Vec<String>> {
    let mut periods = metric.frame().distinct_labels(time_col)?;
    periods.sort();
    Ok(periods)
}

/// Metric value per group inside each period, one independent calculation
/// per period. The metric itself is untouched; each point comes from a
/// masked copy.
pub fn period_series(metric: &Metric, time_col: &str) -> Result<Vec<SeriesPoint>> {
    let mut points = Vec::new();
    for period in sorted_periods(metric, time_col)? {
        let mask = metric.frame().label_eq_mask(time_col, &period)?;
        let mut windowed = metric.clone();
        let output = windowed.calc(CalcOptions::new().with_mask(mask))?;
        for row in output.rows() {
            points.push(SeriesPoint {
                group: row.label(),
                period: period.clone(),
                value: row.data.metric_value(),
            });
        }
    }
    Ok(points)
}

/// Hypothesis p-values over cumulative period windows.
///
/// Window `k` covers the first `k` sorted periods; each window yields one
/// point per pairing the hypothesis could evaluate there. Insufficient
/// windows surface as NaN points rather than gaps so the trajectory keeps
/// one entry per (pairing, period).
pub fn pvalue_series(
    metric: &Metric,
    hypothesis: &Hypothesis,
    time_col: &str,
) -> Result<Vec<PValuePoint>> {
    let periods = sorted_periods(metric, time_col)?;
    let mut points = Vec::new();
    for k in 1..=periods.len() {
        let window = &periods[..k];
        let mask = metric.frame().label_in_mask(time_col, window)?;
        let mut windowed = metric.clone();
        let output = windowed.calc(CalcOptions::new().with_mask(mask))?;
        let report = hypothesis.evaluate(&output)?;
        for row in report.rows() {
            points.push(PValuePoint {
                pairing: row.pairing.clone(),
                period: periods[k - 1].clone(),
                p_value: row.outcome.p_value(),
            });
        }
    }
    Ok(points)
}

// ── Tests ─────────────────────────────────────────────────────────────
