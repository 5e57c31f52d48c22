//! Registry of hypotheses and pooled multiple-testing correction.
//!
//! The [`HypothesisManager`] maps (aggregation slice, metric name) to a
//! tested [`Hypothesis`] and computes, per aggregation, one corrected
//! table over *all* of that slice's p-values at once — correction must see
//! every metric's p-values together to control the family-wise error rate,
//! so pooling happens here rather than per hypothesis.
//!
//! The pooled table is cached lazily and dropped the moment a new
//! hypothesis is registered under the same aggregation key, so corrected
//! results can never go stale.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::aggregation::AggregationKey;
use crate::correction::{adjust, CorrectionMethod};
use crate::error::{AbError, Result};
use crate::hypothesis::Hypothesis;

/// One row of a pooled corrected table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionRow {
    /// Owning metric's name.
    pub metric: String,
    /// Combination name of the pairing.
    pub pairing: String,
    /// Raw p-value (NaN for untestable pairings).
    pub p_value: f64,
    /// Significance level the raw test used.
    pub significance_level: f64,
    /// Jointly corrected p-value (NaN propagates).
    pub corrected_p_value: f64,
    /// Corrected significance; `None` when the p-value is NaN — an
    /// untestable pairing makes no claim either way.
    pub corrected_significant: Option<bool>,
}

/// Pooled correction result for one aggregation slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionTable {
    pub method: CorrectionMethod,
    /// Rows in registration order, pairing order within each hypothesis.
    pub rows: Vec<CorrectionRow>,
}

impl CorrectionTable {
    /// Rows belonging to one metric, in that metric's own pairing order.
    pub fn metric_rows(&self, metric: &str) -> Vec<&CorrectionRow> {
        self.rows.iter().filter(|r| r.metric == metric).collect()
    }
}

#[derive(Debug)]
struct Entry {
    aggregation: AggregationKey,
    metric: String,
    hypothesis: Hypothesis,
}

/// Insertion-ordered registry of hypotheses with a per-aggregation
/// correction cache.
#[derive(Debug, Default)]
pub struct HypothesisManager {
    method: CorrectionMethod,
    entries: Vec<Entry>,
    cache: HashMap<AggregationKey, CorrectionTable>,
}

impl HypothesisManager {
    /// Creates an empty registry with the Holm correction default.
    pub fn new() -> Self {
        Self::default()
    }

    /// The correction method applied by [`get_correction`].
    ///
    /// [`get_correction`]: HypothesisManager::get_correction
    pub fn correction_method(&self) -> CorrectionMethod {
        self.method
    }

    /// Switches the correction method, dropping every cached table.
    pub fn set_correction_method(&mut self, method: CorrectionMethod) {
        if self.method != method {
            self.method = method;
            self.cache.clear();
        }
    }

    /// Registers (or overwrites) the hypothesis for an (aggregation,
    /// metric) key and invalidates that aggregation's cached correction.
    pub fn add_hypothesis(
        &mut self,
        aggregation: AggregationKey,
        metric: &str,
        hypothesis: Hypothesis,
    ) {
        self.cache.remove(&aggregation);
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.aggregation == aggregation && e.metric == metric)
        {
            entry.hypothesis = hypothesis;
            return;
        }
        debug!(
            aggregation = %aggregation.full_name(),
            metric,
            "hypothesis registered"
        );
        self.entries.push(Entry {
            aggregation,
            metric: metric.to_string(),
            hypothesis,
        });
    }

    /// The hypothesis registered under this key.
    pub fn get_hypothesis(
        &self,
        aggregation: &AggregationKey,
        metric: &str,
    ) -> Result<&Hypothesis> {
        self.entries
            .iter()
            .find(|e| &e.aggregation == aggregation && e.metric == metric)
            .map(|e| &e.hypothesis)
            .ok_or_else(|| AbError::HypothesisNotFound {
                aggregation: aggregation.full_name(),
                metric: metric.to_string(),
            })
    }

    /// Metric names registered under an aggregation, registration order.
    pub fn metrics_for(&self, aggregation: &AggregationKey) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| &e.aggregation == aggregation)
            .map(|e| e.metric.as_str())
            .collect()
    }

    /// The pooled corrected table for one aggregation slice.
    ///
    /// Computed lazily and cached; see the module docs for the
    /// invalidation rule. Errors when nothing is registered for the key.
    pub fn get_correction(&mut self, aggregation: &AggregationKey) -> Result<&CorrectionTable> {
        if !self.cache.contains_key(aggregation) {
            let table = self.compute_correction(aggregation)?;
            self.cache.insert(aggregation.clone(), table);
        }
        self.cache
            .get(aggregation)
            .ok_or_else(|| AbError::NoHypotheses {
                aggregation: aggregation.full_name(),
            })
    }

    /// Corrected p-values for one metric, keyed by its pairing names.
    pub fn get_hypothesis_corrected_pvalues(
        &mut self,
        aggregation: &AggregationKey,
        metric: &str,
    ) -> Result<Vec<(String, f64)>> {
        let table = self.get_correction(aggregation)?;
        Ok(table
            .metric_rows(metric)
            .into_iter()
            .map(|r| (r.pairing.clone(), r.corrected_p_value))
            .collect())
    }

    /// Corrected significance flags for one metric, keyed by its pairing
    /// names; `None` marks untestable pairings.
    pub fn get_hypothesis_acceptance(
        &mut self,
        aggregation: &AggregationKey,
        metric: &str,
    ) -> Result<Vec<(String, Option<bool>)>> {
        let table = self.get_correction(aggregation)?;
        Ok(table
            .metric_rows(metric)
            .into_iter()
            .map(|r| (r.pairing.clone(), r.corrected_significant))
            .collect())
    }

    fn compute_correction(&self, aggregation: &AggregationKey) -> Result<CorrectionTable> {
        let slice_entries: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| &e.aggregation == aggregation)
            .collect();
        if slice_entries.is_empty() {
            return Err(AbError::NoHypotheses {
                aggregation: aggregation.full_name(),
            });
        }

        // concatenate every hypothesis's stored rows, tagged by metric
        let mut metrics = Vec::new();
        let mut pairings = Vec::new();
        let mut p_values = Vec::new();
        let mut levels = Vec::new();
        for entry in &slice_entries {
            let Some(report) = entry.hypothesis.get_test() else {
                continue;
            };
            let t = report.transposed();
            for i in 0..t.pairings.len() {
                metrics.push(entry.metric.clone());
                pairings.push(t.pairings[i].clone());
                p_values.push(t.p_values[i]);
                levels.push(t.significance_levels[i]);
            }
        }

        let corrected = adjust(&p_values, self.method);
        let rows = (0..p_values.len())
            .map(|i| CorrectionRow {
                metric: metrics[i].clone(),
                pairing: pairings[i].clone(),
                p_value: p_values[i],
                significance_level: levels[i],
                corrected_p_value: corrected[i],
                corrected_significant: if corrected[i].is_nan() {
                    None
                } else {
                    Some(corrected[i] < levels[i])
                },
            })
            .collect();

        debug!(
            aggregation = %aggregation.full_name(),
            hypotheses = slice_entries.len(),
            "pooled correction computed"
        );
        Ok(CorrectionTable {
            method: self.method,
            rows,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::hypothesis::{GroupPairing, HypothesisConfig, StatTest};
    use crate::metric::{CalcOptions, Metric, MetricSpec, Reduction};

    fn tested_hypothesis(name: &str, counts: &[(&str, f64, f64)]) -> Hypothesis {
        let mut f = Frame::new();
        let groups: Vec<&str> = counts.iter().map(|(g, _, _)| *g).collect();
        f.add_label("group", &groups).unwrap();
        f.add_numeric("nom", counts.iter().map(|(_, n, _)| *n).collect()).unwrap();
        f.add_numeric("den", counts.iter().map(|(_, _, d)| *d).collect()).unwrap();
        let mut m = Metric::new(MetricSpec::ratio(name, "nom", "den", Reduction::Sum), f);
        m.append_grouping(&["group".into()]);
        let output = m.calc(CalcOptions::new()).unwrap();

        let pairings = counts
            .iter()
            .skip(1)
            .map(|(g, _, _)| GroupPairing::new("A", g))
            .collect();
        let mut h = Hypothesis::new(name, HypothesisConfig::new(StatTest::ChiSquare), "group", pairings);
        h.test(&output, true).unwrap();
        h
    }

    fn two_metric_manager() -> HypothesisManager {
        let mut hm = HypothesisManager::new();
        hm.add_hypothesis(
            AggregationKey::Whole,
            "conversion",
            tested_hypothesis(
                "conversion",
                &[("A", 50.0, 1000.0), ("B", 80.0, 1000.0), ("C", 40.0, 1000.0)],
            ),
        );
        hm.add_hypothesis(
            AggregationKey::Whole,
            "retention",
            tested_hypothesis(
                "retention",
                &[("A", 300.0, 1000.0), ("B", 330.0, 1000.0), ("C", 290.0, 1000.0)],
            ),
        );
        hm
    }

    #[test]
    fn correction_pools_across_metrics() {
        let mut hm = two_metric_manager();
        let table = hm.get_correction(&AggregationKey::Whole).unwrap().clone();
        assert_eq!(table.rows.len(), 4);

        // jointly corrected values must match a direct adjust() over the
        // concatenated p column, row for row
        let raw: Vec<f64> = table.rows.iter().map(|r| r.p_value).collect();
        let expected = adjust(&raw, CorrectionMethod::Holm);
        for (row, e) in table.rows.iter().zip(expected) {
            assert!((row.corrected_p_value - e).abs() < 1e-12);
            assert_eq!(
                row.corrected_significant,
                Some(e < row.significance_level)
            );
        }
    }

    #[test]
    fn metric_rows_slice_back_out_losslessly() {
        let mut hm = two_metric_manager();
        let pvalues = hm
            .get_hypothesis_corrected_pvalues(&AggregationKey::Whole, "retention")
            .unwrap();
        assert_eq!(pvalues.len(), 2);
        assert_eq!(pvalues[0].0, "B-A");
        assert_eq!(pvalues[1].0, "C-A");

        let table = hm.get_correction(&AggregationKey::Whole).unwrap();
        let direct: Vec<f64> = table
            .metric_rows("retention")
            .iter()
            .map(|r| r.corrected_p_value)
            .collect();
        assert_eq!(pvalues[0].1, direct[0]);
        assert_eq!(pvalues[1].1, direct[1]);
    }

    #[test]
    fn cache_invalidated_by_new_registration() {
        let mut hm = two_metric_manager();
        assert_eq!(hm.get_correction(&AggregationKey::Whole).unwrap().rows.len(), 4);

        hm.add_hypothesis(
            AggregationKey::Whole,
            "basket",
            tested_hypothesis("basket", &[("A", 120.0, 900.0), ("B", 150.0, 900.0)]),
        );
        // stale table must not be returned: row count reflects the new metric
        assert_eq!(hm.get_correction(&AggregationKey::Whole).unwrap().rows.len(), 5);
    }

    #[test]
    fn overwriting_a_key_replaces_not_duplicates() {
        let mut hm = two_metric_manager();
        hm.add_hypothesis(
            AggregationKey::Whole,
            "conversion",
            tested_hypothesis("conversion", &[("A", 10.0, 100.0), ("B", 20.0, 100.0)]),
        );
        let table = hm.get_correction(&AggregationKey::Whole).unwrap();
        assert_eq!(table.metric_rows("conversion").len(), 1);
        assert_eq!(table.rows.len(), 3);
    }

    #[test]
    fn empty_aggregation_is_fatal() {
        let mut hm = two_metric_manager();
        let missing = AggregationKey::Dimension {
            column: "platform".into(),
            value: "ios".into(),
        };
        assert!(matches!(
            hm.get_correction(&missing),
            Err(AbError::NoHypotheses { .. })
        ));
        assert!(matches!(
            hm.get_hypothesis(&missing, "conversion"),
            Err(AbError::HypothesisNotFound { .. })
        ));
    }

    #[test]
    fn nan_pvalues_survive_pooling_as_none() {
        let mut hm = HypothesisManager::new();
        hm.add_hypothesis(
            AggregationKey::Whole,
            "broken",
            tested_hypothesis("broken", &[("A", 0.0, 1000.0), ("B", 10.0, 1000.0)]),
        );
        hm.add_hypothesis(
            AggregationKey::Whole,
            "fine",
            tested_hypothesis("fine", &[("A", 50.0, 1000.0), ("B", 80.0, 1000.0)]),
        );
        let table = hm.get_correction(&AggregationKey::Whole).unwrap();
        let broken = &table.metric_rows("broken")[0];
        assert!(broken.corrected_p_value.is_nan());
        assert_eq!(broken.corrected_significant, None);
        // the NaN row does not widen the family: m = 1 here
        let fine = &table.metric_rows("fine")[0];
        assert!((fine.corrected_p_value - fine.p_value).abs() < 1e-12);
    }

    #[test]
    fn changing_method_recomputes() {
        let mut hm = two_metric_manager();
        let holm: Vec<f64> = hm
            .get_correction(&AggregationKey::Whole)
            .unwrap()
            .rows
            .iter()
            .map(|r| r.corrected_p_value)
            .collect();
        hm.set_correction_method(CorrectionMethod::Bonferroni);
        let bonf: Vec<f64> = hm
            .get_correction(&AggregationKey::Whole)
            .unwrap()
            .rows
            .iter()
            .map(|r| r.corrected_p_value)
            .collect();
        assert_ne!(holm, bonf);
    }
}
