//! Experiment session: the top-level coordinator of an A/B test analysis.
//!
//! A session owns the experiment frame and its configuration (group, time
//! and unit-id columns, control group, significance level, aggregation
//! dimensions). It resolves the control group, derives the test-vs-control
//! pairings, enumerates aggregation slices, and runs metric requests
//! across all of them, registering each tested metric with the
//! [`HypothesisManager`] so corrected p-values pool per slice.
//!
//! ```
//! use splitlab::frame::Frame;
//! use splitlab::hypothesis::StatTest;
//! use splitlab::metric::{MetricSpec, Reduction};
//! use splitlab::session::{ExperimentSession, MetricRequest, SessionConfig};
//!
//! let mut frame = Frame::new();
//! frame.add_label("user_id", &["u1", "u2", "u3", "u4"]).unwrap();
//! frame.add_label("grp", &["A", "A", "B", "B"]).unwrap();
//! frame.add_label("day", &["d1", "d1", "d1", "d1"]).unwrap();
//! frame.add_numeric("converted", vec![1.0, 0.0, 1.0, 1.0]).unwrap();
//! frame.add_numeric("visited", vec![1.0; 4]).unwrap();
//!
//! let config = SessionConfig::new("checkout", "grp", "day", "user_id");
//! let mut session = ExperimentSession::new(config, frame).unwrap();
//! assert_eq!(session.control(), "A");
//!
//! let spec = MetricSpec::ratio("conversion", "converted", "visited",
//!     Reduction::UnitPresence).with_unit_col("user_id");
//! session
//!     .calc_metric(MetricRequest::new(spec).with_test(StatTest::ChiSquare))
//!     .unwrap();
//! let report = session.report().unwrap();
//! assert_eq!(report.sheets[0].name, "_all");
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::aggregation::{Aggregation, AggregationKey};
use crate::error::{AbError, Result};
use crate::frame::{Frame, Mask};
use crate::hypothesis::{
    GroupPairing, Hypothesis, HypothesisConfig, StatTest, TransposedReport,
    DEFAULT_SIGNIFICANCE_LEVEL,
};
use crate::manager::HypothesisManager;
use crate::metric::{quantile, CalcOptions, Metric, MetricSpec};
use crate::report::{correction_block, metrics_block, ReportDocument, Sheet};

/// Group names probed, in order, when no control group is configured.
pub const DEFAULT_GROUP_NAMES: [&str; 5] = ["A", "a", "0", "1", "first"];

// ── Configuration ─────────────────────────────────────────────────────

/// Static description of an experiment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Experiment name, shown in the report info block.
    pub name: String,
    /// Label column holding the experiment arm of each row.
    pub group_col: String,
    /// Label column holding the observation period of each row.
    pub time_col: String,
    /// Label column identifying the randomization unit.
    pub unit_col: String,
    /// Control arm name; when `None` the default names are probed.
    pub control: Option<String>,
    /// Significance level applied to every hypothesis.
    pub significance_level: f64,
    /// Dimension columns to slice by (`"*"` means the whole dataset).
    pub dimensions: Vec<String>,
}

impl SessionConfig {
    pub fn new(name: &str, group_col: &str, time_col: &str, unit_col: &str) -> Self {
        Self {
            name: name.to_string(),
            group_col: group_col.to_string(),
            time_col: time_col.to_string(),
            unit_col: unit_col.to_string(),
            control: None,
            significance_level: DEFAULT_SIGNIFICANCE_LEVEL,
            dimensions: Vec::new(),
        }
    }

    /// Sets an explicit control arm name.
    pub fn with_control(mut self, control: &str) -> Self {
        self.control = Some(control.to_string());
        self
    }

    pub fn with_significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = alpha;
        self
    }

    /// Sets the aggregation dimensions.
    pub fn with_dimensions(mut self, dimensions: &[&str]) -> Self {
        self.dimensions = dimensions.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// One metric to compute across aggregation slices.
#[derive(Debug, Clone)]
pub struct MetricRequest {
    spec: MetricSpec,
    mask: Option<Mask>,
    stat_test: Option<StatTest>,
    remove_outliers: bool,
    aggregations: Option<Vec<AggregationKey>>,
}

impl MetricRequest {
    pub fn new(spec: MetricSpec) -> Self {
        Self {
            spec,
            mask: None,
            stat_test: None,
            remove_outliers: true,
            aggregations: None,
        }
    }

    /// Restricts the metric to rows selected by `mask` (on top of the
    /// aggregation slice).
    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Attaches a hypothesis test; tested metrics join the per-slice
    /// correction family.
    pub fn with_test(mut self, stat_test: StatTest) -> Self {
        self.stat_test = Some(stat_test);
        self
    }

    /// Disables outlier trimming for this request.
    pub fn keep_outliers(mut self) -> Self {
        self.remove_outliers = false;
        self
    }

    /// Restricts the request to the named slices; every other slice is
    /// left without results for this metric.
    pub fn with_aggregations(mut self, keys: &[AggregationKey]) -> Self {
        self.aggregations = Some(keys.to_vec());
        self
    }
}

// ── Validation ────────────────────────────────────────────────────────

/// Summary statistics for one numeric column within one arm.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub column: String,
    /// Non-null observations.
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; NaN below two observations.
    pub std: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

/// Row and unit counts plus per-column summaries for one arm.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStat {
    pub group: String,
    pub rows: usize,
    pub units: usize,
    /// One summary per numeric column, in frame column order.
    pub summaries: Vec<ColumnSummary>,
}

/// Randomization QA summary for one aggregation slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub aggregation: String,
    /// Per-arm counts, sorted by arm name.
    pub group_stats: Vec<GroupStat>,
    /// `(distinct arms seen, number of units)`; any entry with more than
    /// one arm marks units exposed to several arms.
    pub units_by_group_count: Vec<(usize, usize)>,
}

impl ValidationReport {
    /// Units that appeared in more than one arm.
    pub fn contaminated_units(&self) -> usize {
        self.units_by_group_count
            .iter()
            .filter(|(arms, _)| *arms > 1)
            .map(|(_, units)| units)
            .sum()
    }
}

/// The stored report's transposed view, or NaN columns over the
/// configured pairings when every pairing was skipped. The report keeps
/// one p-value column per pairing either way.
fn transposed_or_nan(hypothesis: &Hypothesis) -> TransposedReport {
    match hypothesis.get_test() {
        Some(report) if !report.is_empty() => report.transposed(),
        _ => {
            let pairings: Vec<String> = hypothesis
                .pairings()
                .iter()
                .map(|p| p.name.clone())
                .collect();
            let n = pairings.len();
            TransposedReport {
                pairings,
                p_values: vec![f64::NAN; n],
                significance_levels: vec![hypothesis.config().significance_level; n],
                significant: vec![false; n],
            }
        }
    }
}

fn column_summary(column: &str, values: &[f64]) -> ColumnSummary {
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let std = if count > 1 {
        (values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
    } else {
        f64::NAN
    };
    ColumnSummary {
        column: column.to_string(),
        count,
        mean,
        std,
        min: values.iter().copied().fold(f64::NAN, f64::min),
        q1: quantile(values, 0.25),
        median: quantile(values, 0.5),
        q3: quantile(values, 0.75),
        max: values.iter().copied().fold(f64::NAN, f64::max),
    }
}

// ── Session ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct SessionEntry {
    key: AggregationKey,
    metric: Metric,
}

/// Coordinates metrics, hypotheses, and reporting for one experiment.
#[derive(Debug)]
pub struct ExperimentSession {
    config: SessionConfig,
    frame: Frame,
    control: String,
    groups: Vec<String>,
    pairings: Vec<GroupPairing>,
    aggregations: Vec<Aggregation>,
    manager: HypothesisManager,
    results: Vec<SessionEntry>,
}

impl ExperimentSession {
    /// Builds a session over `frame`, resolving the control arm.
    ///
    /// An explicit control name must exist in the group column; without
    /// one, [`DEFAULT_GROUP_NAMES`] are probed in order. Either way a
    /// missing control is [`AbError::ControlGroupUndefined`].
    pub fn new(config: SessionConfig, frame: Frame) -> Result<Self> {
        let mut groups = frame.distinct_labels(&config.group_col)?;
        groups.sort();

        let control = match &config.control {
            Some(name) => {
                if !groups.iter().any(|g| g == name) {
                    return Err(AbError::ControlGroupUndefined);
                }
                name.clone()
            }
            None => DEFAULT_GROUP_NAMES
                .iter()
                .find(|candidate| groups.iter().any(|g| g == *candidate))
                .map(|c| c.to_string())
                .ok_or(AbError::ControlGroupUndefined)?,
        };
        debug!(control = %control, groups = groups.len(), "control group resolved");

        let pairings = groups
            .iter()
            .filter(|g| **g != control)
            .map(|g| GroupPairing::new(&control, g))
            .collect();

        let aggregations = Aggregation::enumerate(&frame, &config.dimensions)?;

        Ok(Self {
            config,
            frame,
            control,
            groups,
            pairings,
            aggregations,
            manager: HypothesisManager::new(),
            results: Vec::new(),
        })
    }

    /// Resolved control arm name.
    pub fn control(&self) -> &str {
        &self.control
    }

    /// Distinct arm names, sorted.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Derived test-vs-control pairings.
    pub fn pairings(&self) -> &[GroupPairing] {
        &self.pairings
    }

    /// Aggregation slices this session computes over.
    pub fn aggregations(&self) -> &[Aggregation] {
        &self.aggregations
    }

    /// The hypothesis manager, for correction lookups.
    pub fn manager(&mut self) -> &mut HypothesisManager {
        &mut self.manager
    }

    /// Computes a metric over the session's aggregation slices (all of
    /// them, or the subset the request names).
    ///
    /// Each slice gets its own [`Metric`] over the full frame with the
    /// slice mask (and the request's extra mask) applied, grouped by the
    /// arm column, with the control arm as uplift reference. When the
    /// request carries a test, the hypothesis runs and is registered with
    /// the manager under the slice's key.
    pub fn calc_metric(&mut self, request: MetricRequest) -> Result<()> {
        for aggregation in self.aggregations.clone() {
            if let Some(keys) = &request.aggregations {
                if !keys.contains(aggregation.key()) {
                    continue;
                }
            }
            let mut metric = Metric::new(request.spec.clone(), self.frame.clone());
            if let Some(mask) = aggregation.mask(&self.frame)? {
                metric.append_mask(mask)?;
            }
            if let Some(mask) = &request.mask {
                metric.append_mask(mask.clone())?;
            }
            metric.append_grouping(&[self.config.group_col.clone()]);
            metric.set_relation_value(&self.control);

            let mut opts = CalcOptions::new();
            opts.remove_outliers = request.remove_outliers;
            let output = metric.calc(opts)?;

            if let Some(stat_test) = request.stat_test {
                let config = HypothesisConfig::new(stat_test)
                    .with_significance_level(self.config.significance_level);
                let mut hypothesis = Hypothesis::new(
                    metric.name(),
                    config,
                    &self.config.group_col,
                    self.pairings.clone(),
                );
                hypothesis.test(&output, true)?;
                self.manager
                    .add_hypothesis(aggregation.key().clone(), metric.name(), hypothesis);
            }

            self.results.push(SessionEntry {
                key: aggregation.key().clone(),
                metric,
            });
        }
        Ok(())
    }

    /// Info block rows for the report: name, period, arm count, unit
    /// count, significance level.
    pub fn info(&self) -> Result<Vec<String>> {
        let mut periods = self.frame.distinct_labels(&self.config.time_col)?;
        periods.sort();
        let period = match (periods.first(), periods.last()) {
            (Some(first), Some(last)) => format!("{first} - {last}"),
            _ => String::new(),
        };
        let units = self.frame.distinct_labels(&self.config.unit_col)?.len();

        Ok(vec![
            format!("AB test name: {}", self.config.name),
            format!("Period: {period}"),
            format!("Number of groups: {}", self.groups.len()),
            format!("Unique ids: {units}"),
            format!("Significance level: {}", self.config.significance_level),
        ])
    }

    /// Randomization QA per aggregation slice: per-arm row and unit
    /// counts, and how many units saw one, two, ... distinct arms.
    pub fn validate(&self) -> Result<Vec<ValidationReport>> {
        let group_col = self.frame.label_column(&self.config.group_col)?;
        let unit_col = self.frame.label_column(&self.config.unit_col)?;

        let mut reports = Vec::new();
        for aggregation in &self.aggregations {
            let mask = aggregation.mask(&self.frame)?;
            let selected = |idx: usize| mask.as_ref().map_or(true, |m| m.flags()[idx]);

            let mut indices: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            let mut units: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
            let mut arms_per_unit: HashMap<&str, HashSet<&str>> = HashMap::new();
            for idx in 0..self.frame.row_count() {
                if !selected(idx) {
                    continue;
                }
                let (Some(group), Some(unit)) = (group_col.label_at(idx), unit_col.label_at(idx))
                else {
                    continue;
                };
                indices.entry(group).or_default().push(idx);
                units.entry(group).or_default().insert(unit);
                arms_per_unit.entry(unit).or_default().insert(group);
            }

            let mut group_stats = Vec::new();
            for (group, idxs) in &indices {
                let mut summaries = Vec::new();
                for name in self.frame.column_names() {
                    let Ok(col) = self.frame.numeric_column(name) else {
                        continue;
                    };
                    let values: Vec<f64> =
                        idxs.iter().filter_map(|&idx| col.numeric_at(idx)).collect();
                    summaries.push(column_summary(name, &values));
                }
                group_stats.push(GroupStat {
                    group: group.to_string(),
                    rows: idxs.len(),
                    units: units.get(group).map_or(0, HashSet::len),
                    summaries,
                });
            }

            let mut histogram: BTreeMap<usize, usize> = BTreeMap::new();
            for arms in arms_per_unit.values() {
                *histogram.entry(arms.len()).or_default() += 1;
            }

            reports.push(ValidationReport {
                aggregation: aggregation.full_name(),
                group_stats,
                units_by_group_count: histogram.into_iter().collect(),
            });
        }
        Ok(reports)
    }

    /// Assembles the full report: one sheet per aggregation slice that has
    /// results, info block on the whole-dataset sheet.
    pub fn report(&mut self) -> Result<ReportDocument> {
        let info = self.info()?;
        let mut sheets = Vec::new();

        for aggregation in self.aggregations.clone() {
            let key = aggregation.key();
            let entries: Vec<&SessionEntry> =
                self.results.iter().filter(|e| &e.key == key).collect();
            if entries.is_empty() {
                continue;
            }

            let mut metric_blocks = Vec::new();
            for entry in &entries {
                let calc = entry.metric.get_calc(true, true)?;
                let transposed = self
                    .manager
                    .get_hypothesis(key, entry.metric.name())
                    .ok()
                    .map(transposed_or_nan);
                metric_blocks.push(metrics_block(
                    entry.metric.name(),
                    &calc,
                    transposed.as_ref(),
                ));
            }

            let correction = if self.manager.metrics_for(key).is_empty() {
                None
            } else {
                Some(correction_block(self.manager.get_correction(key)?))
            };

            sheets.push(Sheet::assemble(
                &key.sheet_name(),
                aggregation.is_whole_data().then_some(info.as_slice()),
                &metric_blocks,
                correction.as_ref(),
            ));
        }

        Ok(ReportDocument { sheets })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Reduction;

    fn sample_frame() -> Frame {
        let mut frame = Frame::new();
        frame
            .add_label(
                "user_id",
                &["u1", "u2", "u3", "u4", "u5", "u6", "u7", "u8"],
            )
            .unwrap();
        frame
            .add_label("grp", &["A", "A", "B", "B", "A", "A", "B", "B"])
            .unwrap();
        frame
            .add_label("day", &["d1", "d1", "d1", "d1", "d2", "d2", "d2", "d2"])
            .unwrap();
        frame
            .add_label("country", &["se", "se", "se", "se", "no", "no", "no", "no"])
            .unwrap();
        frame
            .add_numeric("converted", vec![1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0])
            .unwrap();
        frame.add_numeric("visited", vec![1.0; 8]).unwrap();
        frame
    }

    fn conversion_spec() -> MetricSpec {
        MetricSpec::ratio("conversion", "converted", "visited", Reduction::UnitPresence)
            .with_unit_col("user_id")
    }

    #[test]
    fn explicit_control_must_exist() {
        let config = SessionConfig::new("t", "grp", "day", "user_id").with_control("Z");
        let err = ExperimentSession::new(config, sample_frame()).unwrap_err();
        assert_eq!(err, AbError::ControlGroupUndefined);
    }

    #[test]
    fn control_probed_from_default_names() {
        let config = SessionConfig::new("t", "grp", "day", "user_id");
        let session = ExperimentSession::new(config, sample_frame()).unwrap();
        assert_eq!(session.control(), "A");
        assert_eq!(session.pairings().len(), 1);
        assert_eq!(session.pairings()[0].name, "B-A");
    }

    #[test]
    fn probe_reaches_later_default_names() {
        let mut frame = Frame::new();
        frame.add_label("user_id", &["u1", "u2"]).unwrap();
        frame.add_label("grp", &["first", "t1"]).unwrap();
        frame.add_label("day", &["d1", "d1"]).unwrap();
        let config = SessionConfig::new("t", "grp", "day", "user_id");
        let session = ExperimentSession::new(config, frame).unwrap();
        assert_eq!(session.control(), "first");
        assert_eq!(session.pairings()[0].name, "t1-first");
    }

    #[test]
    fn no_resolvable_control_is_an_error() {
        let mut frame = Frame::new();
        frame.add_label("user_id", &["u1", "u2"]).unwrap();
        frame.add_label("grp", &["x", "y"]).unwrap();
        frame.add_label("day", &["d1", "d1"]).unwrap();
        let config = SessionConfig::new("t", "grp", "day", "user_id");
        let err = ExperimentSession::new(config, frame).unwrap_err();
        assert_eq!(err, AbError::ControlGroupUndefined);
    }

    #[test]
    fn calc_metric_covers_every_aggregation() {
        let config = SessionConfig::new("t", "grp", "day", "user_id")
            .with_dimensions(&["*", "country"]);
        let mut session = ExperimentSession::new(config, sample_frame()).unwrap();
        assert_eq!(session.aggregations().len(), 3); // whole + se + no

        session
            .calc_metric(MetricRequest::new(conversion_spec()).with_test(StatTest::ChiSquare))
            .unwrap();
        let report = session.report().unwrap();
        assert_eq!(report.sheets.len(), 3);
        assert_eq!(report.sheets[0].name, "_all");
        assert_eq!(report.sheets[1].name, "country=se");
        assert_eq!(report.sheets[2].name, "country=no");
        // info block only on the whole-dataset sheet
        assert!(report.sheets[0].grid[0][0].starts_with("AB test name"));
        assert!(report.sheets[1].grid[0][0].starts_with("metric"));
    }

    #[test]
    fn untested_metric_produces_no_correction_table() {
        let config = SessionConfig::new("t", "grp", "day", "user_id");
        let mut session = ExperimentSession::new(config, sample_frame()).unwrap();
        session
            .calc_metric(MetricRequest::new(conversion_spec()))
            .unwrap();
        let report = session.report().unwrap();
        // info + margin + metrics table only
        let grid = &report.sheets[0].grid;
        assert!(!grid.iter().any(|row| row.first().map(String::as_str) == Some("pairing")));
        assert!(!grid
            .iter()
            .any(|row| row.iter().any(|c| c == "corrected pvalue")));
    }

    #[test]
    fn info_rows() {
        let config = SessionConfig::new("checkout", "grp", "day", "user_id");
        let session = ExperimentSession::new(config, sample_frame()).unwrap();
        let info = session.info().unwrap();
        assert_eq!(info[0], "AB test name: checkout");
        assert_eq!(info[1], "Period: d1 - d2");
        assert_eq!(info[2], "Number of groups: 2");
        assert_eq!(info[3], "Unique ids: 8");
        assert_eq!(info[4], "Significance level: 0.05");
    }

    #[test]
    fn validate_counts_and_crosscheck() {
        // u1 shows up in both arms: contaminated unit
        let mut frame = Frame::new();
        frame
            .add_label("user_id", &["u1", "u2", "u1", "u3"])
            .unwrap();
        frame.add_label("grp", &["A", "A", "B", "B"]).unwrap();
        frame.add_label("day", &["d1", "d1", "d1", "d1"]).unwrap();
        let config = SessionConfig::new("t", "grp", "day", "user_id");
        let session = ExperimentSession::new(config, frame).unwrap();

        let reports = session.validate().unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.aggregation, "Whole dataset");
        assert_eq!(
            report.group_stats,
            vec![
                GroupStat { group: "A".into(), rows: 2, units: 2, summaries: vec![] },
                GroupStat { group: "B".into(), rows: 2, units: 2, summaries: vec![] },
            ]
        );
        assert_eq!(report.units_by_group_count, vec![(1, 2), (2, 1)]);
        assert_eq!(report.contaminated_units(), 1);
    }

    #[test]
    fn correction_pools_across_metrics_in_a_slice() {
        let config = SessionConfig::new("t", "grp", "day", "user_id");
        let mut session = ExperimentSession::new(config, sample_frame()).unwrap();
        session
            .calc_metric(MetricRequest::new(conversion_spec()).with_test(StatTest::ChiSquare))
            .unwrap();
        let spec2 = MetricSpec::ratio("clicked", "converted", "visited", Reduction::Sum);
        session
            .calc_metric(MetricRequest::new(spec2).with_test(StatTest::ChiSquare))
            .unwrap();

        let table = session.manager().get_correction(&AggregationKey::Whole).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].metric, "conversion");
        assert_eq!(table.rows[1].metric, "clicked");
    }

    #[test]
    fn restricted_request_leaves_other_slices_without_results() {
        let config = SessionConfig::new("t", "grp", "day", "user_id")
            .with_dimensions(&["*", "country"]);
        let mut session = ExperimentSession::new(config, sample_frame()).unwrap();
        session
            .calc_metric(
                MetricRequest::new(conversion_spec())
                    .with_test(StatTest::ChiSquare)
                    .with_aggregations(&[AggregationKey::Whole]),
            )
            .unwrap();

        let report = session.report().unwrap();
        assert_eq!(report.sheets.len(), 1);
        assert_eq!(report.sheets[0].name, "_all");

        let se = AggregationKey::Dimension {
            column: "country".into(),
            value: "se".into(),
        };
        assert!(session.manager().get_correction(&se).is_err());
    }

    #[test]
    fn validate_describes_numeric_columns_per_group() {
        let mut frame = Frame::new();
        frame
            .add_label("user_id", &["u1", "u2", "u3", "u4", "u5", "u6", "u7"])
            .unwrap();
        frame
            .add_label("grp", &["A", "A", "A", "A", "B", "B", "B"])
            .unwrap();
        frame
            .add_label("day", &["d1", "d1", "d1", "d1", "d1", "d1", "d1"])
            .unwrap();
        frame
            .add_numeric_opt(
                "revenue",
                vec![
                    Some(10.0),
                    Some(20.0),
                    Some(30.0),
                    Some(40.0),
                    Some(5.0),
                    None,
                    Some(15.0),
                ],
            )
            .unwrap();
        let config = SessionConfig::new("t", "grp", "day", "user_id");
        let session = ExperimentSession::new(config, frame).unwrap();

        let reports = session.validate().unwrap();
        let a = &reports[0].group_stats[0].summaries[0];
        assert_eq!(a.column, "revenue");
        assert_eq!(a.count, 4);
        assert!((a.mean - 25.0).abs() < 1e-12);
        assert!((a.std - (500.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(a.min, 10.0);
        assert!((a.q1 - 17.5).abs() < 1e-12);
        assert!((a.median - 25.0).abs() < 1e-12);
        assert!((a.q3 - 32.5).abs() < 1e-12);
        assert_eq!(a.max, 40.0);

        // the null is excluded from B's summary
        let b = &reports[0].group_stats[1].summaries[0];
        assert_eq!(b.count, 2);
        assert!((b.mean - 10.0).abs() < 1e-12);
        assert!((b.std - 50.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(b.min, 5.0);
        assert_eq!(b.max, 15.0);
    }

    #[test]
    fn empty_test_report_still_emits_nan_pvalue_columns() {
        // country "no" has no B rows, so the pairing is skipped there
        let mut frame = Frame::new();
        frame
            .add_label("user_id", &["u1", "u2", "u3", "u4", "u5", "u6"])
            .unwrap();
        frame.add_label("grp", &["A", "B", "A", "B", "A", "A"]).unwrap();
        frame
            .add_label("day", &["d1", "d1", "d1", "d1", "d1", "d1"])
            .unwrap();
        frame
            .add_label("country", &["se", "se", "se", "se", "no", "no"])
            .unwrap();
        frame
            .add_numeric("converted", vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0])
            .unwrap();
        frame.add_numeric("visited", vec![1.0; 6]).unwrap();

        let config =
            SessionConfig::new("t", "grp", "day", "user_id").with_dimensions(&["country"]);
        let mut session = ExperimentSession::new(config, frame).unwrap();
        session
            .calc_metric(MetricRequest::new(conversion_spec()).with_test(StatTest::ChiSquare))
            .unwrap();

        let report = session.report().unwrap();
        let sheet = report
            .sheets
            .iter()
            .find(|s| s.name == "country=no")
            .unwrap();
        assert_eq!(sheet.grid[0].last().unwrap(), "B-A pvalue");
        assert_eq!(sheet.grid[1].last().unwrap(), "NaN");
    }
}
