//! Metric computation over grouped experiment data.
//!
//! A [`Metric`] binds a [`MetricSpec`] to a base frame, an accumulated row
//! mask, and a list of grouping keys. [`Metric::calc`] re-derives the
//! grouped output from the base frame on every call (no incremental
//! state): a **ratio metric** reduces a nominator and denominator column
//! per group and divides them; a **continuous metric** first sums the
//! measure per analysis unit, optionally trims outliers at that per-unit
//! granularity, then re-sums per group.
//!
//! # Example
//!
//! ```
//! use splitlab::frame::Frame;
//! use splitlab::metric::{Metric, MetricSpec, Reduction};
//!
//! let mut f = Frame::new();
//! f.add_label("group", &["A", "A", "B", "B"]).unwrap();
//! f.add_label("user", &["u1", "u2", "u3", "u4"]).unwrap();
//! f.add_numeric("orders", vec![1.0, 0.0, 1.0, 1.0]).unwrap();
//! f.add_numeric("sessions", vec![1.0, 1.0, 1.0, 1.0]).unwrap();
//!
//! let spec = MetricSpec::ratio("conversion", "orders", "sessions", Reduction::Sum)
//!     .with_unit_col("user");
//! let mut metric = Metric::new(spec, f);
//! metric.append_grouping(&["group".into()]);
//!
//! let output = metric.calc(Default::default()).unwrap();
//! assert_eq!(output.rows().len(), 2);
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{AbError, Result};
use crate::frame::{Frame, Mask};

// ── Configuration ─────────────────────────────────────────────────────

/// How nominator / denominator columns are reduced per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Count of distinct measurement units with a positive value.
    UnitPresence,
    /// Plain sum of raw values.
    Sum,
}

/// Where the outlier quantile threshold is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierKind {
    /// Threshold computed independently within each group.
    PerGroup,
    /// One threshold over the whole metric's data, applied to every group.
    Global,
}

/// Outlier trimming policy for continuous metrics.
///
/// Per-unit sums strictly above the quantile threshold are excluded before
/// the final re-aggregation. The optional `min_value` floor excludes small
/// values from the *threshold computation* only; they stay in the data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierPolicy {
    pub kind: OutlierKind,
    pub quantile: f64,
    pub min_value: Option<f64>,
}

impl OutlierPolicy {
    /// Per-group trimming at the given quantile.
    pub fn per_group(quantile: f64) -> Self {
        Self {
            kind: OutlierKind::PerGroup,
            quantile,
            min_value: None,
        }
    }

    /// Global trimming at the given quantile.
    pub fn global(quantile: f64) -> Self {
        Self {
            kind: OutlierKind::Global,
            quantile,
            min_value: None,
        }
    }

    /// Sets the minimum-value floor for threshold computation.
    pub fn with_min_value(mut self, min_value: f64) -> Self {
        self.min_value = Some(min_value);
        self
    }
}

/// Missing-value policy for the numeric columns a metric reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaPolicy {
    /// Missing values read as `0.0`.
    Zero,
    /// Rows with a missing value in any referenced column are dropped.
    #[default]
    Drop,
}

/// What a metric measures.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    /// nominator / denominator per group.
    Ratio {
        nominator: String,
        denominator: String,
        reduction: Reduction,
    },
    /// Summed continuous measure per analysis unit, re-summed per group.
    Continuous { value: String },
}

/// Full definition of a metric, independent of any particular data slice.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub kind: MetricKind,
    /// Unit-identifier column; required for continuous metrics and for
    /// the [`Reduction::UnitPresence`] reduction.
    pub unit_col: Option<String>,
    pub outliers: Option<OutlierPolicy>,
    pub na: NaPolicy,
}

impl MetricSpec {
    /// Ratio (proportion) metric definition.
    pub fn ratio(name: &str, nominator: &str, denominator: &str, reduction: Reduction) -> Self {
        Self {
            name: name.to_string(),
            kind: MetricKind::Ratio {
                nominator: nominator.to_string(),
                denominator: denominator.to_string(),
                reduction,
            },
            unit_col: None,
            outliers: None,
            na: NaPolicy::default(),
        }
    }

    /// Continuous metric definition.
    pub fn continuous(name: &str, value: &str, unit_col: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MetricKind::Continuous {
                value: value.to_string(),
            },
            unit_col: Some(unit_col.to_string()),
            outliers: None,
            na: NaPolicy::default(),
        }
    }

    /// Sets the unit-identifier column.
    pub fn with_unit_col(mut self, unit_col: &str) -> Self {
        self.unit_col = Some(unit_col.to_string());
        self
    }

    /// Sets the outlier-trimming policy.
    pub fn with_outliers(mut self, policy: OutlierPolicy) -> Self {
        self.outliers = Some(policy);
        self
    }

    /// Sets the missing-value policy.
    pub fn with_na_policy(mut self, na: NaPolicy) -> Self {
        self.na = na;
        self
    }

    /// Returns `true` for ratio metrics.
    pub fn is_ratio(&self) -> bool {
        matches!(self.kind, MetricKind::Ratio { .. })
    }
}

/// Per-call options for [`Metric::calc`].
#[derive(Debug, Clone)]
pub struct CalcOptions {
    /// Extra mask ANDed with the metric's accumulated mask for this call.
    pub mask: Option<Mask>,
    /// Extra grouping keys unioned with the metric's own for this call.
    pub grouping: Vec<String>,
    /// Disable outlier trimming for this call when `false`.
    pub remove_outliers: bool,
}

impl CalcOptions {
    /// Default options: no extra mask or grouping, trimming enabled.
    pub fn new() -> Self {
        Self {
            mask: None,
            grouping: Vec::new(),
            remove_outliers: true,
        }
    }

    /// Sets the per-call mask.
    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }
}

impl Default for CalcOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ── Output ────────────────────────────────────────────────────────────

/// Values of one output row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RowData {
    /// The three ratio-metric columns.
    Ratio {
        nominator: f64,
        denominator: f64,
        ratio: f64,
    },
    /// Group total plus the per-unit sums it was re-aggregated from
    /// (post-trim); the t-test consumes the samples.
    Continuous { total: f64, samples: Vec<f64> },
}

impl RowData {
    /// The scalar metric value of this row (ratio, or group total).
    pub fn metric_value(&self) -> f64 {
        match self {
            Self::Ratio { ratio, .. } => *ratio,
            Self::Continuous { total, .. } => *total,
        }
    }
}

/// One group's row in a metric output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    /// Grouping-key values, one per grouping column.
    pub key: Vec<String>,
    pub data: RowData,
}

impl MetricRow {
    /// Joined display label for this row's key.
    pub fn label(&self) -> String {
        self.key.join("/")
    }
}

/// Group-indexed output of [`Metric::calc`], ordered by grouping key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricOutput {
    grouping: Vec<String>,
    rows: Vec<MetricRow>,
    is_ratio: bool,
}

impl MetricOutput {
    /// Grouping column names, in key order.
    pub fn grouping(&self) -> &[String] {
        &self.grouping
    }

    /// Output rows, sorted by grouping key.
    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    /// Returns `true` when rows carry ratio columns.
    pub fn is_ratio(&self) -> bool {
        self.is_ratio
    }

    /// Position of a grouping column within the key.
    pub fn level_index(&self, column: &str) -> Result<usize> {
        self.grouping
            .iter()
            .position(|g| g == column)
            .ok_or_else(|| AbError::ColumnNotFound {
                name: column.to_string(),
            })
    }

    /// First row whose key at `level` equals `value`.
    pub fn row_matching(&self, level: usize, value: &str) -> Option<&MetricRow> {
        self.rows.iter().find(|r| r.key[level] == value)
    }
}

// ── Quantile ──────────────────────────────────────────────────────────

/// Linear-interpolation quantile over unsorted data (the convention used
/// by the trimming policies). Returns NaN for empty input.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = pos - lo as f64;
    if lo + 1 < sorted.len() {
        sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
    } else {
        sorted[lo]
    }
}

// ── Display formats ───────────────────────────────────────────────────

/// Two-decimal percent, e.g. `0.065` → `"6.50%"`.
pub fn format_proportion(v: f64) -> String {
    format!("{:.2}%", v * 100.0)
}

/// Signed two-decimal percent for uplift rows, e.g. `0.3` → `"+30.00%"`.
pub fn format_uplift(v: f64) -> String {
    format!("{:+.2}%", v * 100.0)
}

/// Fixed three decimals for continuous measures.
pub fn format_continuous(v: f64) -> String {
    format!("{v:.3}")
}

/// Metric values prepared for display: one column per group, followed by
/// relative-uplift columns when requested.
#[derive(Debug, Clone, PartialEq)]
pub struct CalcTable {
    /// Group labels, then uplift labels (`"<group>-<reference>"`).
    pub labels: Vec<String>,
    /// Raw values aligned with `labels`.
    pub values: Vec<f64>,
    /// Formatted values aligned with `labels` (when formatting requested).
    pub formatted: Option<Vec<String>>,
}

// ── Metric ────────────────────────────────────────────────────────────

/// A metric bound to a base frame, with an accumulated mask and grouping.
#[derive(Debug, Clone)]
pub struct Metric {
    spec: MetricSpec,
    frame: Frame,
    mask: Option<Mask>,
    grouping: Vec<String>,
    relation_value: Option<String>,
    output: Option<MetricOutput>,
}

impl Metric {
    /// Binds a spec to its base frame.
    pub fn new(spec: MetricSpec, frame: Frame) -> Self {
        Self {
            spec,
            frame,
            mask: None,
            grouping: Vec::new(),
            relation_value: None,
            output: None,
        }
    }

    /// Metric name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The metric's definition.
    pub fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    /// The base frame this metric computes over.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Sets the reference group for relative-uplift rows in [`get_calc`].
    ///
    /// [`get_calc`]: Metric::get_calc
    pub fn set_relation_value(&mut self, group: &str) {
        self.relation_value = Some(group.to_string());
    }

    /// ANDs `mask` into the metric's accumulated mask.
    pub fn append_mask(&mut self, mask: Mask) -> Result<()> {
        match &mut self.mask {
            Some(existing) => existing.and(&mask),
            None => {
                self.mask = Some(mask);
                Ok(())
            }
        }
    }

    /// Unions `keys` into the metric's grouping key list.
    pub fn append_grouping(&mut self, keys: &[String]) {
        for k in keys {
            if !self.grouping.contains(k) {
                self.grouping.push(k.clone());
            }
        }
    }

    /// Computes the grouped output from the base frame.
    ///
    /// Idempotent: repeated calls with identical options yield identical
    /// output; nothing accumulates across calls. The most recent output is
    /// retained for [`Metric::get_calc`].
    pub fn calc(&mut self, opts: CalcOptions) -> Result<MetricOutput> {
        let keep = self.effective_mask(&opts)?;
        let grouping = self.effective_grouping(&opts);
        if grouping.is_empty() {
            return Err(AbError::ColumnNotFound {
                name: "<grouping>".to_string(),
            });
        }

        let output = match self.spec.kind.clone() {
            MetricKind::Ratio {
                nominator,
                denominator,
                reduction,
            } => self.calc_ratio(&keep, &grouping, &nominator, &denominator, reduction)?,
            MetricKind::Continuous { value } => {
                self.calc_continuous(&keep, &grouping, &value, opts.remove_outliers)?
            }
        };

        self.output = Some(output.clone());
        Ok(output)
    }

    /// The most recent [`Metric::calc`] output.
    pub fn output(&self) -> Result<&MetricOutput> {
        self.output.as_ref().ok_or_else(|| AbError::MetricNotCalculated {
            name: self.spec.name.clone(),
        })
    }

    /// Metric values for display.
    ///
    /// With `calc_relation`, appends one relative-uplift entry per
    /// non-reference group (`value / reference − 1`), named
    /// `"<group>-<reference>"`. A missing reference group degrades to NaN
    /// uplifts rather than an error. With `use_format`, values are also
    /// rendered as strings: percent for ratio metrics, three decimals for
    /// continuous, signed percent for uplift entries.
    pub fn get_calc(&self, calc_relation: bool, use_format: bool) -> Result<CalcTable> {
        let output = self.output()?;
        let is_ratio = output.is_ratio();

        let mut labels: Vec<String> = Vec::new();
        let mut values: Vec<f64> = Vec::new();
        let mut uplift_flags: Vec<bool> = Vec::new();

        for row in output.rows() {
            labels.push(row.label());
            values.push(row.data.metric_value());
            uplift_flags.push(false);
        }

        if calc_relation {
            if let Some(reference) = &self.relation_value {
                let ref_value = output
                    .rows()
                    .iter()
                    .find(|r| &r.label() == reference)
                    .map_or(f64::NAN, |r| r.data.metric_value());
                for row in output.rows() {
                    let label = row.label();
                    if &label == reference {
                        continue;
                    }
                    labels.push(format!("{label}-{reference}"));
                    values.push(row.data.metric_value() / ref_value - 1.0);
                    uplift_flags.push(true);
                }
            }
        }

        let formatted = use_format.then(|| {
            values
                .iter()
                .zip(uplift_flags.iter())
                .map(|(&v, &uplift)| {
                    if uplift {
                        format_uplift(v)
                    } else if is_ratio {
                        format_proportion(v)
                    } else {
                        format_continuous(v)
                    }
                })
                .collect()
        });

        Ok(CalcTable {
            labels,
            values,
            formatted,
        })
    }

    // ── internals ────────────────────────────────────────────────

    fn effective_mask(&self, opts: &CalcOptions) -> Result<Mask> {
        let mut keep = Mask::all(self.frame.row_count());
        if let Some(m) = &self.mask {
            keep.and(m)?;
        }
        if let Some(m) = &opts.mask {
            keep.and(m)?;
        }
        Ok(keep)
    }

    fn effective_grouping(&self, opts: &CalcOptions) -> Vec<String> {
        let mut grouping = self.grouping.clone();
        for k in &opts.grouping {
            if !grouping.contains(k) {
                grouping.push(k.clone());
            }
        }
        grouping
    }

    /// Grouping-key values for row `idx`, or `None` when any key is missing.
    fn group_key(&self, grouping: &[String], idx: usize) -> Result<Option<Vec<String>>> {
        let mut key = Vec::with_capacity(grouping.len());
        for col in grouping {
            match self.frame.label_column(col)?.label_at(idx) {
                Some(v) => key.push(v.to_string()),
                None => return Ok(None),
            }
        }
        Ok(Some(key))
    }

    fn calc_ratio(
        &self,
        keep: &Mask,
        grouping: &[String],
        nominator: &str,
        denominator: &str,
        reduction: Reduction,
    ) -> Result<MetricOutput> {
        let nom_col = self.frame.numeric_column(nominator)?;
        let den_col = self.frame.numeric_column(denominator)?;
        let unit_col = match (reduction, &self.spec.unit_col) {
            (Reduction::UnitPresence, Some(u)) => Some(self.frame.label_column(u)?),
            (Reduction::UnitPresence, None) => {
                return Err(AbError::ColumnNotFound {
                    name: "<unit column>".to_string(),
                })
            }
            (Reduction::Sum, _) => None,
        };

        #[derive(Default)]
        struct Acc<'a> {
            nom_sum: f64,
            den_sum: f64,
            nom_units: HashSet<&'a str>,
            den_units: HashSet<&'a str>,
        }

        let mut groups: BTreeMap<Vec<String>, Acc<'_>> = BTreeMap::new();
        for idx in 0..self.frame.row_count() {
            if !keep.flags()[idx] {
                continue;
            }
            let Some(key) = self.group_key(grouping, idx)? else {
                continue;
            };

            let nom = nom_col.numeric_at(idx);
            let den = den_col.numeric_at(idx);
            if self.spec.na == NaPolicy::Drop && (nom.is_none() || den.is_none()) {
                continue;
            }
            let nom = nom.unwrap_or(0.0);
            let den = den.unwrap_or(0.0);

            let acc = groups.entry(key).or_default();
            match reduction {
                Reduction::Sum => {
                    acc.nom_sum += nom;
                    acc.den_sum += den;
                }
                Reduction::UnitPresence => {
                    // unit_col is Some by construction above
                    if let Some(unit) = unit_col.and_then(|c| c.label_at(idx)) {
                        if nom > 0.0 {
                            acc.nom_units.insert(unit);
                        }
                        if den > 0.0 {
                            acc.den_units.insert(unit);
                        }
                    }
                }
            }
        }

        let rows = groups
            .into_iter()
            .map(|(key, acc)| {
                let (nom, den) = match reduction {
                    Reduction::Sum => (acc.nom_sum, acc.den_sum),
                    Reduction::UnitPresence => {
                        (acc.nom_units.len() as f64, acc.den_units.len() as f64)
                    }
                };
                MetricRow {
                    key,
                    data: RowData::Ratio {
                        nominator: nom,
                        denominator: den,
                        // IEEE semantics on zero denominators, not special-cased
                        ratio: nom / den,
                    },
                }
            })
            .collect();

        Ok(MetricOutput {
            grouping: grouping.to_vec(),
            rows,
            is_ratio: true,
        })
    }

    fn calc_continuous(
        &self,
        keep: &Mask,
        grouping: &[String],
        value: &str,
        remove_outliers: bool,
    ) -> Result<MetricOutput> {
        let value_col = self.frame.numeric_column(value)?;
        let unit_name = self.spec.unit_col.as_deref().ok_or(AbError::ColumnNotFound {
            name: "<unit column>".to_string(),
        })?;
        let unit_col = self.frame.label_column(unit_name)?;

        // one summed value per (group key, unit)
        let mut unit_sums: BTreeMap<Vec<String>, BTreeMap<String, f64>> = BTreeMap::new();
        for idx in 0..self.frame.row_count() {
            if !keep.flags()[idx] {
                continue;
            }
            let Some(key) = self.group_key(grouping, idx)? else {
                continue;
            };
            let Some(unit) = unit_col.label_at(idx) else {
                continue;
            };
            let v = match value_col.numeric_at(idx) {
                Some(v) => v,
                None if self.spec.na == NaPolicy::Zero => 0.0,
                None => continue,
            };
            *unit_sums
                .entry(key)
                .or_default()
                .entry(unit.to_string())
                .or_insert(0.0) += v;
        }

        let trim = remove_outliers.then_some(self.spec.outliers).flatten();

        let global_threshold = trim.and_then(|policy| {
            (policy.kind == OutlierKind::Global).then(|| {
                let all: Vec<f64> = unit_sums
                    .values()
                    .flat_map(|units| units.values().copied())
                    .filter(|&v| policy.min_value.is_none_or(|floor| v >= floor))
                    .collect();
                quantile(&all, policy.quantile)
            })
        });

        let rows = unit_sums
            .into_iter()
            .map(|(key, units)| {
                let mut samples: Vec<f64> = units.into_values().collect();
                if let Some(policy) = trim {
                    let threshold = match policy.kind {
                        OutlierKind::Global => global_threshold.unwrap_or(f64::NAN),
                        OutlierKind::PerGroup => {
                            let candidates: Vec<f64> = samples
                                .iter()
                                .copied()
                                .filter(|&v| policy.min_value.is_none_or(|floor| v >= floor))
                                .collect();
                            quantile(&candidates, policy.quantile)
                        }
                    };
                    if threshold.is_finite() {
                        samples.retain(|&v| v <= threshold);
                    }
                }
                let total = samples.iter().sum();
                MetricRow {
                    key,
                    data: RowData::Continuous { total, samples },
                }
            })
            .collect();

        Ok(MetricOutput {
            grouping: grouping.to_vec(),
            rows,
            is_ratio: false,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
