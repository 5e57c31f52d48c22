//! Aggregation slices over the experiment dataset.
//!
//! An [`Aggregation`] selects either the whole dataset or the rows where a
//! single categorical dimension equals one value. Slices are enumerated
//! once per session from the distinct values of the requested dimension
//! columns; each distinct (dimension, value) pair yields exactly one slice.
//!
//! ```
//! use splitlab::aggregation::Aggregation;
//! use splitlab::frame::Frame;
//!
//! let mut f = Frame::new();
//! f.add_label("platform", &["ios", "android", "ios"]).unwrap();
//! f.add_label("group", &["A", "B", "A"]).unwrap();
//!
//! let slices = Aggregation::enumerate(&f, &["platform".into()]).unwrap();
//! assert_eq!(slices.len(), 2);
//! assert_eq!(slices[0].full_name(), "platform = ios");
//! ```

use crate::error::Result;
use crate::frame::{Frame, Mask};

/// Sentinel dimension name meaning "do not slice".
pub const WHOLE_DATA: &str = "*";

/// Identity of an aggregation slice; key type for registries and caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AggregationKey {
    /// The whole dataset, unsliced.
    Whole,
    /// Rows where `column == value`.
    Dimension { column: String, value: String },
}

impl AggregationKey {
    /// Human-readable name, used in report sheets and error messages.
    pub fn full_name(&self) -> String {
        match self {
            Self::Whole => "Whole dataset".to_string(),
            Self::Dimension { column, value } => format!("{column} = {value}"),
        }
    }

    /// Sheet name for spreadsheet-style export (`"_all"` for whole data).
    pub fn sheet_name(&self) -> String {
        match self {
            Self::Whole => "_all".to_string(),
            Self::Dimension { column, value } => format!("{column}={value}"),
        }
    }
}

/// One filter over the raw dataset: a (dimension, value) pair or the
/// whole-dataset sentinel. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    key: AggregationKey,
}

impl Aggregation {
    /// Creates the whole-dataset slice.
    pub fn whole() -> Self {
        Self {
            key: AggregationKey::Whole,
        }
    }

    /// Creates a slice for one dimension value.
    pub fn dimension(column: &str, value: &str) -> Self {
        Self {
            key: AggregationKey::Dimension {
                column: column.to_string(),
                value: value.to_string(),
            },
        }
    }

    /// Returns the slice identity.
    pub fn key(&self) -> &AggregationKey {
        &self.key
    }

    /// Returns `true` for the whole-dataset sentinel.
    pub fn is_whole_data(&self) -> bool {
        matches!(self.key, AggregationKey::Whole)
    }

    /// Human-readable slice name.
    pub fn full_name(&self) -> String {
        self.key.full_name()
    }

    /// Row mask for this slice; `None` means "all rows".
    pub fn mask(&self, frame: &Frame) -> Result<Option<Mask>> {
        match &self.key {
            AggregationKey::Whole => Ok(None),
            AggregationKey::Dimension { column, value } => {
                Ok(Some(frame.label_eq_mask(column, value)?))
            }
        }
    }

    /// Filtered copy of `frame` for this slice.
    pub fn frame(&self, frame: &Frame) -> Result<Frame> {
        match self.mask(frame)? {
            Some(mask) => frame.filter(&mask),
            None => Ok(frame.clone()),
        }
    }

    /// Enumerates slices for the requested dimension columns.
    ///
    /// An empty `dimensions` list yields the single whole-dataset slice.
    /// The [`WHOLE_DATA`] sentinel (`"*"`) inside the list also yields the
    /// whole-dataset slice; every other entry yields one slice per
    /// distinct value of that column, in first-appearance order. Repeated
    /// entries are ignored, so the result holds exactly one slice per
    /// distinct (dimension, value) pair.
    pub fn enumerate(frame: &Frame, dimensions: &[String]) -> Result<Vec<Aggregation>> {
        if dimensions.is_empty() {
            return Ok(vec![Aggregation::whole()]);
        }

        let mut slices = Vec::new();
        let mut seen: Vec<&str> = Vec::new();
        for dim in dimensions {
            if seen.contains(&dim.as_str()) {
                continue;
            }
            seen.push(dim);
            if dim == WHOLE_DATA {
                slices.push(Aggregation::whole());
                continue;
            }
            for value in frame.distinct_labels(dim)? {
                slices.push(Aggregation::dimension(dim, &value));
            }
        }
        Ok(slices)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn dim_frame() -> Frame {
        let mut f = Frame::new();
        f.add_label("platform", &["ios", "android", "ios", "web"]).unwrap();
        f.add_label("country", &["de", "de", "fr", "de"]).unwrap();
        f.add_numeric("v", vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        f
    }

    #[test]
    fn empty_dimensions_yield_whole_sentinel() {
        let f = dim_frame();
        let slices = Aggregation::enumerate(&f, &[]).unwrap();
        assert_eq!(slices.len(), 1);
        assert!(slices[0].is_whole_data());
        assert_eq!(slices[0].full_name(), "Whole dataset");
    }

    #[test]
    fn one_slice_per_distinct_value() {
        let f = dim_frame();
        let slices = Aggregation::enumerate(&f, &["platform".into()]).unwrap();
        let names: Vec<String> = slices.iter().map(Aggregation::full_name).collect();
        assert_eq!(
            names,
            vec!["platform = ios", "platform = android", "platform = web"]
        );
    }

    #[test]
    fn star_sentinel_mixes_with_dimensions() {
        let f = dim_frame();
        let slices =
            Aggregation::enumerate(&f, &["*".into(), "country".into()]).unwrap();
        assert!(slices[0].is_whole_data());
        assert_eq!(slices.len(), 3); // whole + de + fr
    }

    #[test]
    fn repeated_dimensions_yield_no_duplicate_slices() {
        let f = dim_frame();
        let slices = Aggregation::enumerate(
            &f,
            &["country".into(), "country".into(), "*".into(), "*".into()],
        )
        .unwrap();
        assert_eq!(slices.len(), 3); // de + fr + whole
        let names: Vec<String> = slices.iter().map(Aggregation::full_name).collect();
        assert_eq!(names, vec!["country = de", "country = fr", "Whole dataset"]);
    }

    #[test]
    fn slice_frame_filters_rows() {
        let f = dim_frame();
        let ios = Aggregation::dimension("platform", "ios");
        let sub = ios.frame(&f).unwrap();
        assert_eq!(sub.row_count(), 2);

        let whole = Aggregation::whole();
        assert_eq!(whole.frame(&f).unwrap().row_count(), 4);
        assert!(whole.mask(&f).unwrap().is_none());
    }

    #[test]
    fn keys_are_distinct_per_value() {
        let a = Aggregation::dimension("platform", "ios");
        let b = Aggregation::dimension("platform", "web");
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key().sheet_name(), "platform=ios");
        assert_eq!(AggregationKey::Whole.sheet_name(), "_all");
    }

    #[test]
    fn unknown_dimension_errors() {
        let f = dim_frame();
        assert!(Aggregation::enumerate(&f, &["nope".into()]).is_err());
    }
}
