//! Column-major frame for experiment data.
//!
//! A [`Frame`] stores one observation per row across typed, named columns:
//! [`Numeric`](Column::Numeric) measures with a compact validity bitmap for
//! missing values, and dictionary-encoded [`Label`](Column::Label) columns
//! for group assignments, unit identifiers, time buckets, and aggregation
//! dimensions.
//!
//! Frames are read-only once built. Every filter produces a fresh copy
//! ([`Frame::filter`]), so two metrics computed over the same dataset can
//! apply different masks and NA policies without observing each other's
//! changes.
//!
//! # Example
//!
//! ```
//! use splitlab::frame::Frame;
//!
//! let mut f = Frame::new();
//! f.add_label("group", &["A", "B", "A", "B"]).unwrap();
//! f.add_numeric("orders", vec![1.0, 0.0, 2.0, 3.0]).unwrap();
//!
//! let mask = f.label_eq_mask("group", "A").unwrap();
//! let a_only = f.filter(&mask).unwrap();
//! assert_eq!(a_only.row_count(), 2);
//! ```

use crate::error::{AbError, Result};

// ── ValidityBitmap ────────────────────────────────────────────────────

/// Bit-packed validity bitmap using `Vec<u64>`.
///
/// Each bit marks whether the corresponding row holds a real value (1)
/// or is missing (0).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidityBitmap {
    bits: Vec<u64>,
    len: usize,
}

impl ValidityBitmap {
    /// Creates a bitmap where all `len` positions are valid.
    pub fn all_valid(len: usize) -> Self {
        let n_words = len.div_ceil(64);
        let mut bits = vec![u64::MAX; n_words];
        let trailing = len % 64;
        if trailing != 0 && n_words > 0 {
            bits[n_words - 1] = (1u64 << trailing) - 1;
        }
        Self { bits, len }
    }

    /// Builds a bitmap from per-row validity flags.
    pub fn from_flags(flags: &[bool]) -> Self {
        let mut bitmap = Self {
            bits: Vec::with_capacity(flags.len().div_ceil(64)),
            len: 0,
        };
        for &valid in flags {
            bitmap.push(valid);
        }
        bitmap
    }

    /// Returns `true` if the value at `idx` is present.
    #[inline]
    pub fn is_valid(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len, "index {idx} out of bounds (len={})", self.len);
        let (word, bit) = (idx / 64, idx % 64);
        (self.bits[word] >> bit) & 1 == 1
    }

    /// Appends a new position (valid or missing).
    pub fn push(&mut self, valid: bool) {
        let idx = self.len;
        self.len += 1;
        let word = idx / 64;
        if word >= self.bits.len() {
            self.bits.push(0);
        }
        if valid {
            self.bits[word] |= 1u64 << (idx % 64);
        }
    }

    /// Returns the total number of tracked positions.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the bitmap tracks zero positions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Counts the number of missing positions.
    pub fn null_count(&self) -> usize {
        let valid: usize = self.bits.iter().map(|w| w.count_ones() as usize).sum();
        self.len - valid
    }
}

// ── Column ────────────────────────────────────────────────────────────

/// A typed column with a validity bitmap for missing values.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Dense `f64` measure values. Missing positions hold `0.0` and are
    /// masked out via the bitmap.
    Numeric {
        values: Vec<f64>,
        validity: ValidityBitmap,
    },
    /// Dictionary-encoded labels (groups, unit ids, dimensions, periods).
    ///
    /// `dictionary` holds the unique strings; `indices` maps each row to a
    /// dictionary slot. Missing positions have index `0` (ignored via the
    /// validity bit).
    Label {
        dictionary: Vec<String>,
        indices: Vec<u32>,
        validity: ValidityBitmap,
    },
}

impl Column {
    /// Returns the number of rows in this column.
    pub fn len(&self) -> usize {
        self.validity().len()
    }

    /// Returns `true` if the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the validity bitmap.
    pub fn validity(&self) -> &ValidityBitmap {
        match self {
            Self::Numeric { validity, .. } | Self::Label { validity, .. } => validity,
        }
    }

    /// Label string at `idx`, or `None` when missing or numeric.
    pub fn label_at(&self, idx: usize) -> Option<&str> {
        match self {
            Self::Label {
                dictionary,
                indices,
                validity,
            } if validity.is_valid(idx) => Some(dictionary[indices[idx] as usize].as_str()),
            _ => None,
        }
    }

    /// Numeric value at `idx`, or `None` when missing or non-numeric.
    pub fn numeric_at(&self, idx: usize) -> Option<f64> {
        match self {
            Self::Numeric { values, validity } if validity.is_valid(idx) => Some(values[idx]),
            _ => None,
        }
    }

    fn filtered(&self, keep: &[bool]) -> Self {
        match self {
            Self::Numeric { values, validity } => {
                let mut out_values = Vec::new();
                let mut flags = Vec::new();
                for (i, &v) in values.iter().enumerate() {
                    if keep[i] {
                        out_values.push(v);
                        flags.push(validity.is_valid(i));
                    }
                }
                Self::Numeric {
                    values: out_values,
                    validity: ValidityBitmap::from_flags(&flags),
                }
            }
            Self::Label {
                dictionary,
                indices,
                validity,
            } => {
                let mut out_indices = Vec::new();
                let mut flags = Vec::new();
                for (i, &ix) in indices.iter().enumerate() {
                    if keep[i] {
                        out_indices.push(ix);
                        flags.push(validity.is_valid(i));
                    }
                }
                Self::Label {
                    dictionary: dictionary.clone(),
                    indices: out_indices,
                    validity: ValidityBitmap::from_flags(&flags),
                }
            }
        }
    }
}

// ── Mask ──────────────────────────────────────────────────────────────

/// A boolean row selector, combinable with logical AND.
///
/// Masks are positional: they are built against a particular frame and
/// must have that frame's row count when applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    keep: Vec<bool>,
}

impl Mask {
    /// Creates a mask from per-row flags.
    pub fn from_flags(keep: Vec<bool>) -> Self {
        Self { keep }
    }

    /// Creates a mask selecting every one of `len` rows.
    pub fn all(len: usize) -> Self {
        Self {
            keep: vec![true; len],
        }
    }

    /// ANDs another mask into this one.
    pub fn and(&mut self, other: &Mask) -> Result<()> {
        if self.keep.len() != other.keep.len() {
            return Err(AbError::LengthMismatch {
                expected: self.keep.len(),
                actual: other.keep.len(),
            });
        }
        for (a, b) in self.keep.iter_mut().zip(other.keep.iter()) {
            *a &= *b;
        }
        Ok(())
    }

    /// Number of rows the mask covers.
    pub fn len(&self) -> usize {
        self.keep.len()
    }

    /// Returns `true` if the mask covers zero rows.
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    /// Number of selected rows.
    pub fn count_selected(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    /// Per-row flags.
    pub fn flags(&self) -> &[bool] {
        &self.keep
    }
}

// ── Frame ─────────────────────────────────────────────────────────────

/// Ordered collection of equally-sized named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<(String, Column)>,
    n_rows: usize,
}

impl Frame {
    /// Creates an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Adds a pre-built column, enforcing a uniform row count.
    pub fn add_column(&mut self, name: String, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.len() != self.n_rows {
            return Err(AbError::LengthMismatch {
                expected: self.n_rows,
                actual: column.len(),
            });
        }
        if self.columns.is_empty() {
            self.n_rows = column.len();
        }
        self.columns.push((name, column));
        Ok(())
    }

    /// Adds a fully-valid numeric column.
    pub fn add_numeric(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        let validity = ValidityBitmap::all_valid(values.len());
        self.add_column(name.to_string(), Column::Numeric { values, validity })
    }

    /// Adds a numeric column with explicit missing positions.
    pub fn add_numeric_opt(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        let flags: Vec<bool> = values.iter().map(Option::is_some).collect();
        let dense: Vec<f64> = values.into_iter().map(|v| v.unwrap_or(0.0)).collect();
        self.add_column(
            name.to_string(),
            Column::Numeric {
                values: dense,
                validity: ValidityBitmap::from_flags(&flags),
            },
        )
    }

    /// Adds a label column, dictionary-encoding the provided strings.
    pub fn add_label(&mut self, name: &str, values: &[&str]) -> Result<()> {
        let mut dictionary: Vec<String> = Vec::new();
        let mut indices = Vec::with_capacity(values.len());
        for &v in values {
            let slot = match dictionary.iter().position(|d| d == v) {
                Some(p) => p,
                None => {
                    dictionary.push(v.to_string());
                    dictionary.len() - 1
                }
            };
            indices.push(slot as u32);
        }
        let validity = ValidityBitmap::all_valid(values.len());
        self.add_column(
            name.to_string(),
            Column::Label {
                dictionary,
                indices,
                validity,
            },
        )
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| AbError::ColumnNotFound {
                name: name.to_string(),
            })
    }

    /// Looks up a column, requiring it to be numeric.
    pub fn numeric_column(&self, name: &str) -> Result<&Column> {
        let col = self.column(name)?;
        match col {
            Column::Numeric { .. } => Ok(col),
            Column::Label { .. } => Err(AbError::ColumnTypeMismatch {
                name: name.to_string(),
                expected: "numeric",
            }),
        }
    }

    /// Looks up a column, requiring it to be a label column.
    pub fn label_column(&self, name: &str) -> Result<&Column> {
        let col = self.column(name)?;
        match col {
            Column::Label { .. } => Ok(col),
            Column::Numeric { .. } => Err(AbError::ColumnTypeMismatch {
                name: name.to_string(),
                expected: "a label column",
            }),
        }
    }

    /// Distinct label values of a column in first-appearance order.
    pub fn distinct_labels(&self, name: &str) -> Result<Vec<String>> {
        let col = self.label_column(name)?;
        let mut seen: Vec<String> = Vec::new();
        for i in 0..col.len() {
            if let Some(v) = col.label_at(i) {
                if !seen.iter().any(|s| s == v) {
                    seen.push(v.to_string());
                }
            }
        }
        Ok(seen)
    }

    /// Mask selecting rows where `name` equals `value`.
    pub fn label_eq_mask(&self, name: &str, value: &str) -> Result<Mask> {
        let col = self.label_column(name)?;
        let keep: Vec<bool> = (0..col.len()).map(|i| col.label_at(i) == Some(value)).collect();
        Ok(Mask::from_flags(keep))
    }

    /// Mask selecting rows where label `name` is one of `values`.
    pub fn label_in_mask(&self, name: &str, values: &[String]) -> Result<Mask> {
        let col = self.label_column(name)?;
        let keep: Vec<bool> = (0..col.len())
            .map(|i| match col.label_at(i) {
                Some(v) => values.iter().any(|w| w == v),
                None => false,
            })
            .collect();
        Ok(Mask::from_flags(keep))
    }

    /// Mask from a numeric predicate; missing values never match.
    pub fn numeric_mask<F>(&self, name: &str, pred: F) -> Result<Mask>
    where
        F: Fn(f64) -> bool,
    {
        let col = self.numeric_column(name)?;
        let keep: Vec<bool> = (0..col.len())
            .map(|i| col.numeric_at(i).is_some_and(&pred))
            .collect();
        Ok(Mask::from_flags(keep))
    }

    /// Returns a new frame keeping only rows selected by `mask`.
    ///
    /// Copy-on-filter: the source frame is untouched.
    pub fn filter(&self, mask: &Mask) -> Result<Frame> {
        if mask.len() != self.n_rows {
            return Err(AbError::LengthMismatch {
                expected: self.n_rows,
                actual: mask.len(),
            });
        }
        let mut out = Frame::new();
        for (name, col) in &self.columns {
            out.add_column(name.clone(), col.filtered(mask.flags()))?;
        }
        if self.columns.is_empty() {
            out.n_rows = 0;
        }
        Ok(out)
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
