//! Error types for splitlab.

use std::fmt;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, AbError>;

/// All errors produced by splitlab operations.
///
/// Data insufficiency (zero counts, single-observation arms, absent test
/// groups) is deliberately *not* represented here: those conditions are
/// absorbed into test outcomes so a batch run over many metrics completes.
/// Only structural misconfiguration surfaces as an `AbError`.
#[derive(Debug, Clone, PartialEq)]
pub enum AbError {
    /// Column not found in the frame.
    ColumnNotFound { name: String },
    /// Column exists but has the wrong type for the operation.
    ColumnTypeMismatch {
        name: String,
        expected: &'static str,
    },
    /// Column lengths (or mask length) disagree with the frame.
    LengthMismatch { expected: usize, actual: usize },
    /// Control group name missing, or not present in the group column.
    ControlGroupUndefined,
    /// `test()` called on a hypothesis with no (control, test) pairings.
    NoPairings { hypothesis: String },
    /// Statistical test incompatible with the metric kind it was given
    /// (e.g. chi-square over a continuous metric).
    TestKindMismatch {
        hypothesis: String,
        expected: &'static str,
    },
    /// `get_calc` requested before `calc` produced an output.
    MetricNotCalculated { name: String },
    /// Correction requested for an aggregation with no registered hypotheses.
    NoHypotheses { aggregation: String },
    /// No hypothesis registered under this (aggregation, metric) key.
    HypothesisNotFound {
        aggregation: String,
        metric: String,
    },
    /// Underlying distribution routine rejected its parameters.
    Stat(String),
    /// I/O error while exporting a report.
    Io(String),
}

impl fmt::Display for AbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColumnNotFound { name } => write!(f, "column '{name}' not found"),
            Self::ColumnTypeMismatch { name, expected } => {
                write!(f, "column '{name}' is not {expected}")
            }
            Self::LengthMismatch { expected, actual } => {
                write!(f, "expected {expected} rows, got {actual}")
            }
            Self::ControlGroupUndefined => {
                write!(f, "control group name is undefined or is not in the dataset")
            }
            Self::NoPairings { hypothesis } => {
                write!(f, "hypothesis '{hypothesis}' has no group pairings configured")
            }
            Self::TestKindMismatch {
                hypothesis,
                expected,
            } => {
                write!(
                    f,
                    "hypothesis '{hypothesis}' requires a {expected} metric output"
                )
            }
            Self::MetricNotCalculated { name } => {
                write!(f, "metric '{name}' has no output; call calc() first")
            }
            Self::NoHypotheses { aggregation } => {
                write!(f, "no hypotheses registered for aggregation '{aggregation}'")
            }
            Self::HypothesisNotFound {
                aggregation,
                metric,
            } => {
                write!(
                    f,
                    "no hypothesis for metric '{metric}' under aggregation '{aggregation}'"
                )
            }
            Self::Stat(msg) => write!(f, "distribution error: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for AbError {}

impl From<std::io::Error> for AbError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
