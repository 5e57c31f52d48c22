//! # splitlab
//!
//! A/B test analysis engine: grouped metrics, two-sample hypothesis
//! tests, and jointly corrected p-values over tabular experiment data.
//!
//! splitlab works in three layers:
//!
//! - **Metrics** — ratio and continuous metrics over a column-major frame,
//!   with outlier trimming and arbitrary row masks
//! - **Testing** — chi-square / t-test hypotheses per control-vs-test
//!   pairing, pooled multiple-testing correction per aggregation slice
//! - **Reporting** — per-slice sheet grids with formatted values, uplifts,
//!   raw and corrected p-values
//!
//! ## Modules
//!
//! - [`frame`] — Column-major tabular data model (Frame, Column, Mask)
//! - [`aggregation`] — Data slices: whole dataset or one dimension value
//! - [`metric`] — Ratio and continuous metrics, outlier policies, display formatting
//! - [`hypothesis`] — Chi-square proportions test, Student's and Welch's t-tests
//! - [`correction`] — Bonferroni, Holm, and Benjamini–Hochberg adjustment
//! - [`manager`] — Per-slice hypothesis registry with cached joint correction
//! - [`report`] — Sheet grids, CSV and console rendering
//! - [`series`] — Per-period metric values and cumulative p-value trajectories
//! - [`session`] — Top-level experiment coordinator
//! - [`error`] — Error types
//!
//! ## Quick Start
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
//! frame.add_label("day", &["d1", "d1", "d2", "d2"]).unwrap();
//! frame.add_numeric("converted", vec![0.0, 1.0, 1.0, 1.0]).unwrap();
//! frame.add_numeric("visited", vec![1.0; 4]).unwrap();
//!
//! let config = SessionConfig::new("landing page", "grp", "day", "user_id");
//! let mut session = ExperimentSession::new(config, frame).unwrap();
//!
//! let conversion = MetricSpec::ratio("conversion", "converted", "visited",
//!     Reduction::UnitPresence).with_unit_col("user_id");
//! session
//!     .calc_metric(MetricRequest::new(conversion).with_test(StatTest::ChiSquare))
//!     .unwrap();
//!
//! let report = session.report().unwrap();
//! assert_eq!(report.sheets.len(), 1);
//! println!("{}", report.render_text());
//! ```

pub mod aggregation;
pub mod correction;
pub mod error;
pub mod frame;
pub mod hypothesis;
pub mod manager;
pub mod metric;
pub mod report;
pub mod series;
pub mod session;
