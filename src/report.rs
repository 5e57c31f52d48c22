//! Report assembly: display tables and spreadsheet-style sheet grids.
//!
//! Each (aggregation, metric) contributes the metric's formatted display
//! values joined with its raw per-pairing p-values. The pooled corrected
//! table from the manager closes each sheet. Rendering stops at grids of
//! strings, one sheet per aggregation slice, so any tabular consumer can
//! take the output as-is.

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::hypothesis::TransposedReport;
use crate::manager::CorrectionTable;
use crate::metric::CalcTable;

/// Blank rows between blocks on a sheet.
pub const BLOCK_MARGIN: usize = 2;

/// A rectangular block of display cells.
pub type Grid = Vec<Vec<String>>;

fn format_pvalue(p: f64) -> String {
    if p.is_nan() {
        "NaN".to_string()
    } else {
        format!("{p:.4}")
    }
}

/// Metric display table joined with per-pairing p-value columns.
///
/// One header row and one value row: groups and uplift entries first,
/// then one `"<pairing> pvalue"` column per pairing. A hypothesis that
/// produced no rows contributes no p-value columns.
pub fn metrics_block(
    metric_name: &str,
    calc: &CalcTable,
    test: Option<&TransposedReport>,
) -> Grid {
    let mut header = vec!["metric".to_string()];
    header.extend(calc.labels.iter().cloned());

    let mut row = vec![metric_name.to_string()];
    match &calc.formatted {
        Some(formatted) => row.extend(formatted.iter().cloned()),
        None => row.extend(calc.values.iter().map(|v| v.to_string())),
    }

    if let Some(t) = test {
        for (pairing, &p) in t.pairings.iter().zip(t.p_values.iter()) {
            header.push(format!("{pairing} pvalue"));
            row.push(format_pvalue(p));
        }
    }

    vec![header, row]
}

/// The pooled multi-hypothesis table for one aggregation slice.
pub fn correction_block(table: &CorrectionTable) -> Grid {
    let mut grid = vec![vec![
        "metric".to_string(),
        "pairing".to_string(),
        "pvalue".to_string(),
        "sig. level".to_string(),
        "significant".to_string(),
        "corrected pvalue".to_string(),
        "corrected significant".to_string(),
    ]];
    for row in &table.rows {
        grid.push(vec![
            row.metric.clone(),
            row.pairing.clone(),
            format_pvalue(row.p_value),
            format!("{}", row.significance_level),
            format!("{}", !row.p_value.is_nan() && row.p_value < row.significance_level),
            format_pvalue(row.corrected_p_value),
            row.corrected_significant
                .map_or_else(String::new, |s| s.to_string()),
        ]);
    }
    grid
}

/// One export sheet: an aggregation slice's blocks laid out contiguously
/// with a fixed blank-row margin between them.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub grid: Grid,
}

impl Sheet {
    /// Assembles a sheet from an optional free-text info block, the
    /// metrics tables, and the multi-hypothesis table.
    pub fn assemble(
        name: &str,
        info: Option<&[String]>,
        metric_blocks: &[Grid],
        correction: Option<&Grid>,
    ) -> Self {
        let mut grid: Grid = Vec::new();
        let mut first = true;

        let mut push_block = |block: &Grid, grid: &mut Grid, first: &mut bool| {
            if block.is_empty() {
                return;
            }
            if !*first {
                for _ in 0..BLOCK_MARGIN {
                    grid.push(Vec::new());
                }
            }
            grid.extend(block.iter().cloned());
            *first = false;
        };

        if let Some(rows) = info {
            let info_block: Grid = rows.iter().map(|r| vec![r.clone()]).collect();
            push_block(&info_block, &mut grid, &mut first);
        }
        for block in metric_blocks {
            push_block(block, &mut grid, &mut first);
        }
        if let Some(block) = correction {
            push_block(block, &mut grid, &mut first);
        }

        Self {
            name: name.to_string(),
            grid,
        }
    }

    /// Renders the sheet as CSV with standard quoting.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for row in &self.grid {
            let line: Vec<String> = row.iter().map(|cell| csv_escape(cell)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        out
    }

    /// Renders the sheet as column-aligned text for console display.
    pub fn render_text(&self) -> String {
        let n_cols = self.grid.iter().map(Vec::len).max().unwrap_or(0);
        let mut widths = vec![0usize; n_cols];
        for row in &self.grid {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        let mut out = String::new();
        for row in &self.grid {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                if i > 0 {
                    line.push_str("  ");
                }
                line.push_str(cell);
                for _ in cell.chars().count()..widths[i] {
                    line.push(' ');
                }
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

fn csv_escape(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// A full report: one sheet per aggregation slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    pub sheets: Vec<Sheet>,
}

impl ReportDocument {
    /// Writes one `<sheet name>.csv` per sheet into `dir`.
    pub fn save_csv(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for sheet in &self.sheets {
            fs::write(dir.join(format!("{}.csv", sheet.name)), sheet.to_csv())?;
        }
        Ok(())
    }

    /// Renders every sheet for console display.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for sheet in &self.sheets {
            out.push_str("# ");
            out.push_str(&sheet.name);
            out.push('\n');
            out.push_str(&sheet.render_text());
            out.push('\n');
        }
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::CorrectionMethod;
    use crate::manager::CorrectionRow;

    fn sample_calc() -> CalcTable {
        CalcTable {
            labels: vec!["A".into(), "B".into(), "B-A".into()],
            values: vec![0.05, 0.08, 0.6],
            formatted: Some(vec!["5.00%".into(), "8.00%".into(), "+60.00%".into()]),
        }
    }

    fn sample_transposed() -> TransposedReport {
        TransposedReport {
            pairings: vec!["B-A".into()],
            p_values: vec![0.0065],
            significance_levels: vec![0.05],
            significant: vec![true],
        }
    }

    fn sample_correction() -> CorrectionTable {
        CorrectionTable {
            method: CorrectionMethod::Holm,
            rows: vec![
                CorrectionRow {
                    metric: "conversion".into(),
                    pairing: "B-A".into(),
                    p_value: 0.0065,
                    significance_level: 0.05,
                    corrected_p_value: 0.013,
                    corrected_significant: Some(true),
                },
                CorrectionRow {
                    metric: "revenue".into(),
                    pairing: "B-A".into(),
                    p_value: f64::NAN,
                    significance_level: 0.05,
                    corrected_p_value: f64::NAN,
                    corrected_significant: None,
                },
            ],
        }
    }

    #[test]
    fn metrics_block_joins_pvalue_columns() {
        let grid = metrics_block("conversion", &sample_calc(), Some(&sample_transposed()));
        assert_eq!(grid.len(), 2);
        assert_eq!(grid[0], vec!["metric", "A", "B", "B-A", "B-A pvalue"]);
        assert_eq!(grid[1], vec!["conversion", "5.00%", "8.00%", "+60.00%", "0.0065"]);
    }

    #[test]
    fn metrics_block_without_hypothesis_has_no_pvalue_columns() {
        let grid = metrics_block("conversion", &sample_calc(), None);
        assert_eq!(grid[0].len(), 4);
    }

    #[test]
    fn correction_block_renders_nan_and_none() {
        let grid = correction_block(&sample_correction());
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[2][2], "NaN");
        assert_eq!(grid[2][6], ""); // no claim either way
        assert_eq!(grid[1][6], "true");
    }

    #[test]
    fn sheet_assembly_places_margins_between_blocks() {
        let info = vec!["AB test name: checkout".to_string()];
        let metrics = vec![metrics_block("conversion", &sample_calc(), None)];
        let correction = correction_block(&sample_correction());
        let sheet = Sheet::assemble("_all", Some(&info), &metrics, Some(&correction));

        // 1 info + 2 margin + 2 metrics + 2 margin + 3 correction
        assert_eq!(sheet.grid.len(), 10);
        assert!(sheet.grid[1].is_empty() && sheet.grid[2].is_empty());
        assert!(sheet.grid[5].is_empty() && sheet.grid[6].is_empty());
        assert_eq!(sheet.grid[7][0], "metric");
    }

    #[test]
    fn csv_escapes_commas_and_quotes() {
        let sheet = Sheet {
            name: "_all".into(),
            grid: vec![vec!["a,b".into(), "say \"hi\"".into(), "plain".into()]],
        };
        assert_eq!(sheet.to_csv(), "\"a,b\",\"say \"\"hi\"\"\",plain\n");
    }

    #[test]
    fn render_text_aligns_columns() {
        let sheet = Sheet {
            name: "_all".into(),
            grid: vec![
                vec!["metric".into(), "A".into()],
                vec!["conversion".into(), "5.00%".into()],
            ],
        };
        let text = sheet.render_text();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("metric    "));
        assert!(lines[1].starts_with("conversion"));
    }
}
