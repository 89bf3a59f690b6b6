use crate::coordinator::{SheetReport, SheetState, SkipReason};
use crate::fill::ColumnStatus;
use crate::persist::ResultArtifact;
use crate::run::RunCounters;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SheetSummary {
    pub sheet: String,
    pub state: SheetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    /// Rows the result artifact holds for this sheet.
    pub rows_merged: usize,
    pub columns_filled: usize,
    /// Columns filled in memory whose formulas the fallback copy lacks.
    pub formulas_dropped: usize,
    pub columns_failed: usize,
    pub columns_timed_out: usize,
    pub formula_rows_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replayed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SheetSummary {
    /// Summarize `r` as held by `artifact`: a fallback copy carries no
    /// formulas, and no rows for a sheet whose replay failed.
    pub fn new(r: &SheetReport, artifact: &ResultArtifact) -> Self {
        let filled = r.columns_with(ColumnStatus::Filled);
        let (columns_filled, formulas_dropped) = if artifact.is_fallback() {
            (0, filled)
        } else {
            (filled, 0)
        };
        let rows_merged = if r.replayed == Some(false) {
            0
        } else {
            r.rows_merged
        };
        Self {
            sheet: r.sheet.clone(),
            state: r.state,
            skipped: r.skipped,
            rows_merged,
            columns_filled,
            formulas_dropped,
            columns_failed: r.columns_with(ColumnStatus::Failed),
            columns_timed_out: r.columns_with(ColumnStatus::TimedOut),
            formula_rows_failed: r.columns.iter().map(|c| c.rows_failed).sum(),
            replayed: r.replayed,
            error: r.error.as_ref().map(ToString::to_string),
        }
    }
}

/// What one run did, ready for display or JSON output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub master: PathBuf,
    pub artifact: ResultArtifact,
    pub sheets: Vec<SheetSummary>,
    pub counters: RunCounters,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn new(
        master: &Path,
        artifact: ResultArtifact,
        reports: &[SheetReport],
        counters: RunCounters,
        elapsed: Duration,
    ) -> Self {
        Self {
            master: master.to_path_buf(),
            sheets: reports.iter().map(|r| SheetSummary::new(r, &artifact)).collect(),
            artifact,
            counters,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetSummary> {
        self.sheets.iter().find(|s| s.sheet == name)
    }

    /// Every merged sheet finished and no formula row failed.
    pub fn is_clean(&self) -> bool {
        self.counters.sheets_aborted == 0
            && self.counters.formula_rows_failed == 0
            && !self.artifact.is_fallback()
    }

    pub fn headline(&self) -> String {
        format!(
            "{} sheet(s) done, {} aborted, {} skipped; {} row(s) merged; saved to {} in {:.1}s",
            self.counters.sheets_done,
            self.counters.sheets_aborted,
            self.counters.sheets_skipped,
            self.counters.rows_merged,
            self.artifact.path().display(),
            self.elapsed_ms as f64 / 1000.0
        )
    }

    /// Plain-text table, one line per sheet.
    pub fn render_table(&self) -> String {
        let width = self
            .sheets
            .iter()
            .map(|s| s.sheet.chars().count())
            .max()
            .unwrap_or(5)
            .max(5);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<width$}  {:<14}  {:>6}  {:>6}  {:>6}  {:>8}",
            "sheet", "state", "rows", "filled", "failed", "timedout"
        );
        for s in &self.sheets {
            let state = match s.skipped {
                Some(SkipReason::NotSelected) => "not selected".to_string(),
                Some(SkipReason::NoSubData) => "no data".to_string(),
                None => format!("{:?}", s.state).to_lowercase(),
            };
            let _ = writeln!(
                out,
                "{:<width$}  {:<14}  {:>6}  {:>6}  {:>6}  {:>8}",
                s.sheet, state, s.rows_merged, s.columns_filled, s.columns_failed, s.columns_timed_out
            );
            if s.replayed == Some(false) {
                let _ = writeln!(out, "  values missing from {}", self.artifact.path().display());
            }
            if let Some(err) = &s.error {
                let _ = writeln!(out, "  error: {err}");
            }
        }
        let _ = writeln!(out, "{}", self.headline());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MergeError;
    use crate::fill::ColumnOutcome;
    use sheetmerge_common::Column;

    fn reports() -> Vec<SheetReport> {
        let mut done = SheetReport::new("Orders");
        done.state = SheetState::Done;
        done.rows_merged = 4;
        let mut aborted = SheetReport::new("站外数据源");
        aborted.state = SheetState::Aborted;
        aborted.error = Some(MergeError::SchemaMismatch { master: 3, sub: 4 });
        vec![done, aborted]
    }

    #[test]
    fn table_lists_every_sheet_and_errors() {
        let counters = RunCounters {
            sheets_done: 1,
            sheets_aborted: 1,
            rows_merged: 4,
            ..RunCounters::default()
        };
        let s = RunSummary::new(
            Path::new("m.xlsx"),
            ResultArtifact::Original("m.xlsx".into()),
            &reports(),
            counters,
            Duration::from_millis(1500),
        );
        let table = s.render_table();
        assert!(table.contains("Orders"));
        assert!(table.contains("aborted"));
        assert!(table.contains("column count mismatch"));
        assert!(table.contains("1 sheet(s) done, 1 aborted"));
        assert!(!s.is_clean());
        assert_eq!(s.sheet("Orders").unwrap().rows_merged, 4);
    }

    #[test]
    fn fallback_counts_only_what_the_copy_holds() {
        let mut reports = reports();
        let mut lost = SheetReport::new("Refunds");
        lost.state = SheetState::Done;
        lost.rows_merged = 3;
        lost.replayed = Some(false);
        reports.push(lost);
        reports[0].replayed = Some(true);
        reports[0].columns = vec![ColumnOutcome {
            column: Column::A,
            rows_attempted: 4,
            rows_succeeded: 4,
            rows_failed: 0,
            elapsed: Duration::ZERO,
            status: ColumnStatus::Filled,
            external: false,
            splits: 0,
            unit_fallbacks: 0,
        }];

        let s = RunSummary::new(
            Path::new("m.xlsx"),
            ResultArtifact::Fallback("merged_m.xlsx".into()),
            &reports,
            RunCounters::default(),
            Duration::ZERO,
        );
        let orders = s.sheet("Orders").unwrap();
        assert_eq!(orders.rows_merged, 4);
        assert_eq!(orders.columns_filled, 0);
        assert_eq!(orders.formulas_dropped, 1);
        let refunds = s.sheet("Refunds").unwrap();
        assert_eq!(refunds.rows_merged, 0);
        assert_eq!(refunds.replayed, Some(false));
        assert!(s.render_table().contains("values missing from merged_m.xlsx"));
    }

    #[test]
    fn serializes_to_json() {
        let s = RunSummary::new(
            Path::new("m.xlsx"),
            ResultArtifact::Fallback("merged_m.xlsx".into()),
            &reports(),
            RunCounters::default(),
            Duration::ZERO,
        );
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["artifact"]["kind"], "fallback");
        assert_eq!(v["sheets"][1]["state"], "aborted");
        assert!(v["sheets"][0].get("error").is_none());
    }
}
