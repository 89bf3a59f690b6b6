//! Per-sheet merge state machine.
//!
//! `Idle -> RangeRead -> SchemaAligned -> ValueAppended -> FormulaFilled ->
//! Done`, or `Aborted` on the first hard failure. Sheets are independent:
//! an aborted sheet never stops the next one.

use crate::align::SchemaAligner;
use crate::config::SheetGroupConfig;
use crate::error::MergeError;
use crate::events::{EventCounts, Reporter, StatusEvent};
use crate::fill::{ColumnOutcome, ColumnStatus, ParallelFormulaFiller};
use crate::locate::{AppendRange, locate};
use crate::run::{MergeRun, SubTableBuffer};
use serde::Serialize;
use sheetmerge_common::{CellValue, Column, Table};
use sheetmerge_io::{SheetHandle, WorkbookHandle};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetState {
    Idle,
    RangeRead,
    SchemaAligned,
    ValueAppended,
    FormulaFilled,
    Done,
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotSelected,
    NoSubData,
}

/// How a configured sheet name was matched against the workbook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SheetMatch {
    Exact,
    /// Same name ignoring case and surrounding whitespace.
    Approximate,
    /// One name contains the other.
    Partial,
}

/// Find `wanted` among `names`: exact, then case-insensitive trimmed, then
/// containment either way.
pub fn resolve_sheet_name(names: &[String], wanted: &str) -> Option<(String, SheetMatch)> {
    if let Some(n) = names.iter().find(|n| *n == wanted) {
        return Some((n.clone(), SheetMatch::Exact));
    }
    let folded = wanted.trim().to_lowercase();
    if let Some(n) = names.iter().find(|n| n.trim().to_lowercase() == folded) {
        return Some((n.clone(), SheetMatch::Approximate));
    }
    names
        .iter()
        .find(|n| n.contains(wanted) || wanted.contains(n.as_str()))
        .map(|n| (n.clone(), SheetMatch::Partial))
}

/// The raw-value part of a merge, kept so the save fallback can replay it on
/// a fresh copy of the master.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendPlan {
    pub sheet: String,
    pub data_start: Column,
    /// Offset from `data_start` of each column of `values`, ascending.
    pub targets: Vec<u32>,
    pub range: AppendRange,
    pub values: Table,
    pub date_column: Option<Column>,
    pub dates: Vec<CellValue>,
}

impl AppendPlan {
    pub fn apply(&self, sheet: &SheetHandle) -> Result<(), MergeError> {
        if let Some(col) = self.date_column {
            sheet.write_column(col, self.range.start, &self.dates)?;
        }
        for (offset, cols) in contiguous_runs(&self.targets) {
            let col = self
                .data_start
                .offset(offset)
                .ok_or_else(|| MergeError::Table(format!("column offset {offset} out of range")))?;
            if cols == (0..self.values.width()) {
                sheet.write_block(col, self.range.start, &self.values)?;
                continue;
            }
            let rows: Vec<Vec<CellValue>> = self
                .values
                .rows()
                .iter()
                .map(|r| r[cols.clone()].to_vec())
                .collect();
            let block = Table::new(vec![None; cols.len()], rows)
                .map_err(|e| MergeError::Table(e.to_string()))?;
            sheet.write_block(col, self.range.start, &block)?;
        }
        Ok(())
    }
}

/// Split ascending offsets into runs of adjacent columns: the first offset of
/// each run and the index range it covers in the source.
fn contiguous_runs(targets: &[u32]) -> Vec<(u32, Range<usize>)> {
    let mut runs: Vec<(u32, Range<usize>)> = Vec::new();
    for (i, &t) in targets.iter().enumerate() {
        match runs.last_mut() {
            Some((first, cols)) if *first + (cols.len() as u32) == t => cols.end = i + 1,
            _ => runs.push((t, i..i + 1)),
        }
    }
    runs
}

#[derive(Clone, Debug, PartialEq)]
pub struct SheetReport {
    /// Configured sheet name.
    pub sheet: String,
    /// Name the configured sheet resolved to in the workbook.
    pub resolved: Option<String>,
    pub state: SheetState,
    /// Furthest state reached before finishing or aborting.
    pub reached: SheetState,
    pub skipped: Option<SkipReason>,
    pub error: Option<MergeError>,
    pub rows_merged: usize,
    pub plan: Option<AppendPlan>,
    pub columns: Vec<ColumnOutcome>,
    pub undated_files: Vec<PathBuf>,
    /// Set by the save fallback: whether the appended values made it into
    /// the copy. `None` when no replay was attempted.
    pub replayed: Option<bool>,
}

impl SheetReport {
    pub(crate) fn new(sheet: &str) -> Self {
        Self {
            sheet: sheet.to_string(),
            resolved: None,
            state: SheetState::Idle,
            reached: SheetState::Idle,
            skipped: None,
            error: None,
            rows_merged: 0,
            plan: None,
            columns: Vec::new(),
            undated_files: Vec::new(),
            replayed: None,
        }
    }

    fn skip(sheet: &str, reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::new(sheet)
        }
    }

    fn advance(&mut self, state: SheetState) {
        self.state = state;
        self.reached = state;
    }

    fn abort(&mut self, err: MergeError) {
        self.state = SheetState::Aborted;
        self.error = Some(err);
    }

    pub fn is_done(&self) -> bool {
        self.state == SheetState::Done
    }

    /// True once raw values were written, which is what the fallback replays.
    pub fn values_appended(&self) -> bool {
        self.reached >= SheetState::ValueAppended && self.plan.is_some()
    }

    pub fn columns_with(&self, status: ColumnStatus) -> usize {
        self.columns.iter().filter(|c| c.status == status).count()
    }
}

pub struct MergeCoordinator {
    aligner: SchemaAligner,
    filler: ParallelFormulaFiller,
    reporter: Reporter,
}

impl MergeCoordinator {
    pub fn new(filler: ParallelFormulaFiller, reporter: Reporter) -> Self {
        Self {
            aligner: SchemaAligner::new(),
            filler,
            reporter,
        }
    }

    pub fn filler(&self) -> &ParallelFormulaFiller {
        &self.filler
    }

    /// Merge every configured group of `run` into `workbook`, in
    /// configuration order.
    pub fn merge_all(&self, workbook: &Arc<dyn WorkbookHandle>, run: &MergeRun) -> Vec<SheetReport> {
        run.config()
            .groups
            .iter()
            .map(|group| {
                if !run.is_selected(&group.sheet) {
                    self.reporter.emit(
                        StatusEvent::info("not selected, skipped").sheet(group.sheet.as_str()),
                    );
                    return SheetReport::skip(&group.sheet, SkipReason::NotSelected);
                }
                match run.buffer(&group.sheet) {
                    Some(buffer) if !buffer.is_empty() => self.merge_sheet(workbook, group, buffer),
                    _ => {
                        self.reporter.emit(
                            StatusEvent::info("no sub-table data, skipped")
                                .sheet(group.sheet.as_str()),
                        );
                        SheetReport::skip(&group.sheet, SkipReason::NoSubData)
                    }
                }
            })
            .collect()
    }

    /// Run one sheet through the state machine.
    pub fn merge_sheet(
        &self,
        workbook: &Arc<dyn WorkbookHandle>,
        group: &SheetGroupConfig,
        buffer: &SubTableBuffer,
    ) -> SheetReport {
        let mut report = SheetReport::new(&group.sheet);
        if let Err(err) = self.drive(workbook, group, buffer, &mut report) {
            self.reporter.emit(
                StatusEvent::error(format!(
                    "merge aborted after {:?}: {err}",
                    report.reached
                ))
                .sheet(group.sheet.as_str()),
            );
            report.abort(err);
        }
        report
    }

    fn drive(
        &self,
        workbook: &Arc<dyn WorkbookHandle>,
        group: &SheetGroupConfig,
        buffer: &SubTableBuffer,
        report: &mut SheetReport,
    ) -> Result<(), MergeError> {
        let names = workbook.sheet_names()?;
        let (name, matched) = resolve_sheet_name(&names, &group.sheet)
            .ok_or_else(|| MergeError::MissingSheet(group.sheet.clone()))?;
        if matched != SheetMatch::Exact {
            self.reporter.emit(
                StatusEvent::info(format!("using sheet '{name}' ({matched:?} match)"))
                    .sheet(group.sheet.as_str()),
            );
        }
        report.resolved = Some(name.clone());
        let sheet = SheetHandle::new(workbook.clone(), name.as_str());

        // RangeRead
        let (last_row, last_col) = sheet.used_bounds()?.ok_or(MergeError::NoDataColumns)?;
        if last_col < group.data_start_column.index() {
            return Err(MergeError::NoDataColumns);
        }
        let end_col = Column::from_index(last_col).map_err(|e| MergeError::Table(e.to_string()))?;
        let region = sheet.read_range(group.data_start_column, 1, end_col, last_row)?;
        report.advance(SheetState::RangeRead);
        self.reporter.emit(
            StatusEvent::debug(format!(
                "master region {}1:{end_col}{last_row} has {} column(s)",
                group.data_start_column,
                region.width()
            ))
            .sheet(group.sheet.as_str()),
        );

        // SchemaAligned
        let aligned = self.aligner.align(&region, buffer.table().clone())?;
        if aligned.kept_last_column {
            self.reporter.emit(
                StatusEvent::warning("every sub-table column is blank; keeping the first")
                    .sheet(group.sheet.as_str()),
            );
        }
        if !aligned.dropped_columns.is_empty() || aligned.dropped_rows > 0 {
            self.reporter.emit(
                StatusEvent::debug(format!(
                    "dropped {} blank column(s) and {} trailing blank row(s)",
                    aligned.dropped_columns.len(),
                    aligned.dropped_rows
                ))
                .sheet(group.sheet.as_str()),
            );
        }
        report.advance(SheetState::SchemaAligned);

        let values = aligned.sub_table;
        if aligned.targets.last().is_some_and(|&t| t as usize + 1 != aligned.targets.len()) {
            self.reporter.emit(
                StatusEvent::debug("sub-table columns skip blank master column(s)")
                    .sheet(group.sheet.as_str()),
            );
        }
        let height = values.height();
        let Some(range) = AppendRange::new(locate(&sheet.read_column(group.data_start_column)?), height)
        else {
            self.reporter.emit(
                StatusEvent::info("sub-table has no rows after trimming").sheet(group.sheet.as_str()),
            );
            report.advance(SheetState::Done);
            return Ok(());
        };

        // ValueAppended
        let mut dates = Vec::new();
        if group.date_column.is_some() {
            let (cells, undated) = buffer.date_cells();
            for path in &undated {
                self.reporter.emit(
                    StatusEvent::warning(format!(
                        "no _YYYYMMDD_ date in file name {}; writing '{}'",
                        crate::classify::display_name(path),
                        crate::dates::DATE_SENTINEL
                    ))
                    .sheet(group.sheet.as_str()),
                );
            }
            report.undated_files = undated;
            dates = cells;
            dates.truncate(height);
        }
        let plan = AppendPlan {
            sheet: name.clone(),
            data_start: group.data_start_column,
            targets: aligned.targets,
            range,
            values,
            date_column: group.date_column,
            dates,
        };
        plan.apply(&sheet)?;
        report.rows_merged = height;
        report.plan = Some(plan);
        report.advance(SheetState::ValueAppended);
        self.reporter.emit(
            StatusEvent::info(format!(
                "appended {height} row(s) at rows {}..{}",
                range.start, range.end
            ))
            .sheet(group.sheet.as_str())
            .counts(EventCounts {
                attempted: height,
                succeeded: height,
                failed: 0,
            }),
        );

        // FormulaFilled
        let last_row = sheet.last_row()?;
        report.columns = self.filler.fill(&sheet, group.formula_end_column, last_row);
        self.filler.clear_cache();
        report.advance(SheetState::FormulaFilled);

        report.advance(SheetState::Done);
        Ok(())
    }
}
