//! Per-run state: configuration, selection, loaded sub-tables and counters.

use crate::classify::{Classification, display_name};
use crate::config::MergeConfig;
use crate::coordinator::{MergeCoordinator, SheetState};
use crate::dates::{date_cell, date_from_file_name};
use crate::error::RunError;
use crate::events::{Reporter, StatusEvent};
use crate::fill::{ColumnStatus, ParallelFormulaFiller};
use crate::persist::PersistenceStrategy;
use crate::summary::RunSummary;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use sheetmerge_common::{CellValue, Table, TableError};
use sheetmerge_io::{TableLoader, WorkbookStore};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// One file that contributed rows to a buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub rows: usize,
}

/// Sub-tables accumulated for one sheet, concatenated positionally.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubTableBuffer {
    table: Option<Table>,
    sources: Vec<SourceFile>,
}

impl SubTableBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one file's table. The first file fixes the column count; a file
    /// with a different count is rejected and the buffer is unchanged.
    pub fn append(&mut self, path: impl Into<PathBuf>, table: Table) -> Result<usize, TableError> {
        let rows = table.height();
        match &mut self.table {
            Some(existing) => existing.append(table)?,
            None => self.table = Some(table),
        }
        self.sources.push(SourceFile {
            path: path.into(),
            rows,
        });
        Ok(rows)
    }

    pub fn table(&self) -> &Table {
        static EMPTY: Table = Table::EMPTY;
        self.table.as_ref().unwrap_or(&EMPTY)
    }

    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    pub fn width(&self) -> usize {
        self.table().width()
    }

    pub fn rows(&self) -> usize {
        self.table().height()
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// One date cell per buffered row, by source file, plus the files whose
    /// names carry no date.
    pub fn date_cells(&self) -> (Vec<CellValue>, Vec<PathBuf>) {
        let mut cells = Vec::with_capacity(self.rows());
        let mut undated = Vec::new();
        for source in &self.sources {
            let date = date_from_file_name(&source.path);
            if date.is_none() {
                undated.push(source.path.clone());
            }
            let cell = date_cell(date);
            cells.extend(std::iter::repeat_n(cell, source.rows));
        }
        (cells, undated)
    }

    pub fn clear(&mut self) {
        self.table = None;
        self.sources.clear();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub files_loaded: usize,
    pub files_failed: usize,
    /// Loaded but rejected for a column-count disagreement.
    pub files_rejected: usize,
    pub files_unrecognized: usize,
    pub rows_loaded: usize,
    pub sheets_done: usize,
    pub sheets_aborted: usize,
    pub sheets_skipped: usize,
    pub rows_merged: usize,
    pub formula_rows_succeeded: usize,
    pub formula_rows_failed: usize,
    pub formula_columns_failed: usize,
    /// Sheets whose appended values did not reach the fallback copy.
    pub sheets_replay_failed: usize,
}

/// Everything one merge invocation needs.
#[derive(Debug)]
pub struct MergeRun {
    config: MergeConfig,
    selected: FxHashSet<String>,
    buffers: FxHashMap<String, SubTableBuffer>,
    counters: RunCounters,
    reporter: Reporter,
}

impl MergeRun {
    /// A run over `config` with every group selected.
    pub fn new(config: MergeConfig, reporter: Reporter) -> Self {
        let selected = config.sheet_names().map(str::to_string).collect();
        Self {
            config,
            selected,
            buffers: FxHashMap::default(),
            counters: RunCounters::default(),
            reporter,
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    /// Restrict the run to `sheets`. Names that are not configured are
    /// reported and ignored.
    pub fn select<I, S>(&mut self, sheets: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.selected.clear();
        for sheet in sheets {
            let sheet = sheet.as_ref();
            if self.config.group(sheet).is_some() {
                self.selected.insert(sheet.to_string());
            } else {
                self.reporter.emit(StatusEvent::warning(format!(
                    "'{sheet}' is not a configured sheet; ignored"
                )));
            }
        }
    }

    pub fn select_all(&mut self) {
        self.selected = self.config.sheet_names().map(str::to_string).collect();
    }

    pub fn is_selected(&self, sheet: &str) -> bool {
        self.selected.contains(sheet)
    }

    pub fn buffer(&self, sheet: &str) -> Option<&SubTableBuffer> {
        self.buffers.get(sheet)
    }

    /// Add an already loaded table for `sheet`.
    pub fn add_table(&mut self, sheet: &str, path: &Path, table: Table) -> bool {
        let buffer = self.buffers.entry(sheet.to_string()).or_default();
        let width = table.width();
        match buffer.append(path, table) {
            Ok(rows) => {
                self.counters.files_loaded += 1;
                self.counters.rows_loaded += rows;
                self.reporter.emit(
                    StatusEvent::debug(format!("loaded {} ({rows} row(s))", display_name(path)))
                        .sheet(sheet),
                );
                true
            }
            Err(_) => {
                self.counters.files_rejected += 1;
                self.reporter.emit(
                    StatusEvent::warning(format!(
                        "{} has {width} column(s) but earlier files have {}; skipped",
                        display_name(path),
                        buffer.width()
                    ))
                    .sheet(sheet),
                );
                false
            }
        }
    }

    /// Load `paths` into `sheet`'s buffer. A file that fails to load is
    /// reported and skipped. Returns the number of files added.
    pub fn load_sources<P: AsRef<Path>>(&mut self, loader: &TableLoader, sheet: &str, paths: &[P]) -> usize {
        let mut added = 0;
        for path in paths {
            let path = path.as_ref();
            match loader.load(path) {
                Ok(table) => {
                    if self.add_table(sheet, path, table) {
                        added += 1;
                    }
                }
                Err(e) => {
                    self.counters.files_failed += 1;
                    self.reporter
                        .emit(StatusEvent::error(format!("cannot load {}: {e}", display_name(path))).sheet(sheet));
                }
            }
        }
        if let Some(buffer) = self.buffers.get(sheet) {
            self.reporter.emit(
                StatusEvent::info(format!(
                    "{} file(s), {} row(s) buffered",
                    buffer.sources().len(),
                    buffer.rows()
                ))
                .sheet(sheet),
            );
        }
        added
    }

    /// Load every classified file into its group's buffer.
    pub fn load_classified(&mut self, loader: &TableLoader, classification: &Classification) -> usize {
        classification.report(&self.reporter);
        self.counters.files_unrecognized += classification.unrecognized.len();
        classification
            .groups
            .iter()
            .filter(|(_, files)| !files.is_empty())
            .map(|(sheet, files)| self.load_sources(loader, sheet, files))
            .sum()
    }

    pub fn clear_sources(&mut self) {
        self.buffers.clear();
    }

    /// Open `master` through `store`, merge every selected group, persist,
    /// and summarize.
    pub fn execute(&mut self, store: &dyn WorkbookStore, master: &Path) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let workbook = store.open(master).map_err(|source| RunError::Open {
            path: master.to_path_buf(),
            source,
        })?;

        let filler = ParallelFormulaFiller::new(self.config.filler.clone(), self.reporter.clone());
        let coordinator = MergeCoordinator::new(filler, self.reporter.clone());
        let mut reports = coordinator.merge_all(&workbook, self);

        let strategy = PersistenceStrategy::new(store, &self.config.fallback_prefix, self.reporter.clone());
        let persisted = strategy.persist(&workbook, master, &mut reports);
        workbook.close();
        let artifact = persisted?;

        for report in &reports {
            match (report.state, report.skipped) {
                (_, Some(_)) => self.counters.sheets_skipped += 1,
                (SheetState::Done, None) => self.counters.sheets_done += 1,
                (SheetState::Aborted, None) => self.counters.sheets_aborted += 1,
                _ => {}
            }
            if report.replayed == Some(false) {
                self.counters.sheets_replay_failed += 1;
            } else {
                self.counters.rows_merged += report.rows_merged;
            }
            for column in &report.columns {
                self.counters.formula_rows_succeeded += column.rows_succeeded;
                self.counters.formula_rows_failed += column.rows_failed;
                if matches!(column.status, ColumnStatus::Failed | ColumnStatus::TimedOut) {
                    self.counters.formula_columns_failed += 1;
                }
            }
        }

        let summary = RunSummary::new(master, artifact, &reports, self.counters, started.elapsed());
        self.reporter.emit(StatusEvent::info(summary.headline()));
        Ok(summary)
    }
}
