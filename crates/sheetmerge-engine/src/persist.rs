//! Saving the merged master, with a copy-based fallback.

use crate::classify::display_name;
use crate::coordinator::SheetReport;
use crate::error::PersistenceError;
use crate::events::{Reporter, StatusEvent};
use serde::Serialize;
use sheetmerge_io::{IoError, SheetHandle, WorkbookHandle, WorkbookStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the merged result ended up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ResultArtifact {
    Original(PathBuf),
    Fallback(PathBuf),
}

impl ResultArtifact {
    pub fn path(&self) -> &Path {
        match self {
            ResultArtifact::Original(p) | ResultArtifact::Fallback(p) => p,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ResultArtifact::Fallback(_))
    }
}

/// `<dir of master>/<prefix><master file name>`.
pub fn fallback_path(master: &Path, prefix: &str) -> PathBuf {
    let name = format!("{prefix}{}", display_name(master));
    match master.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

pub struct PersistenceStrategy<'a> {
    store: &'a dyn WorkbookStore,
    prefix: &'a str,
    reporter: Reporter,
}

impl<'a> PersistenceStrategy<'a> {
    pub fn new(store: &'a dyn WorkbookStore, prefix: &'a str, reporter: Reporter) -> Self {
        Self {
            store,
            prefix,
            reporter,
        }
    }

    /// Save `workbook` in place. If that fails, copy the untouched `master`
    /// to the fallback path, replay the appended values of every sheet that
    /// got that far, and save the copy instead. Formulas are not replayed.
    ///
    /// On the fallback path each replayed report gets `replayed` set to
    /// whether its values reached the copy.
    pub fn persist(
        &self,
        workbook: &Arc<dyn WorkbookHandle>,
        master: &Path,
        reports: &mut [SheetReport],
    ) -> Result<ResultArtifact, PersistenceError> {
        let primary = match workbook.save() {
            Ok(()) => {
                self.reporter.emit(StatusEvent::info(format!(
                    "saved {}",
                    master.display()
                )));
                return Ok(ResultArtifact::Original(master.to_path_buf()));
            }
            Err(e) => e,
        };
        let target = fallback_path(master, self.prefix);
        self.reporter.emit(StatusEvent::warning(format!(
            "saving {} failed ({primary}); writing {} instead",
            display_name(master),
            target.display()
        )));

        self.fallback(master, &target, reports)
            .map_err(|fallback| PersistenceError {
                primary: primary.to_string(),
                fallback_path: target.clone(),
                fallback: fallback.to_string(),
            })
            .inspect_err(|e| self.reporter.emit(StatusEvent::error(e.to_string())))?;

        self.reporter.emit(StatusEvent::warning(format!(
            "merged values saved to {}; formulas were not filled there",
            target.display()
        )));
        Ok(ResultArtifact::Fallback(target))
    }

    fn fallback(
        &self,
        master: &Path,
        target: &Path,
        reports: &mut [SheetReport],
    ) -> Result<(), IoError> {
        self.store.copy(master, target)?;
        let copy = self.store.open(target)?;
        for report in reports.iter_mut().filter(|r| r.values_appended()) {
            let Some(plan) = &report.plan else { continue };
            let sheet = SheetHandle::new(copy.clone(), plan.sheet.as_str());
            let replayed = match plan.apply(&sheet) {
                Ok(()) => {
                    self.reporter.emit(
                        StatusEvent::debug(format!("replayed {} row(s)", plan.values.height()))
                            .sheet(report.sheet.as_str()),
                    );
                    true
                }
                Err(e) => {
                    self.reporter.emit(
                        StatusEvent::error(format!("replay into {} failed: {e}", target.display()))
                            .sheet(report.sheet.as_str()),
                    );
                    false
                }
            };
            report.replayed = Some(replayed);
        }
        let saved = copy.save();
        copy.close();
        if saved.is_err() {
            for report in reports.iter_mut() {
                report.replayed = report.replayed.map(|_| false);
            }
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{AppendPlan, SheetState};
    use crate::events::{CollectingSink, Level};
    use crate::locate::AppendRange;
    use sheetmerge_common::{CellValue, Column, Table};
    use sheetmerge_io::{MemoryStore, MemoryWorkbook, WriteError};

    /// Delegates to an inner workbook but refuses to save.
    struct Unsaveable(Arc<dyn WorkbookHandle>);

    impl WorkbookHandle for Unsaveable {
        fn sheet_names(&self) -> Result<Vec<String>, IoError> {
            self.0.sheet_names()
        }
        fn used_bounds(&self, sheet: &str) -> Result<Option<(u32, u32)>, IoError> {
            self.0.used_bounds(sheet)
        }
        fn read_values(
            &self,
            sheet: &str,
            start: (u32, u32),
            end: (u32, u32),
        ) -> Result<Vec<Vec<CellValue>>, IoError> {
            self.0.read_values(sheet, start, end)
        }
        fn read_formula(&self, sheet: &str, row: u32, col: u32) -> Result<Option<String>, IoError> {
            self.0.read_formula(sheet, row, col)
        }
        fn write_values(
            &self,
            sheet: &str,
            row: u32,
            col: u32,
            values: &[Vec<CellValue>],
        ) -> Result<(), IoError> {
            self.0.write_values(sheet, row, col, values)
        }
        fn write_formulas(
            &self,
            sheet: &str,
            col: u32,
            start_row: u32,
            formulas: &[String],
        ) -> Result<(), WriteError> {
            self.0.write_formulas(sheet, col, start_row, formulas)
        }
        fn save(&self) -> Result<(), IoError> {
            Err(IoError::Unsupported("file is locked".into()))
        }
        fn path(&self) -> Option<&Path> {
            self.0.path()
        }
    }

    fn report_with_plan() -> SheetReport {
        let values = Table::new(
            vec![Some("qty".into())],
            vec![vec![CellValue::Int(7)], vec![CellValue::Int(8)]],
        )
        .unwrap();
        let mut r = SheetReport::new("Data");
        r.state = SheetState::Done;
        r.reached = SheetState::Done;
        r.plan = Some(AppendPlan {
            sheet: "Data".into(),
            data_start: Column::parse("B").unwrap(),
            targets: vec![0],
            range: AppendRange::new(3, 2).unwrap(),
            values,
            date_column: Some(Column::A),
            dates: vec![CellValue::Int(20240101); 2],
        });
        r
    }

    fn seeded_store(master: &Path) -> MemoryStore {
        let wb = MemoryWorkbook::with_sheets(&["Data"]);
        wb.set_value("Data", 1, 2, "qty");
        wb.set_value("Data", 2, 2, 1);
        let store = MemoryStore::new();
        store.insert(master, &wb);
        store
    }

    #[test]
    fn fallback_path_keeps_directory() {
        assert_eq!(
            fallback_path(Path::new("/work/总表.xlsx"), "merged_"),
            PathBuf::from("/work/merged_总表.xlsx")
        );
        assert_eq!(fallback_path(Path::new("m.xlsx"), "x_"), PathBuf::from("x_m.xlsx"));
    }

    #[test]
    fn in_place_save_wins() {
        let master = Path::new("/w/master.xlsx");
        let store = seeded_store(master);
        let wb = store.open(master).unwrap();
        let strategy = PersistenceStrategy::new(&store, "merged_", Reporter::tracing(false));
        let artifact = strategy.persist(&wb, master, &mut []).unwrap();
        assert_eq!(artifact, ResultArtifact::Original(master.to_path_buf()));
        assert!(!store.contains(&fallback_path(master, "merged_")));
    }

    #[test]
    fn failed_save_replays_values_into_a_copy() {
        let master = Path::new("/w/master.xlsx");
        let store = seeded_store(master);
        let wb: Arc<dyn WorkbookHandle> = Arc::new(Unsaveable(store.open(master).unwrap()));
        let sink = Arc::new(CollectingSink::new());
        let strategy = PersistenceStrategy::new(&store, "merged_", Reporter::new(sink.clone(), false));

        let mut reports = [report_with_plan()];
        let artifact = strategy.persist(&wb, master, &mut reports).unwrap();
        assert!(artifact.is_fallback());
        assert_eq!(reports[0].replayed, Some(true));

        let copy = store.open_memory(artifact.path()).unwrap();
        assert_eq!(copy.value("Data", 3, 2), CellValue::Int(7));
        assert_eq!(copy.value("Data", 4, 2), CellValue::Int(8));
        assert_eq!(copy.value("Data", 4, 1), CellValue::Int(20240101));
        // the original is untouched
        let original = store.open_memory(master).unwrap();
        assert_eq!(original.value("Data", 3, 2), CellValue::Empty);
        assert!(sink.contains(Level::Warning, "merged_master.xlsx"));
    }

    #[test]
    fn replay_failure_is_recorded_per_sheet() {
        let master = Path::new("/w/master.xlsx");
        let store = seeded_store(master);
        let wb: Arc<dyn WorkbookHandle> = Arc::new(Unsaveable(store.open(master).unwrap()));
        let sink = Arc::new(CollectingSink::new());
        let strategy = PersistenceStrategy::new(&store, "merged_", Reporter::new(sink.clone(), false));

        let mut ghost = report_with_plan();
        ghost.sheet = "Ghost".into();
        if let Some(plan) = ghost.plan.as_mut() {
            plan.sheet = "Ghost".into();
        }
        let mut reports = [report_with_plan(), ghost, SheetReport::new("Idle")];
        let artifact = strategy.persist(&wb, master, &mut reports).unwrap();

        assert!(artifact.is_fallback());
        assert_eq!(reports[0].replayed, Some(true));
        assert_eq!(reports[1].replayed, Some(false));
        assert_eq!(reports[2].replayed, None);
        assert!(sink.contains(Level::Error, "replay into"));
    }

    #[test]
    fn both_saves_failing_is_an_error() {
        let master = Path::new("/w/missing.xlsx");
        let store = MemoryStore::new();
        let wb: Arc<dyn WorkbookHandle> = Arc::new(Unsaveable(Arc::new(MemoryWorkbook::new())));
        let strategy = PersistenceStrategy::new(&store, "merged_", Reporter::tracing(false));
        let err = strategy
            .persist(&wb, master, &mut [report_with_plan()])
            .unwrap_err();
        assert!(err.primary.contains("locked"));
        assert_eq!(err.fallback_path, PathBuf::from("/w/merged_missing.xlsx"));
    }
}
