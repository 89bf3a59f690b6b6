use crate::error::{IoError, WriteError};
use crate::traits::{WorkbookHandle, WorkbookStore};
use parking_lot::{Mutex, RwLock};
use sheetmerge_common::CellValue;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Debug, Default, PartialEq)]
struct MemoryCell {
    value: CellValue,
    formula: Option<String>,
}

impl MemoryCell {
    fn is_used(&self) -> bool {
        self.formula.is_some() || self.value != CellValue::Empty
    }
}

type SheetCells = BTreeMap<(u32, u32), MemoryCell>;

#[derive(Clone, Debug, Default)]
struct WorkbookData {
    order: Vec<String>,
    sheets: HashMap<String, SheetCells>,
}

type FileMap = Arc<Mutex<HashMap<PathBuf, WorkbookData>>>;

/// In-process workbook. Backs tests and dry runs.
///
/// When opened from a [`MemoryStore`], `save` writes the current state back to
/// the store under the workbook's path.
#[derive(Debug, Default)]
pub struct MemoryWorkbook {
    data: RwLock<WorkbookData>,
    path: Option<PathBuf>,
    files: Option<FileMap>,
    saves: AtomicUsize,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheets(names: &[&str]) -> Self {
        let wb = Self::new();
        for name in names {
            wb.add_sheet(name);
        }
        wb
    }

    pub fn add_sheet(&self, name: &str) {
        let mut data = self.data.write();
        if !data.sheets.contains_key(name) {
            data.order.push(name.to_string());
            data.sheets.insert(name.to_string(), SheetCells::new());
        }
    }

    pub fn set_value(&self, sheet: &str, row: u32, col: u32, value: impl Into<CellValue>) {
        self.add_sheet(sheet);
        let mut data = self.data.write();
        if let Some(cells) = data.sheets.get_mut(sheet) {
            cells.insert(
                (row, col),
                MemoryCell {
                    value: value.into(),
                    formula: None,
                },
            );
        }
    }

    pub fn set_formula(&self, sheet: &str, row: u32, col: u32, formula: impl Into<String>) {
        self.add_sheet(sheet);
        let mut data = self.data.write();
        if let Some(cells) = data.sheets.get_mut(sheet) {
            cells.insert(
                (row, col),
                MemoryCell {
                    value: CellValue::Empty,
                    formula: Some(normalize_formula(formula.into())),
                },
            );
        }
    }

    /// Fill `row` with text headers starting at `col`.
    pub fn set_row(&self, sheet: &str, row: u32, col: u32, values: &[CellValue]) {
        for (i, v) in values.iter().enumerate() {
            self.set_value(sheet, row, col + i as u32, v.clone());
        }
    }

    pub fn value(&self, sheet: &str, row: u32, col: u32) -> CellValue {
        self.data
            .read()
            .sheets
            .get(sheet)
            .and_then(|cells| cells.get(&(row, col)))
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    pub fn formula(&self, sheet: &str, row: u32, col: u32) -> Option<String> {
        self.data
            .read()
            .sheets
            .get(sheet)
            .and_then(|cells| cells.get(&(row, col)))
            .and_then(|c| c.formula.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    fn with_sheet<T>(
        &self,
        sheet: &str,
        f: impl FnOnce(&SheetCells) -> T,
    ) -> Result<T, IoError> {
        let data = self.data.read();
        let cells = data
            .sheets
            .get(sheet)
            .ok_or_else(|| IoError::SheetNotFound(sheet.to_string()))?;
        Ok(f(cells))
    }
}

fn normalize_formula(formula: String) -> String {
    if formula.starts_with('=') {
        formula
    } else {
        format!("={formula}")
    }
}

impl WorkbookHandle for MemoryWorkbook {
    fn sheet_names(&self) -> Result<Vec<String>, IoError> {
        Ok(self.data.read().order.clone())
    }

    fn used_bounds(&self, sheet: &str) -> Result<Option<(u32, u32)>, IoError> {
        self.with_sheet(sheet, |cells| {
            cells
                .iter()
                .filter(|(_, c)| c.is_used())
                .fold(None, |acc: Option<(u32, u32)>, ((r, c), _)| {
                    Some(match acc {
                        Some((mr, mc)) => (mr.max(*r), mc.max(*c)),
                        None => (*r, *c),
                    })
                })
        })
    }

    fn read_values(
        &self,
        sheet: &str,
        start: (u32, u32),
        end: (u32, u32),
    ) -> Result<Vec<Vec<CellValue>>, IoError> {
        self.with_sheet(sheet, |cells| {
            (start.0..=end.0)
                .map(|r| {
                    (start.1..=end.1)
                        .map(|c| {
                            cells
                                .get(&(r, c))
                                .map(|cell| cell.value.clone())
                                .unwrap_or_default()
                        })
                        .collect()
                })
                .collect()
        })
    }

    fn read_formula(&self, sheet: &str, row: u32, col: u32) -> Result<Option<String>, IoError> {
        self.with_sheet(sheet, |cells| {
            cells.get(&(row, col)).and_then(|c| c.formula.clone())
        })
    }

    fn write_values(
        &self,
        sheet: &str,
        row: u32,
        col: u32,
        values: &[Vec<CellValue>],
    ) -> Result<(), IoError> {
        let mut data = self.data.write();
        let cells = data
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| IoError::SheetNotFound(sheet.to_string()))?;
        for (dr, line) in values.iter().enumerate() {
            for (dc, value) in line.iter().enumerate() {
                let key = (row + dr as u32, col + dc as u32);
                if *value == CellValue::Empty {
                    cells.remove(&key);
                } else {
                    cells.insert(
                        key,
                        MemoryCell {
                            value: value.clone(),
                            formula: None,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn write_formulas(
        &self,
        sheet: &str,
        col: u32,
        start_row: u32,
        formulas: &[String],
    ) -> Result<(), WriteError> {
        let mut data = self.data.write();
        let cells = data
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| WriteError::permanent(format!("sheet '{sheet}' not found")))?;
        for (i, f) in formulas.iter().enumerate() {
            cells.insert(
                (start_row + i as u32, col),
                MemoryCell {
                    value: CellValue::Empty,
                    formula: Some(normalize_formula(f.clone())),
                },
            );
        }
        Ok(())
    }

    fn save(&self) -> Result<(), IoError> {
        let (Some(path), Some(files)) = (&self.path, &self.files) else {
            return Err(IoError::Unsupported(
                "in-place save unavailable: no original path".into(),
            ));
        };
        files.lock().insert(path.clone(), self.data.read().clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Path-addressed collection of in-memory workbooks.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    files: FileMap,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot of `workbook` under `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, workbook: &MemoryWorkbook) {
        self.files
            .lock()
            .insert(path.into(), workbook.data.read().clone());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    /// Open a store entry as a concrete [`MemoryWorkbook`].
    pub fn open_memory(&self, path: &Path) -> Result<Arc<MemoryWorkbook>, IoError> {
        let data = self.files.lock().get(path).cloned().ok_or_else(|| {
            IoError::file(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such workbook"),
            )
        })?;
        Ok(Arc::new(MemoryWorkbook {
            data: RwLock::new(data),
            path: Some(path.to_path_buf()),
            files: Some(self.files.clone()),
            saves: AtomicUsize::new(0),
        }))
    }
}

impl WorkbookStore for MemoryStore {
    fn open(&self, path: &Path) -> Result<Arc<dyn WorkbookHandle>, IoError> {
        Ok(self.open_memory(path)?)
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<(), IoError> {
        let mut files = self.files.lock();
        let data = files.get(from).cloned().ok_or_else(|| {
            IoError::file(
                from,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such workbook"),
            )
        })?;
        files.insert(to.to_path_buf(), data);
        Ok(())
    }
}
