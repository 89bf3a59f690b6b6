#![cfg(feature = "umya")]

use crate::error::{IoError, WriteError};
use crate::traits::{WorkbookHandle, WorkbookStore};
use parking_lot::RwLock;
use sheetmerge_common::CellValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use umya_spreadsheet::{CellRawValue, Spreadsheet, Worksheet, reader::xlsx};

/// xlsx/xlsm workbook backed by `umya-spreadsheet`.
///
/// The whole workbook is held in memory; `save` rewrites the file it was
/// opened from.
pub struct UmyaWorkbook {
    workbook: RwLock<Spreadsheet>,
    original_path: Option<PathBuf>,
}

impl UmyaWorkbook {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        // Full read (not lazy) so that save does not trip over undeserialized sheets.
        let book = xlsx::read(path.as_ref()).map_err(|e| IoError::from_backend("umya", e))?;
        Ok(Self {
            workbook: RwLock::new(book),
            original_path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Wrap an already built spreadsheet; such a workbook can only be saved
    /// through [`UmyaWorkbook::save_as`].
    pub fn from_spreadsheet(book: Spreadsheet) -> Self {
        Self {
            workbook: RwLock::new(book),
            original_path: None,
        }
    }

    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<(), IoError> {
        let mut wb = self.workbook.write();
        Self::deserialize_all(&mut wb);
        umya_spreadsheet::writer::xlsx::write(&*wb, path.as_ref())
            .map_err(|e| IoError::from_backend("umya", e))
    }

    fn deserialize_all(wb: &mut Spreadsheet) {
        let count = wb.get_sheet_count();
        for i in 0..count {
            wb.read_sheet(i);
        }
    }

    fn convert_cell_value(cv: &umya_spreadsheet::CellValue) -> CellValue {
        let raw = cv.get_raw_value();
        if raw.is_error() {
            return CellValue::Text(cv.get_value().to_string());
        }
        match raw {
            CellRawValue::Numeric(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    CellValue::Int(*n as i64)
                } else {
                    CellValue::Number(*n)
                }
            }
            CellRawValue::Bool(b) => CellValue::Boolean(*b),
            CellRawValue::String(s) => CellValue::Text(s.to_string()),
            CellRawValue::RichText(rt) => CellValue::Text(rt.get_text().to_string()),
            CellRawValue::Lazy(s) => CellValue::infer(s.as_ref()),
            CellRawValue::Error(_) | CellRawValue::Empty => CellValue::Empty,
        }
    }

    fn read_cell(ws: &Worksheet, row: u32, col: u32) -> CellValue {
        ws.get_cell((col, row))
            .map(|cell| Self::convert_cell_value(cell.get_cell_value()))
            .unwrap_or_default()
    }
}

impl WorkbookHandle for UmyaWorkbook {
    fn sheet_names(&self) -> Result<Vec<String>, IoError> {
        let wb = self.workbook.read();
        let count = wb.get_sheet_count();
        Ok((0..count)
            .filter_map(|i| wb.get_sheet(&i).map(|s| s.get_name().to_string()))
            .collect())
    }

    fn used_bounds(&self, sheet: &str) -> Result<Option<(u32, u32)>, IoError> {
        let wb = self.workbook.read();
        let ws = wb
            .get_sheet_by_name(sheet)
            .ok_or_else(|| IoError::SheetNotFound(sheet.to_string()))?;
        let mut bounds: Option<(u32, u32)> = None;
        for cell in ws.get_cell_collection() {
            let cv = cell.get_cell_value();
            if cv.get_raw_value().is_empty() && !cv.is_formula() {
                continue;
            }
            let coord = cell.get_coordinate();
            let (r, c) = (*coord.get_row_num(), *coord.get_col_num());
            bounds = Some(match bounds {
                Some((mr, mc)) => (mr.max(r), mc.max(c)),
                None => (r, c),
            });
        }
        Ok(bounds)
    }

    fn read_values(
        &self,
        sheet: &str,
        start: (u32, u32),
        end: (u32, u32),
    ) -> Result<Vec<Vec<CellValue>>, IoError> {
        let wb = self.workbook.read();
        let ws = wb
            .get_sheet_by_name(sheet)
            .ok_or_else(|| IoError::SheetNotFound(sheet.to_string()))?;
        Ok((start.0..=end.0)
            .map(|r| (start.1..=end.1).map(|c| Self::read_cell(ws, r, c)).collect())
            .collect())
    }

    fn read_formula(&self, sheet: &str, row: u32, col: u32) -> Result<Option<String>, IoError> {
        let wb = self.workbook.read();
        let ws = wb
            .get_sheet_by_name(sheet)
            .ok_or_else(|| IoError::SheetNotFound(sheet.to_string()))?;
        Ok(ws.get_cell((col, row)).and_then(|cell| {
            let cv = cell.get_cell_value();
            if !cv.is_formula() {
                return None;
            }
            let f = cv.get_formula();
            if f.is_empty() {
                None
            } else if f.starts_with('=') {
                Some(f.to_string())
            } else {
                Some(format!("={f}"))
            }
        }))
    }

    fn write_values(
        &self,
        sheet: &str,
        row: u32,
        col: u32,
        values: &[Vec<CellValue>],
    ) -> Result<(), IoError> {
        let mut wb = self.workbook.write();
        let ws = wb
            .get_sheet_by_name_mut(sheet)
            .ok_or_else(|| IoError::SheetNotFound(sheet.to_string()))?;
        for (dr, line) in values.iter().enumerate() {
            for (dc, value) in line.iter().enumerate() {
                // umya uses (col, row)
                let cell = ws.get_cell_mut((col + dc as u32, row + dr as u32));
                match value {
                    CellValue::Number(n) => {
                        cell.set_value_number(*n);
                    }
                    CellValue::Int(i) => {
                        cell.set_value_number(*i as f64);
                    }
                    CellValue::Boolean(b) => {
                        cell.set_value_bool(*b);
                    }
                    CellValue::Text(s) => {
                        cell.set_value(s.clone());
                    }
                    CellValue::Empty => {
                        cell.set_blank();
                    }
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
        let mut wb = self.workbook.write();
        let ws = wb
            .get_sheet_by_name_mut(sheet)
            .ok_or_else(|| WriteError::permanent(format!("sheet '{sheet}' not found")))?;
        for (i, f) in formulas.iter().enumerate() {
            let cell = ws.get_cell_mut((col, start_row + i as u32));
            // umya stores formulas without the leading '='
            cell.set_formula(f.strip_prefix('=').unwrap_or(f));
        }
        Ok(())
    }

    fn save(&self) -> Result<(), IoError> {
        let path = self.original_path.as_ref().ok_or_else(|| {
            IoError::Unsupported("in-place save unavailable: no original path".into())
        })?;
        self.save_as(path)
    }

    fn path(&self) -> Option<&Path> {
        self.original_path.as_deref()
    }
}

/// File-system store: opens xlsx/xlsm through [`UmyaWorkbook`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FsStore;

impl WorkbookStore for FsStore {
    fn open(&self, path: &Path) -> Result<Arc<dyn WorkbookHandle>, IoError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("xlsx") | Some("xlsm") => Ok(Arc::new(UmyaWorkbook::open_path(path)?)),
            _ => Err(IoError::Unsupported(format!(
                "cannot open {} as a master workbook (xlsx/xlsm only)",
                path.display()
            ))),
        }
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<(), IoError> {
        std::fs::copy(from, to).map_err(|e| IoError::file(to, e))?;
        Ok(())
    }
}
