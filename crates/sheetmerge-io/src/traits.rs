use crate::error::{IoError, WriteError};
use sheetmerge_common::{CellValue, Column, Table};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cell-level access to an open workbook.
///
/// Coordinates are 1-based `(row, col)`. Implementations must tolerate
/// concurrent calls: the formula filler writes disjoint columns of the same
/// sheet from several threads at once.
pub trait WorkbookHandle: Send + Sync {
    fn sheet_names(&self) -> Result<Vec<String>, IoError>;

    /// `(last_row, last_col)` over cells holding a value or a formula, `None`
    /// for a sheet without any.
    fn used_bounds(&self, sheet: &str) -> Result<Option<(u32, u32)>, IoError>;

    /// Values of the inclusive rectangle `start..=end`, row-major. Missing
    /// cells read as `Empty`.
    fn read_values(
        &self,
        sheet: &str,
        start: (u32, u32),
        end: (u32, u32),
    ) -> Result<Vec<Vec<CellValue>>, IoError>;

    /// Formula text (with leading `=`) of one cell, if it holds a formula.
    fn read_formula(&self, sheet: &str, row: u32, col: u32) -> Result<Option<String>, IoError>;

    /// Write a block of raw values with its top-left corner at `(row, col)`.
    fn write_values(
        &self,
        sheet: &str,
        row: u32,
        col: u32,
        values: &[Vec<CellValue>],
    ) -> Result<(), IoError>;

    /// Write `formulas[i]` into `(start_row + i, col)` as a single operation.
    fn write_formulas(
        &self,
        sheet: &str,
        col: u32,
        start_row: u32,
        formulas: &[String],
    ) -> Result<(), WriteError>;

    fn save(&self) -> Result<(), IoError>;

    /// Path the workbook was opened from, when file-backed.
    fn path(&self) -> Option<&Path>;

    fn close(&self) {}
}

/// Opens workbooks and copies artifacts. Used by the save fallback.
pub trait WorkbookStore: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn WorkbookHandle>, IoError>;
    fn copy(&self, from: &Path, to: &Path) -> Result<(), IoError>;
}

/// A workbook handle bound to one sheet.
///
/// Cheap to clone; worker threads each hold their own copy.
#[derive(Clone)]
pub struct SheetHandle {
    workbook: Arc<dyn WorkbookHandle>,
    sheet: String,
}

impl SheetHandle {
    pub fn new(workbook: Arc<dyn WorkbookHandle>, sheet: impl Into<String>) -> Self {
        Self {
            workbook,
            sheet: sheet.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.sheet
    }

    pub fn workbook(&self) -> &Arc<dyn WorkbookHandle> {
        &self.workbook
    }

    pub fn used_bounds(&self) -> Result<Option<(u32, u32)>, IoError> {
        self.workbook.used_bounds(&self.sheet)
    }

    /// Last used row, 0 for an empty sheet.
    pub fn last_row(&self) -> Result<u32, IoError> {
        Ok(self.used_bounds()?.map(|(r, _)| r).unwrap_or(0))
    }

    /// Read the inclusive rectangle as a table whose header is the first row
    /// of the rectangle.
    pub fn read_range(
        &self,
        col_start: Column,
        row_start: u32,
        col_end: Column,
        row_end: u32,
    ) -> Result<Table, IoError> {
        if col_end < col_start || row_end < row_start {
            return Ok(Table::default());
        }
        let mut grid = self.workbook.read_values(
            &self.sheet,
            (row_start, col_start.index()),
            (row_end, col_end.index()),
        )?;
        if grid.is_empty() {
            return Ok(Table::default());
        }
        let headers = grid.remove(0).iter().map(CellValue::to_header).collect();
        Ok(Table::from_ragged(headers, grid))
    }

    /// Every value of `col` from row 1 through the last used row.
    pub fn read_column(&self, col: Column) -> Result<Vec<CellValue>, IoError> {
        let last = self.last_row()?;
        if last == 0 {
            return Ok(Vec::new());
        }
        let grid = self
            .workbook
            .read_values(&self.sheet, (1, col.index()), (last, col.index()))?;
        Ok(grid
            .into_iter()
            .map(|mut r| if r.is_empty() { CellValue::Empty } else { r.swap_remove(0) })
            .collect())
    }

    /// Write the rows of `table` (not its header) starting at `(row, col)`.
    pub fn write_block(&self, col: Column, row: u32, table: &Table) -> Result<(), IoError> {
        if table.is_empty() {
            return Ok(());
        }
        self.workbook
            .write_values(&self.sheet, row, col.index(), table.rows())
    }

    /// Write a single column of values downward from `(row, col)`.
    pub fn write_column(&self, col: Column, row: u32, values: &[CellValue]) -> Result<(), IoError> {
        if values.is_empty() {
            return Ok(());
        }
        let grid: Vec<Vec<CellValue>> = values.iter().map(|v| vec![v.clone()]).collect();
        self.workbook.write_values(&self.sheet, row, col.index(), &grid)
    }

    pub fn read_formula(&self, col: Column, row: u32) -> Result<Option<String>, IoError> {
        self.workbook.read_formula(&self.sheet, row, col.index())
    }

    pub fn write_formulas(
        &self,
        col: Column,
        start_row: u32,
        formulas: &[String],
    ) -> Result<(), WriteError> {
        self.workbook
            .write_formulas(&self.sheet, col.index(), start_row, formulas)
    }
}

impl std::fmt::Debug for SheetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetHandle")
            .field("sheet", &self.sheet)
            .field("path", &self.workbook.path().map(PathBuf::from))
            .finish()
    }
}
