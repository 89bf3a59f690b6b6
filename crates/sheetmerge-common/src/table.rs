//! In-memory rectangular tables: ordered (possibly blank) headers plus rows of
//! [`CellValue`]s. Every row has exactly as many cells as there are headers.

use std::error::Error;
use std::fmt;

use crate::CellValue;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TableError {
    /// A row's width disagrees with the header width.
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    /// Replacement headers have a different width.
    HeaderWidth { expected: usize, found: usize },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::RaggedRow {
                row,
                expected,
                found,
            } => write!(f, "row {row} has {found} cells, expected {expected}"),
            TableError::HeaderWidth { expected, found } => {
                write!(f, "expected {expected} headers, got {found}")
            }
        }
    }
}

impl Error for TableError {}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    headers: Vec<Option<String>>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub const EMPTY: Table = Table {
        headers: Vec::new(),
        rows: Vec::new(),
    };

    pub fn new(
        headers: Vec<Option<String>>,
        rows: Vec<Vec<CellValue>>,
    ) -> Result<Self, TableError> {
        let width = headers.len();
        if let Some((row, cells)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(TableError::RaggedRow {
                row,
                expected: width,
                found: cells.len(),
            });
        }
        Ok(Self { headers, rows })
    }

    /// Build from rows whose widths may differ, padding short rows with
    /// `Empty` and widening the header set to the widest row.
    pub fn from_ragged(mut headers: Vec<Option<String>>, mut rows: Vec<Vec<CellValue>>) -> Self {
        let width = rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(headers.len());
        headers.resize(width, None);
        for row in &mut rows {
            row.resize(width, CellValue::Empty);
        }
        Self { headers, rows }
    }

    pub fn with_headers(headers: Vec<Option<String>>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn headers(&self) -> &[Option<String>] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<CellValue>> {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn column(&self, col: usize) -> impl Iterator<Item = &CellValue> + '_ {
        self.rows.iter().filter_map(move |r| r.get(col))
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<(), TableError> {
        if row.len() != self.width() {
            return Err(TableError::RaggedRow {
                row: self.rows.len(),
                expected: self.width(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append `other`'s rows positionally. Headers of `other` are ignored.
    pub fn append(&mut self, other: Table) -> Result<(), TableError> {
        if other.width() != self.width() {
            return Err(TableError::HeaderWidth {
                expected: self.width(),
                found: other.width(),
            });
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    pub fn set_headers(&mut self, headers: Vec<Option<String>>) -> Result<(), TableError> {
        if headers.len() != self.width() {
            return Err(TableError::HeaderWidth {
                expected: self.width(),
                found: headers.len(),
            });
        }
        self.headers = headers;
        Ok(())
    }

    pub fn header_is_blank(&self, col: usize) -> bool {
        self.headers
            .get(col)
            .map(|h| h.as_deref().is_none_or(|s| s.trim().is_empty()))
            .unwrap_or(true)
    }

    pub fn column_is_blank(&self, col: usize) -> bool {
        self.column(col).all(CellValue::is_blank)
    }

    pub fn row_is_blank(&self, row: usize) -> bool {
        self.rows
            .get(row)
            .map(|r| r.iter().all(CellValue::is_blank))
            .unwrap_or(true)
    }

    /// Keep only the columns whose flag is `true`.
    pub fn retain_columns(&mut self, keep: &[bool]) {
        let mut idx = 0;
        self.headers.retain(|_| {
            let k = keep.get(idx).copied().unwrap_or(true);
            idx += 1;
            k
        });
        for row in &mut self.rows {
            let mut idx = 0;
            row.retain(|_| {
                let k = keep.get(idx).copied().unwrap_or(true);
                idx += 1;
                k
            });
        }
    }

    pub fn truncate_rows(&mut self, len: usize) {
        self.rows.truncate(len);
    }
}
