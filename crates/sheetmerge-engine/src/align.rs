//! Schema alignment of a sub-table against the master's data region.

use crate::error::MergeError;
use sheetmerge_common::Table;

/// Placeholder header for a blank column at 1-based `position`.
pub fn placeholder(position: usize) -> String {
    format!("Column_{position}")
}

/// Result of a successful alignment.
#[derive(Clone, Debug, PartialEq)]
pub struct Aligned {
    /// Master headers after placeholder repair, one per sub-table column.
    pub master_headers: Vec<String>,
    /// Sub-table renamed to `master_headers`, with trailing blank rows dropped.
    pub sub_table: Table,
    /// 0-based position within the master region that each sub-table column
    /// is written to. Skips master columns dropped as blank.
    pub targets: Vec<u32>,
    /// Sub-table columns dropped as blank.
    pub dropped_columns: Vec<usize>,
    pub dropped_rows: usize,
    /// Every sub-table column qualified for dropping; the first one was kept.
    pub kept_last_column: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SchemaAligner;

impl SchemaAligner {
    pub fn new() -> Self {
        Self
    }

    /// Align `sub` to `master`.
    ///
    /// A sub-table as wide as the raw master region maps onto it column for
    /// column. Otherwise both tables are repaired the same way (blank-header
    /// all-blank columns dropped) and must then agree on column count; each
    /// surviving sub column keeps the position of its master counterpart.
    /// Blank headers get placeholders and trailing blank rows are trimmed
    /// either way.
    pub fn align(&self, master: &Table, sub: Table) -> Result<Aligned, MergeError> {
        if master.width() == 0 {
            return Err(MergeError::NoDataColumns);
        }

        let master_headers = placeholder_headers(master);
        let mut sub = sub;
        let (targets, repair) = if sub.width() == master.width() {
            ((0..master.width()).collect::<Vec<_>>(), ColumnRepair::default())
        } else {
            let (keep, _) = keep_mask(master);
            let kept = positions(&keep, true);
            (kept, repair_columns(&mut sub))
        };
        let dropped_rows = trim_trailing_blank_rows(&mut sub);

        if sub.width() != targets.len() {
            return Err(MergeError::SchemaMismatch {
                master: targets.len(),
                sub: sub.width(),
            });
        }

        let master_headers: Vec<String> =
            targets.iter().map(|&t| master_headers[t].clone()).collect();
        sub.set_headers(master_headers.iter().cloned().map(Some).collect())
            .map_err(|e| MergeError::Table(e.to_string()))?;

        let targets = targets
            .into_iter()
            .map(|t| u32::try_from(t).map_err(|e| MergeError::Table(e.to_string())))
            .collect::<Result<_, _>>()?;

        Ok(Aligned {
            master_headers,
            sub_table: sub,
            targets,
            dropped_columns: repair.dropped,
            dropped_rows,
            kept_last_column: repair.kept_last,
        })
    }
}

#[derive(Default)]
struct ColumnRepair {
    dropped: Vec<usize>,
    kept_last: bool,
}

/// Columns that survive trimming: not (blank header and all-blank cells).
/// The first column is kept when none would be; the flag reports that.
fn keep_mask(table: &Table) -> (Vec<bool>, bool) {
    let width = table.width();
    let mut keep: Vec<bool> = (0..width)
        .map(|c| !(table.header_is_blank(c) && table.column_is_blank(c)))
        .collect();
    if width > 0 && keep.iter().all(|k| !k) {
        keep[0] = true;
        return (keep, true);
    }
    (keep, false)
}

fn positions(keep: &[bool], wanted: bool) -> Vec<usize> {
    keep.iter()
        .enumerate()
        .filter_map(|(i, k)| (*k == wanted).then_some(i))
        .collect()
}

/// Drop the columns [`keep_mask`] rejects. At least one column always
/// survives.
fn repair_columns(table: &mut Table) -> ColumnRepair {
    let (keep, kept_last) = keep_mask(table);
    let dropped = positions(&keep, false);
    table.retain_columns(&keep);
    ColumnRepair { dropped, kept_last }
}

/// Trimmed header text, or `Column_{n}` for a blank header.
fn placeholder_headers(table: &Table) -> Vec<String> {
    table
        .headers()
        .iter()
        .enumerate()
        .map(|(i, h)| match h.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => placeholder(i + 1),
        })
        .collect()
}

/// Drop the blank tail of the table; interior blank rows stay. Returns the
/// number of rows removed.
pub fn trim_trailing_blank_rows(table: &mut Table) -> usize {
    let height = table.height();
    let keep = (0..height)
        .rev()
        .find(|&r| !table.row_is_blank(r))
        .map(|r| r + 1)
        .unwrap_or(0);
    table.truncate_rows(keep);
    height - keep
}
