use sheetmerge_common::CellValue;

/// First row a merge may write into: one past the last non-blank cell of
/// the anchor column, never above row 2 (row 1 holds headers).
pub fn locate(column_values: &[CellValue]) -> u32 {
    let last = column_values
        .iter()
        .rposition(|v| !v.is_blank())
        .map(|i| i as u32 + 1)
        .unwrap_or(0);
    (last + 1).max(2)
}

/// Inclusive row interval covered by one append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppendRange {
    pub start: u32,
    pub end: u32,
}

impl AppendRange {
    /// `rows` rows starting at `start`; `None` for an empty append.
    pub fn new(start: u32, rows: usize) -> Option<Self> {
        let rows = u32::try_from(rows).ok().filter(|&r| r > 0)?;
        Some(Self {
            start,
            end: start.checked_add(rows - 1)?,
        })
    }

    pub fn row_count(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn rows(&self) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_only_sheet_appends_at_row_two() {
        assert_eq!(locate(&[]), 2);
        assert_eq!(locate(&[CellValue::Text("id".into())]), 2);
    }

    #[test]
    fn trailing_blanks_are_ignored() {
        let col = vec![
            CellValue::Text("id".into()),
            CellValue::Int(1),
            CellValue::Empty,
            CellValue::Int(3),
            CellValue::Text("  ".into()),
            CellValue::Empty,
        ];
        assert_eq!(locate(&col), 5);
    }

    #[test]
    fn append_range_bounds() {
        let r = AppendRange::new(5, 3).unwrap();
        assert_eq!((r.start, r.end, r.row_count()), (5, 7, 3));
        assert!(AppendRange::new(5, 0).is_none());
    }
}
