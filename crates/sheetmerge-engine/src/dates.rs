use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use sheetmerge_common::CellValue;
use std::path::Path;

/// Written to the date column when a file name carries no date.
pub const DATE_SENTINEL: &str = "error";

static DATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_([0-9]{8})_").expect("date token regex must compile"));

/// Date encoded as `_YYYYMMDD_` in the file name of `path`. Tokens that are
/// not calendar dates (`_20241340_`) are ignored.
pub fn date_from_file_name(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_string_lossy();
    DATE_TOKEN
        .captures_iter(&name)
        .filter_map(|cap| NaiveDate::parse_from_str(&cap[1], "%Y%m%d").ok())
        .next()
}

/// Cell value for the date column: `YYYYMMDD` as an integer, or the
/// sentinel text.
pub fn date_cell(date: Option<NaiveDate>) -> CellValue {
    match date {
        Some(d) => CellValue::Int(
            i64::from(d.year()) * 10_000 + i64::from(d.month()) * 100 + i64::from(d.day()),
        ),
        None => CellValue::Text(DATE_SENTINEL.to_string()),
    }
}
