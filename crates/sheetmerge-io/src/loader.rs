//! Sub-table loading: CSV and spreadsheet files into a uniform [`Table`].
//!
//! Row 1 of the source is the header row. CSV files are decoded by BOM, then
//! as UTF-8, then with a configurable legacy encoding; spreadsheets are read
//! from their first worksheet.

use crate::error::LoadError;
use encoding_rs::{Encoding, GB18030};
use sheetmerge_common::{CellValue, Table};
use std::borrow::Cow;
use std::path::Path;

#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// CSV field delimiter as a single byte.
    pub delimiter: u8,
    /// Encoding tried when a CSV file has no BOM and is not valid UTF-8.
    pub legacy_encoding: &'static Encoding,
    /// Infer numbers/booleans in CSV fields; off keeps every field as text.
    pub infer_types: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            legacy_encoding: GB18030,
            infer_types: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TableLoader {
    options: LoadOptions,
}

impl TableLoader {
    pub fn new(options: LoadOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Load one file, dispatching on its extension.
    pub fn load(&self, path: &Path) -> Result<Table, LoadError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            #[cfg(feature = "csv")]
            "csv" | "tsv" | "txt" => {
                let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let delimiter = if ext == "tsv" {
                    b'\t'
                } else {
                    self.options.delimiter
                };
                self.parse_csv(path, &bytes, delimiter)
            }
            #[cfg(feature = "calamine")]
            "xlsx" | "xlsm" | "xlsb" | "xls" | "xla" | "xlam" | "ods" => {
                load_spreadsheet(path)
            }
            _ => Err(LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Parse CSV bytes that came from `path` (used for error reporting only).
    #[cfg(feature = "csv")]
    pub fn parse_csv(&self, path: &Path, bytes: &[u8], delimiter: u8) -> Result<Table, LoadError> {
        let text = decode_text(path, bytes, self.options.legacy_encoding)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(text.as_bytes());

        let mut headers: Option<Vec<Option<String>>> = None;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| LoadError::Csv {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            if headers.is_none() {
                headers = Some(
                    record
                        .iter()
                        .map(|h| {
                            let h = h.trim();
                            (!h.is_empty()).then(|| h.to_string())
                        })
                        .collect(),
                );
                continue;
            }
            let row: Vec<CellValue> = record
                .iter()
                .map(|field| {
                    if self.options.infer_types {
                        CellValue::infer(field)
                    } else if field.is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(field.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }
        Ok(Table::from_ragged(headers.unwrap_or_default(), rows))
    }
}

/// BOM, then UTF-8, then `legacy`.
pub fn decode_text<'a>(
    path: &Path,
    bytes: &'a [u8],
    legacy: &'static Encoding,
) -> Result<Cow<'a, str>, LoadError> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        if had_errors {
            return Err(LoadError::Decode {
                path: path.to_path_buf(),
                encoding: encoding.name(),
            });
        }
        return Ok(text);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(Cow::Borrowed(text));
    }
    #[cfg(feature = "tracing")]
    tracing::debug!(
        path = %path.display(),
        encoding = legacy.name(),
        "csv is not valid UTF-8, retrying with legacy encoding"
    );
    let (text, had_errors) = legacy.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(LoadError::Decode {
            path: path.to_path_buf(),
            encoding: legacy.name(),
        });
    }
    Ok(text)
}

#[cfg(feature = "calamine")]
fn load_spreadsheet(path: &Path) -> Result<Table, LoadError> {
    use calamine::{Data, Reader, open_workbook_auto};

    let spreadsheet_err = |e: &dyn std::fmt::Display| LoadError::Spreadsheet {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| spreadsheet_err(&e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LoadError::NoWorksheet {
            path: path.to_path_buf(),
        })?
        .map_err(|e| spreadsheet_err(&e))?;

    let convert = |data: &Data| -> CellValue {
        match data {
            Data::Empty => CellValue::Empty,
            Data::String(s) if s.is_empty() => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Int(*i),
            Data::Bool(b) => CellValue::Boolean(*b),
            Data::Error(e) => CellValue::Text(e.to_string()),
            // Excel serial number; the master decides how to format it.
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::DateTimeIso(s) => CellValue::Text(s.clone()),
            Data::DurationIso(s) => CellValue::Text(s.clone()),
        }
    };

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|r| r.iter().map(|d| convert(d).to_header()).collect())
        .unwrap_or_default();
    let body = rows.map(|r| r.iter().map(convert).collect()).collect();
    Ok(Table::from_ragged(headers, body))
}

#[cfg(all(test, feature = "csv"))]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Table {
        TableLoader::default()
            .parse_csv(Path::new("t.csv"), bytes, b',')
            .unwrap()
    }

    #[test]
    fn first_record_is_header() {
        let t = parse(b"name,qty\nfoo,3\nbar,4.5\n");
        assert_eq!(
            t.headers(),
            &[Some("name".to_string()), Some("qty".to_string())]
        );
        assert_eq!(t.height(), 2);
        assert_eq!(t.rows()[1][1], CellValue::Number(4.5));
    }

    #[test]
    fn blank_headers_and_short_rows_are_padded() {
        let t = parse(b"a,,c\n1\n");
        assert_eq!(t.headers()[1], None);
        assert_eq!(t.rows()[0], vec![CellValue::Int(1), CellValue::Empty, CellValue::Empty]);
    }

    #[test]
    fn legacy_encoding_fallback() {
        let (bytes, _, _) = GB18030.encode("名称,数量\n苹果,3\n");
        let t = parse(&bytes);
        assert_eq!(t.headers()[0].as_deref(), Some("名称"));
        assert_eq!(t.rows()[0][0], CellValue::Text("苹果".into()));
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let t = parse(b"\xEF\xBB\xBFid\n7\n");
        assert_eq!(t.headers()[0].as_deref(), Some("id"));
    }
}
