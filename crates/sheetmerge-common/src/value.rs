use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A scalar stored in a single spreadsheet cell.
///
/// Merging never evaluates formulas, so only the raw value shapes a
/// workbook can hold are represented here.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Boolean(bool),
    Int(i64),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// True for `Empty` and for text that is empty once trimmed.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Number(n) => Some(*n),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Header text for this value, `None` when the cell is blank.
    pub fn to_header(&self) -> Option<String> {
        if self.is_blank() {
            None
        } else {
            Some(self.to_string())
        }
    }

    /// Conservative inference for untyped text (CSV fields, lazy cells).
    ///
    /// Integers, decimals and `TRUE`/`FALSE` are recognised; anything else
    /// stays text. An empty field becomes `Empty`.
    pub fn infer(raw: &str) -> Self {
        let txt = raw.trim();
        if txt.is_empty() {
            return CellValue::Empty;
        }
        if txt.eq_ignore_ascii_case("TRUE") {
            return CellValue::Boolean(true);
        }
        if txt.eq_ignore_ascii_case("FALSE") {
            return CellValue::Boolean(false);
        }
        // Leading zeros carry meaning in ids and codes ("00123").
        let leading_zero = txt.len() > 1 && txt.starts_with('0') && !txt.starts_with("0.");
        if !leading_zero {
            if let Ok(i) = txt.parse::<i64>() {
                return CellValue::Int(i);
            }
            if txt.chars().any(|c| c.is_ascii_digit()) {
                if let Ok(n) = txt.parse::<f64>() {
                    if n.is_finite() {
                        return CellValue::Number(n);
                    }
                }
            }
        }
        CellValue::Text(raw.to_string())
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => write!(f, ""),
            CellValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Int(i) => write!(f, "{i}"),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        CellValue::Int(value as i64)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Empty)
    }
}
