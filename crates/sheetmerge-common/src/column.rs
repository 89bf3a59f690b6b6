//! Spreadsheet column labels (`A`, `Z`, `AA`, ..., `XFD`) and their 1-based
//! positions.

use std::error::Error;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest column index an xlsx sheet can address (`XFD`).
pub const COL_MAX: u32 = 16_384;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ColumnLabelError {
    /// The label was empty.
    Empty,
    /// The label contained something other than ASCII letters.
    InvalidChar(char),
    /// The label decodes past `XFD`.
    OutOfRange(String),
    /// A 0 index was supplied where a 1-based column was expected.
    ZeroIndex,
}

impl fmt::Display for ColumnLabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnLabelError::Empty => write!(f, "column label is empty"),
            ColumnLabelError::InvalidChar(c) => {
                write!(f, "column label contains invalid character '{c}'")
            }
            ColumnLabelError::OutOfRange(label) => {
                write!(f, "column '{label}' is beyond the last addressable column XFD")
            }
            ColumnLabelError::ZeroIndex => write!(f, "column indices are 1-based (>= 1)"),
        }
    }
}

impl Error for ColumnLabelError {}

/// A 1-based column position (`A` = 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column(u32);

impl Column {
    pub const A: Column = Column(1);

    pub fn from_index(index: u32) -> Result<Self, ColumnLabelError> {
        if index == 0 {
            return Err(ColumnLabelError::ZeroIndex);
        }
        if index > COL_MAX {
            return Err(ColumnLabelError::OutOfRange(column_to_letters(index)));
        }
        Ok(Column(index))
    }

    /// Parse a letter label; lowercase letters are accepted.
    pub fn parse(label: &str) -> Result<Self, ColumnLabelError> {
        let index = letters_to_column(label)?;
        Self::from_index(index)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    pub fn letters(self) -> String {
        column_to_letters(self.0)
    }

    /// The column `n` positions to the right, if addressable.
    pub fn offset(self, n: u32) -> Option<Column> {
        let idx = self.0.checked_add(n)?;
        (idx <= COL_MAX).then_some(Column(idx))
    }

    /// Every column from `A` through `self`, inclusive.
    pub fn from_a_through(self) -> impl Iterator<Item = Column> {
        (1..=self.0).map(Column)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", column_to_letters(self.0))
    }
}

impl FromStr for Column {
    type Err = ColumnLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::parse(s)
    }
}

#[cfg(feature = "serde")]
impl Serialize for Column {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.letters())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Column {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Column::parse(&label).map_err(serde::de::Error::custom)
    }
}

/// 1-based index to letters: 1 -> `A`, 27 -> `AA`.
pub fn column_to_letters(col: u32) -> String {
    let mut buf = Vec::new();
    let mut n = col;
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        buf.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Letters to a 1-based index: `A` -> 1, `AA` -> 27.
pub fn letters_to_column(s: &str) -> Result<u32, ColumnLabelError> {
    let label = s.trim();
    if label.is_empty() {
        return Err(ColumnLabelError::Empty);
    }
    let mut col: u32 = 0;
    for ch in label.chars() {
        if !ch.is_ascii_alphabetic() {
            return Err(ColumnLabelError::InvalidChar(ch));
        }
        let val = (ch.to_ascii_uppercase() as u8 - b'A') as u32 + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(val))
            .ok_or_else(|| ColumnLabelError::OutOfRange(label.to_string()))?;
    }
    Ok(col)
}
