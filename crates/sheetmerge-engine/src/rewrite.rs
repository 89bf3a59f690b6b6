//! Relative row rewriting for template formulas.
//!
//! A formula is split into opaque text and cell-reference pieces. Only the
//! row part of unqualified, non-anchored references moves; anything pointing
//! into another sheet or workbook keeps its row.

use once_cell::sync::Lazy;
use regex::Regex;
use sheetmerge_common::column::{COL_MAX, letters_to_column};
use std::fmt::{self, Display};

/// Last addressable row of an xlsx sheet.
pub const ROW_MAX: u32 = 1_048_576;

static EXTERNAL_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[.*?\].*?!").expect("external reference regex must compile"));

/// Where a reference points relative to the formula's own sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefScope {
    Local,
    /// `Sheet2!A1` or `'My Sheet'!A1`
    Sheet,
    /// `[Book.xlsx]Sheet!A1` or `'[Book.xlsx]Sheet'!A1`
    External,
}

/// One cell reference as written in a formula.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellRef {
    /// Qualifier text including the trailing `!`; empty for bare references
    /// and for range endpoints that inherit the first endpoint's qualifier.
    pub prefix: String,
    pub scope: RefScope,
    /// Column as written, with its `$` anchor if any.
    pub column: String,
    pub row_anchored: bool,
    pub row: u32,
}

impl Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let anchor = if self.row_anchored { "$" } else { "" };
        write!(f, "{}{}{anchor}{}", self.prefix, self.column, self.row)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Ref(CellRef),
}

impl Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Piece::Text(t) => f.write_str(t),
            Piece::Ref(r) => r.fmt(f),
        }
    }
}

/// Move `token` from `template_row` to `target_row`.
///
/// Qualified and `$`-anchored rows stay put. A row equal to the template row
/// becomes the target row; any other row shifts by the same delta. A shift
/// that leaves the sheet returns the token unchanged.
pub fn rewrite_token(token: &CellRef, template_row: u32, target_row: u32) -> CellRef {
    if token.scope != RefScope::Local || token.row_anchored {
        return token.clone();
    }
    let row = if token.row == template_row {
        target_row
    } else {
        let shifted = i64::from(token.row) + i64::from(target_row) - i64::from(template_row);
        if shifted < 1 || shifted > i64::from(ROW_MAX) {
            return token.clone();
        }
        shifted as u32
    };
    CellRef {
        row,
        ..token.clone()
    }
}

/// Rewrite every reference in `formula` for `target_row`.
pub fn rewrite(formula: &str, template_row: u32, target_row: u32) -> String {
    if formula.is_empty() || template_row == target_row {
        return formula.to_string();
    }
    render(&tokenize(formula), template_row, target_row)
}

/// Render already tokenized pieces for `target_row`.
pub fn render(pieces: &[Piece], template_row: u32, target_row: u32) -> String {
    let mut out = String::new();
    for piece in pieces {
        match piece {
            Piece::Ref(r) => out.push_str(&rewrite_token(r, template_row, target_row).to_string()),
            Piece::Text(t) => out.push_str(t),
        }
    }
    out
}

/// Name of the first workbook referenced as `[Book]`, if any.
pub fn external_workbook_name(formula: &str) -> Option<String> {
    tokenize(formula).into_iter().find_map(|piece| match piece {
        Piece::Ref(r) if r.scope == RefScope::External => {
            let start = r.prefix.find('[')? + 1;
            let end = r.prefix[start..].find(']')? + start;
            Some(r.prefix[start..end].to_string())
        }
        _ => None,
    })
}

/// True when the formula reads from another workbook (`[Book]Sheet!`).
pub fn is_external_template(formula: &str) -> bool {
    EXTERNAL_REF.is_match(formula)
}

/// Split a formula into text and references. Never fails: anything the
/// scanner does not recognise is kept as text.
pub fn tokenize(formula: &str) -> Vec<Piece> {
    let mut scanner = Scanner {
        src: formula,
        pos: 0,
        out: Vec::new(),
    };
    scanner.run();
    scanner.out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '$'
}

/// `$?[A-Z]{1,3}$?[0-9]+` over the whole word.
fn parse_ref_word(word: &str) -> Option<(String, bool, u32)> {
    let bytes = word.as_bytes();
    let mut i = 0;
    if bytes.first() == Some(&b'$') {
        i += 1;
    }
    let letters_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let letters = &word[letters_start..i];
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    match letters_to_column(letters) {
        Ok(col) if col <= COL_MAX => {}
        _ => return None,
    }
    let column = word[..i].to_string();
    let row_anchored = bytes.get(i) == Some(&b'$');
    if row_anchored {
        i += 1;
    }
    let digits = &word[i..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 || row > ROW_MAX {
        return None;
    }
    Some((column, row_anchored, row))
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    out: Vec<Piece>,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Piece::Text(last)) = self.out.last_mut() {
            last.push_str(text);
        } else {
            self.out.push(Piece::Text(text.to_string()));
        }
    }

    /// Consume a run of identifier characters starting at the cursor.
    fn take_word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !is_ident_char(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    /// Consume a delimited run (`'..'`, `".."`, `[..]`); doubled closing
    /// delimiters are escapes for the quote forms. Returns the consumed text
    /// and whether the closing delimiter was found.
    fn take_delimited(&mut self, open: char, close: char) -> (&'a str, bool) {
        let start = self.pos;
        self.pos += open.len_utf8();
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            self.pos += c.len_utf8();
            if c == close {
                if open == close && self.peek() == Some(close) {
                    self.pos += close.len_utf8();
                    continue;
                }
                depth -= 1;
                if depth == 0 {
                    return (&self.src[start..self.pos], true);
                }
            } else if c == open && open != close {
                depth += 1;
            }
        }
        (&self.src[start..self.pos], false)
    }

    fn run(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    let (lit, _) = self.take_delimited('"', '"');
                    self.push_text(lit);
                }
                '\'' => self.quoted_prefix(),
                '[' => self.bracket_prefix(),
                c if c.is_ascii_digit() => {
                    // Numeric literal, including exponents like 1E3.
                    let word = self.take_word();
                    self.push_text(word);
                }
                c if is_ident_char(c) => self.word(),
                _ => {
                    self.pos += c.len_utf8();
                    let text = &self.src[self.pos - c.len_utf8()..self.pos];
                    self.push_text(text);
                }
            }
        }
    }

    fn word(&mut self) {
        let word = self.take_word();
        match self.peek() {
            Some('!') => {
                self.pos += 1;
                let prefix = format!("{word}!");
                self.qualified_ref(prefix, RefScope::Sheet);
            }
            Some('(') => self.push_text(word),
            Some('[') => {
                // Structured reference: Table1[Col], Table1[[#This Row],[Col]]
                self.push_text(word);
                let (inner, _) = self.take_delimited('[', ']');
                self.push_text(inner);
            }
            _ => match parse_ref_word(word) {
                Some((column, row_anchored, row)) => {
                    let r = CellRef {
                        prefix: String::new(),
                        scope: RefScope::Local,
                        column,
                        row_anchored,
                        row,
                    };
                    self.emit_ref(r);
                }
                None => self.push_text(word),
            },
        }
    }

    fn quoted_prefix(&mut self) {
        let (quoted, closed) = self.take_delimited('\'', '\'');
        if closed && self.peek() == Some('!') {
            self.pos += 1;
            let scope = if quoted[1..].starts_with('[') {
                RefScope::External
            } else {
                RefScope::Sheet
            };
            self.qualified_ref(format!("{quoted}!"), scope);
        } else {
            self.push_text(quoted);
        }
    }

    fn bracket_prefix(&mut self) {
        let (book, closed) = self.take_delimited('[', ']');
        if !closed {
            self.push_text(book);
            return;
        }
        let sheet_start = self.pos;
        let sheet = self.take_word();
        if !sheet.is_empty() && self.peek() == Some('!') {
            self.pos += 1;
            self.qualified_ref(format!("{book}{sheet}!"), RefScope::External);
        } else {
            self.pos = sheet_start;
            self.push_text(book);
        }
    }

    /// After a `...!` qualifier: a reference, or the qualifier and whatever
    /// follows (names, whole columns) as text.
    fn qualified_ref(&mut self, prefix: String, scope: RefScope) {
        let start = self.pos;
        let word = self.take_word();
        match parse_ref_word(word) {
            Some((column, row_anchored, row)) if self.peek() != Some('(') => {
                self.emit_ref(CellRef {
                    prefix,
                    scope,
                    column,
                    row_anchored,
                    row,
                });
            }
            _ => {
                self.pos = start;
                self.push_text(&prefix);
            }
        }
    }

    /// Push `first` and, when it opens a range, the second endpoint.
    fn emit_ref(&mut self, first: CellRef) {
        let scope = first.scope;
        self.out.push(Piece::Ref(first));
        if !self.rest().starts_with(':') {
            return;
        }
        let save = self.pos;
        self.pos += 1;
        let word = self.take_word();
        if let Some((column, row_anchored, row)) = parse_ref_word(word) {
            self.push_text(":");
            self.out.push(Piece::Ref(CellRef {
                prefix: String::new(),
                scope,
                column,
                row_anchored,
                row,
            }));
        } else {
            self.pos = save;
        }
    }
}
