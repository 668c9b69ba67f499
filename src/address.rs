use crate::errors::PreviewError;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

static CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([1-9][0-9]{0,6})$").unwrap());

/// A single cell, addressed by sheet plus zero-based row/column.
///
/// Canonical string form is `Sheet1!B3`. Conversion is lossless in both
/// directions for any column the three-letter A1 alphabet can express.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CellKey {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
}

impl CellKey {
    pub fn new(sheet: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            sheet: sheet.into(),
            row,
            col,
        }
    }

    /// Canonical `Sheet!A1` form.
    pub fn a1(&self) -> String {
        format!("{}!{}{}", self.sheet, col_letters(self.col), self.row + 1)
    }

    /// Parse the canonical `Sheet!A1` form. The sheet prefix is required.
    pub fn parse(s: &str) -> Result<Self, PreviewError> {
        let Some((sheet, cell)) = s.rsplit_once('!') else {
            return Err(PreviewError::range_parse(s, "missing sheet prefix"));
        };
        let sheet = unquote_sheet(sheet);
        if sheet.is_empty() {
            return Err(PreviewError::range_parse(s, "empty sheet name"));
        }
        let (col, row) = parse_cell(cell).ok_or_else(|| {
            PreviewError::range_parse(s, "expected a cell reference like 'A1'")
        })?;
        Ok(Self::new(sheet, row, col))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.a1())
    }
}

impl Ord for CellKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Row-major within a sheet
        self.sheet
            .cmp(&other.sheet)
            .then(self.row.cmp(&other.row))
            .then(self.col.cmp(&other.col))
    }
}

impl PartialOrd for CellKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Zero-based column index to letters: 0 -> A, 25 -> Z, 26 -> AA.
pub fn col_letters(col: u32) -> String {
    let mut n = col + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Letters to zero-based column index. Rejects non-alphabetic input.
pub fn col_from_letters(s: &str) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for c in s.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col
            .checked_mul(26)?
            .checked_add(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
    }
    Some(col - 1)
}

fn parse_cell(cell: &str) -> Option<(u32, u32)> {
    let caps = CELL_RE.captures(cell.trim())?;
    let col = col_from_letters(caps.get(1)?.as_str())?;
    let row: u32 = caps.get(2)?.as_str().parse().ok()?;
    Some((col, row - 1))
}

fn unquote_sheet(sheet: &str) -> String {
    let trimmed = sheet.trim();
    trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(trimmed)
        .to_string()
}

/// An inclusive rectangular region on one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RangeRef {
    pub sheet: String,
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl RangeRef {
    /// Parse `A1`, `A1:B2`, `Sheet2!A1:B2` or `'My Sheet'!$A$1:$B$2`.
    /// References without a sheet prefix resolve against `active_sheet`.
    pub fn parse(reference: &str, active_sheet: &str) -> Result<Self, PreviewError> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(PreviewError::range_parse(reference, "empty reference"));
        }

        let (sheet, cells) = match trimmed.rsplit_once('!') {
            Some((sheet, cells)) => (unquote_sheet(sheet), cells),
            None => (active_sheet.to_string(), trimmed),
        };
        if sheet.is_empty() {
            return Err(PreviewError::range_parse(reference, "empty sheet name"));
        }

        let (start, end) = match cells.split_once(':') {
            Some((start, end)) => (start, end),
            None => (cells, cells),
        };

        let (start_col, start_row) = parse_cell(start).ok_or_else(|| {
            PreviewError::range_parse(reference, format!("invalid cell '{start}'"))
        })?;
        let (end_col, end_row) = parse_cell(end).ok_or_else(|| {
            PreviewError::range_parse(reference, format!("invalid cell '{end}'"))
        })?;

        Ok(Self {
            sheet,
            start_row: start_row.min(end_row),
            start_col: start_col.min(end_col),
            end_row: start_row.max(end_row),
            end_col: start_col.max(end_col),
        })
    }

    pub fn single(key: &CellKey) -> Self {
        Self {
            sheet: key.sheet.clone(),
            start_row: key.row,
            start_col: key.col,
            end_row: key.row,
            end_col: key.col,
        }
    }

    pub fn rows(&self) -> u32 {
        self.end_row - self.start_row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end_col - self.start_col + 1
    }

    pub fn cell_count(&self) -> u64 {
        self.rows() as u64 * self.cols() as u64
    }

    pub fn is_single_cell(&self) -> bool {
        self.start_row == self.end_row && self.start_col == self.end_col
    }

    pub fn origin(&self) -> CellKey {
        CellKey::new(self.sheet.clone(), self.start_row, self.start_col)
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        key.sheet == self.sheet
            && key.row >= self.start_row
            && key.row <= self.end_row
            && key.col >= self.start_col
            && key.col <= self.end_col
    }

    /// Row-major iteration over every cell in the range.
    pub fn cells(&self) -> impl Iterator<Item = CellKey> + '_ {
        (self.start_row..=self.end_row).flat_map(move |row| {
            (self.start_col..=self.end_col)
                .map(move |col| CellKey::new(self.sheet.clone(), row, col))
        })
    }

    pub fn a1(&self) -> String {
        let start = format!("{}{}", col_letters(self.start_col), self.start_row + 1);
        if self.is_single_cell() {
            format!("{}!{}", self.sheet, start)
        } else {
            let end = format!("{}{}", col_letters(self.end_col), self.end_row + 1);
            format!("{}!{}:{}", self.sheet, start, end)
        }
    }

    /// Smallest range covering both. Ranges on different sheets do not merge.
    pub fn union(&self, other: &RangeRef) -> Option<RangeRef> {
        if self.sheet != other.sheet {
            return None;
        }
        Some(Self {
            sheet: self.sheet.clone(),
            start_row: self.start_row.min(other.start_row),
            start_col: self.start_col.min(other.start_col),
            end_row: self.end_row.max(other.end_row),
            end_col: self.end_col.max(other.end_col),
        })
    }

    /// Expand by `cells` on every side, clamped at the sheet edge.
    pub fn padded(&self, cells: u32) -> RangeRef {
        Self {
            sheet: self.sheet.clone(),
            start_row: self.start_row.saturating_sub(cells),
            start_col: self.start_col.saturating_sub(cells),
            end_row: self.end_row.saturating_add(cells),
            end_col: self.end_col.saturating_add(cells),
        }
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.a1())
    }
}
