//! Cell model shared by every stage of the merge engine.
//!
//! Source files arrive as [`SheetMatrix`] values whose cells are untyped
//! [`RawCell`] scalars. Normalization turns each mapped cell into a
//! [`CellValue`], which is the only representation the merged output and the
//! diagnostics ever see.

use std::fmt::{self, Write as _};

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// A scalar exactly as the decoding collaborator handed it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum RawCell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl RawCell {
    /// Builds a cell from decoded text, mapping whitespace-only text to `Empty`.
    pub fn from_text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            RawCell::Empty
        } else {
            RawCell::Text(value)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    /// Textual rendering used by header extraction and string normalization.
    pub fn as_display(&self) -> String {
        match self {
            RawCell::Empty => String::new(),
            RawCell::Text(text) => text.clone(),
            RawCell::Number(value) => format_float(*value),
            RawCell::Boolean(value) => value.to_string(),
            RawCell::Date(date) => date.format("%Y-%m-%d").to_string(),
            RawCell::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl From<&str> for RawCell {
    fn from(value: &str) -> Self {
        RawCell::from_text(value)
    }
}

impl From<String> for RawCell {
    fn from(value: String) -> Self {
        RawCell::from_text(value)
    }
}

impl From<f64> for RawCell {
    fn from(value: f64) -> Self {
        RawCell::Number(value)
    }
}

impl From<NaiveDate> for RawCell {
    fn from(value: NaiveDate) -> Self {
        RawCell::Date(value)
    }
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// The first worksheet of one uploaded file, row-major.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SheetMatrix {
    rows: Vec<Vec<RawCell>>,
}

impl SheetMatrix {
    pub fn new(rows: Vec<Vec<RawCell>>) -> Self {
        Self { rows }
    }

    /// Convenience constructor for text-only sheets such as decoded CSV.
    pub fn from_text_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|cell| RawCell::from_text(cell)).collect())
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<RawCell>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[RawCell]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Width of the widest row.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// A normalized number. `percent` marks values that were written with a
/// trailing `%` and have already been divided by 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Numeric {
    pub value: Decimal,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub percent: bool,
}

impl Numeric {
    pub fn plain(value: Decimal) -> Self {
        Self {
            value,
            percent: false,
        }
    }

    pub fn percent(value: Decimal) -> Self {
        Self {
            value,
            percent: true,
        }
    }
}

/// A normalized cell. Every normalization outcome is one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    String(String),
    Number(Numeric),
    Date(NaiveDate),
    Empty,
    Error(String),
}

impl CellValue {
    pub fn number(value: Decimal) -> Self {
        CellValue::Number(Numeric::plain(value))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Canonical text form: ISO dates, plain decimals, empty string for `Empty`.
    pub fn as_display(&self) -> String {
        self.display_with(ISO_DATE_FORMAT)
    }

    /// Like [`CellValue::as_display`] with dates rendered through a strftime
    /// `date_format`. An unusable format falls back to ISO.
    pub fn display_with(&self, date_format: &str) -> String {
        match self {
            CellValue::String(text) => text.clone(),
            CellValue::Number(numeric) => numeric.value.normalize().to_string(),
            CellValue::Date(date) => {
                let mut out = String::new();
                if write!(out, "{}", date.format(date_format)).is_err() {
                    out = date.format(ISO_DATE_FORMAT).to_string();
                }
                out
            }
            CellValue::Empty => String::new(),
            CellValue::Error(reason) => format!("#ERROR({reason})"),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}
