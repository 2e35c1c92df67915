//! The merged output table with per-row provenance.

use std::io::Write;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cell::{CellValue, ISO_DATE_FORMAT};

pub const SOURCE_ID_COLUMN: &str = "source_id";
pub const SOURCE_ROW_COLUMN: &str = "source_row";

/// Where a merged row came from: source file and 0-based row in its sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    pub row_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRow {
    pub provenance: Provenance,
    pub cells: Vec<CellValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergedTable {
    columns: Vec<String>,
    rows: Vec<MergedRow>,
}

impl MergedTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, row: MergedRow) {
        debug_assert_eq!(row.cells.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[MergedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` in row `row`.
    pub fn cell(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.cells.get(idx)
    }

    pub fn rows_from<'a>(&'a self, source_id: &'a str) -> impl Iterator<Item = &'a MergedRow> {
        self.rows
            .iter()
            .filter(move |row| row.provenance.source_id == source_id)
    }

    /// SHA-256 over columns, provenance and typed cell content. Two merges of
    /// the same inputs with the same mapping produce the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for column in &self.columns {
            hasher.update(column.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
        for row in &self.rows {
            hasher.update(row.provenance.source_id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(row.provenance.row_index.to_le_bytes());
            for cell in &row.cells {
                let tag: u8 = match cell {
                    CellValue::String(_) => b's',
                    CellValue::Number(n) if n.percent => b'p',
                    CellValue::Number(_) => b'n',
                    CellValue::Date(_) => b'd',
                    CellValue::Empty => b'e',
                    CellValue::Error(_) => b'x',
                };
                hasher.update([0x1f, tag]);
                hasher.update(cell.as_display().as_bytes());
            }
            hasher.update([0x1e]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Header plus one string record per row, provenance first.
    pub fn to_records(&self) -> (Vec<String>, Vec<Vec<String>>) {
        self.to_records_with(ISO_DATE_FORMAT)
    }

    pub fn to_records_with(&self, date_format: &str) -> (Vec<String>, Vec<Vec<String>>) {
        let mut headers = vec![SOURCE_ID_COLUMN.to_string(), SOURCE_ROW_COLUMN.to_string()];
        headers.extend(self.columns.iter().cloned());
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut record = Vec::with_capacity(row.cells.len() + 2);
                record.push(row.provenance.source_id.clone());
                record.push((row.provenance.row_index + 1).to_string());
                record.extend(row.cells.iter().map(|cell| cell.display_with(date_format)));
                record
            })
            .collect();
        (headers, rows)
    }

    /// Writes the table as CSV, dates rendered with `date_format`.
    pub fn write_csv<W: Write>(
        &self,
        writer: &mut csv::Writer<W>,
        date_format: &str,
    ) -> Result<()> {
        let (headers, rows) = self.to_records_with(date_format);
        writer
            .write_record(&headers)
            .context("Writing merged headers")?;
        for (idx, record) in rows.iter().enumerate() {
            writer
                .write_record(record)
                .with_context(|| format!("Writing merged row {}", idx + 1))?;
        }
        writer.flush().context("Flushing merged output")?;
        Ok(())
    }
}
