#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sheet_merge::{
    cell::SheetMatrix,
    schema::{CanonicalColumn, CanonicalSchema, ColumnType},
};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}

/// Name and Salary are required; HireDate and Department are not.
pub fn payroll_schema() -> CanonicalSchema {
    CanonicalSchema::new(vec![
        CanonicalColumn::new("Name", ColumnType::String)
            .with_aliases(["성명", "이름", "Employee Name"])
            .required(),
        CanonicalColumn::new("Salary", ColumnType::Number)
            .with_aliases(["급여", "Pay"])
            .required(),
        CanonicalColumn::new("HireDate", ColumnType::Date)
            .with_aliases(["입사일", "Hire Date", "Start Date"]),
        CanonicalColumn::new("Department", ColumnType::String).with_aliases(["부서"]),
    ])
    .expect("payroll schema")
}

pub const PAYROLL_SCHEMA_YAML: &str = r#"columns:
  - name: Name
    type: String
    aliases: [성명, 이름, Employee Name]
    required: true
  - name: Salary
    type: Number
    aliases: [급여, Pay]
    required: true
  - name: HireDate
    type: Date
    aliases: [입사일, Hire Date, Start Date]
  - name: Department
    type: String
    aliases: [부서]
"#;

pub fn sheet(rows: &[&[&str]]) -> SheetMatrix {
    SheetMatrix::from_text_rows(rows.iter().map(|row| row.iter().copied()))
}

/// Korean export with a title block above the header.
pub fn korean_export() -> SheetMatrix {
    sheet(&[
        &["2024년 급여대장", "", ""],
        &["", "", ""],
        &["성명", "급여", "입사일"],
        &["홍길동", "1,200,000원", "2023-03-02"],
        &["김철수", "350만원", "2023년 7월 1일"],
    ])
}

/// English export with the header on the first row.
pub fn english_export() -> SheetMatrix {
    sheet(&[
        &["Employee Name", "Pay", "Start Date", "Department"],
        &["Jane Doe", "$4,500.00", "Jan 15, 2024", "Sales"],
        &["John Roe", "N/A", "2024/02/01", "Ops"],
    ])
}
