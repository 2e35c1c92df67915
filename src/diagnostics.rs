//! Diagnostics record accumulated over a project's lifecycle.
//!
//! The record is rebuilt from project state after every operation, so it
//! always reflects the current mapping and the last execution pass.

use std::{collections::BTreeMap, fs::File, io::BufWriter, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    mapping::MatchTier,
    project::{FileStatus, ProjectStatus},
    schema::ColumnType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    FileRead,
    HeaderNotDetected,
    MappingIncomplete,
    AmbiguousMapping,
    FileSkipped,
    MergeAborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, source_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.map(str::to_string),
            column: None,
            message: message.into(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

/// How one canonical column was fed for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnUsage {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_header: Option<String>,
    pub tier: MatchTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCount {
    pub column_type: ColumnType,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiagnostics {
    pub source_id: String,
    pub status: FileStatus,
    pub confirmed: bool,
    /// 1-based sheet row holding the header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_confidence: Option<f64>,
    pub low_confidence: bool,
    pub mapping_used: Vec<ColumnUsage>,
    /// Normalization errors keyed by canonical column.
    pub error_counts: BTreeMap<String, ErrorCount>,
    pub rows_merged: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl FileDiagnostics {
    pub fn total_errors(&self) -> usize {
        self.error_counts.values().map(|c| c.count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub source_id: String,
    /// 1-based sheet row, as in the `source_row` output column.
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub source_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub per_file: Vec<FileDiagnostics>,
    pub skipped_rows: Vec<SkippedRow>,
    pub skipped_files: Vec<SkippedFile>,
    pub issues: Vec<Issue>,
    pub overall_status: ProjectStatus,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            per_file: Vec::new(),
            skipped_rows: Vec::new(),
            skipped_files: Vec::new(),
            issues: Vec::new(),
            overall_status: ProjectStatus::Draft,
        }
    }
}

impl Diagnostics {
    pub fn file(&self, source_id: &str) -> Option<&FileDiagnostics> {
        self.per_file.iter().find(|f| f.source_id == source_id)
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |issue| issue.kind == kind)
    }

    pub fn has_issue(&self, kind: IssueKind, source_id: &str) -> bool {
        self.issues_of(kind)
            .any(|issue| issue.source_id.as_deref() == Some(source_id))
    }

    pub fn total_errors(&self) -> usize {
        self.per_file.iter().map(FileDiagnostics::total_errors).sum()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Serializing diagnostics to JSON")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating diagnostics file {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Writing diagnostics to {path:?}"))
    }
}
