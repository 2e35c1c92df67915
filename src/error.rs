//! Error taxonomy for engine operations.
//!
//! Only call-level failures live here. Low-confidence headers, ambiguous
//! mappings and per-cell normalization problems are diagnostics, not errors.

use std::fmt;

use thiserror::Error;

use crate::project::ProjectStatus;

/// A file whose required canonical columns are not mapped.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MappingGap {
    pub source_id: String,
    pub missing: Vec<String>,
}

impl fmt::Display for MappingGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is missing required column(s) {}",
            self.source_id,
            self.missing.join(", ")
        )
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(String),
    #[error("template name must not be empty")]
    EmptyName,
    #[error("template '{id}' is invalid: {reason}")]
    Invalid { id: String, reason: String },
    #[error("template store I/O failed for '{id}': {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("template '{id}' YAML is invalid: {source}")]
    Yaml {
        id: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("file '{source_id}' could not be read: {reason}")]
    FileRead { source_id: String, reason: String },
    #[error("schema is unusable: {0}")]
    MissingSchema(String),
    #[error("file '{0}' has no sheet data to analyze")]
    MissingMatrix(String),
    #[error("file '{0}' has not been analyzed")]
    NotAnalyzed(String),
    #[error("file '{0}' is not part of this project")]
    UnknownFile(String),
    #[error("file '{0}' is already attached to this project")]
    DuplicateFile(String),
    #[error("column '{0}' is not part of the canonical schema")]
    UnknownColumn(String),
    #[error("cannot {operation} while project is {from}")]
    InvalidTransition {
        from: ProjectStatus,
        operation: &'static str,
    },
    #[error("project is busy ({0}); request rejected")]
    Busy(ProjectStatus),
    #[error("project is {0}; reset it before making changes")]
    TerminalState(ProjectStatus),
    #[error("project has no files attached")]
    NoFiles,
    /// `row` is the 1-based row number a user would see.
    #[error("header row {row} is out of range for '{source_id}' ({rows} row(s))")]
    HeaderRowOutOfRange {
        source_id: String,
        row: usize,
        rows: usize,
    },
    #[error("mapping incomplete: {}", format_gaps(.0))]
    MappingIncomplete(Vec<MappingGap>),
    #[error("merge aborted by '{source_id}': {reason}")]
    MergeAborted { source_id: String, reason: String },
    #[error("project state lock was poisoned")]
    Poisoned,
    #[error(transparent)]
    Template(#[from] TemplateError),
}

fn format_gaps(gaps: &[MappingGap]) -> String {
    gaps.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
