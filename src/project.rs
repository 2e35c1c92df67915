//! Merge project orchestration.
//!
//! A [`MergeProject`] owns the canonical schema, the attached files and the
//! state machine that walks them from raw sheets to one merged table:
//!
//! ```text
//! Draft -> Analyzing -> Mapped -> Executing -> Completed
//!                         ^  \                 \
//!                         |   (manual edits)    -> Failed
//!                         +-- reset() from Completed/Failed returns to Draft
//! ```
//!
//! Long-running steps are split into `begin_*` (validate and snapshot under
//! the project), a detached job that owns its inputs, and `complete_*` (commit
//! results). [`SharedProject`] uses the split to hold its lock only for the
//! gate check and the commit, so a concurrent request sees `Busy` instead of
//! blocking or interleaving.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    cell::{CellValue, RawCell, SheetMatrix},
    config::EngineConfig,
    diagnostics::{
        ColumnUsage, Diagnostics, ErrorCount, FileDiagnostics, Issue, IssueKind, SkippedFile,
        SkippedRow,
    },
    error::{EngineError, MappingGap, TemplateError},
    header::{HeaderDetectionResult, HeaderDetector},
    mapping::{ColumnMapper, ColumnMapping, NoteKind, Overrides, SuggestedGroup},
    merged::{MergedRow, MergedTable, Provenance},
    normalize::Normalizer,
    schema::{CanonicalSchema, ColumnType},
    template::{self, MappingTemplate, TemplateStore},
};

pub const BLANK_ROW_REASON: &str = "blank row";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Analyzing,
    Mapped,
    Executing,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Analyzing => "analyzing",
            ProjectStatus::Mapped => "mapped",
            ProjectStatus::Executing => "executing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Failed)
    }

    pub fn is_busy(self) -> bool {
        matches!(self, ProjectStatus::Analyzing | ProjectStatus::Executing)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Attached, not analyzed yet.
    Pending,
    /// The sheet could not be read; only the reason is kept.
    Unreadable,
    Analyzed,
    /// Analysis itself failed (e.g. a manual header row outside the sheet).
    Failed,
    Excluded,
    Merged,
    /// Left out of a non-strict merge because it could not be merged.
    Skipped,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Unreadable => "unreadable",
            FileStatus::Analyzed => "analyzed",
            FileStatus::Failed => "failed",
            FileStatus::Excluded => "excluded",
            FileStatus::Merged => "merged",
            FileStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MergeFile {
    source_id: String,
    matrix: Option<Arc<SheetMatrix>>,
    read_error: Option<String>,
    header_row_override: Option<usize>,
    header: Option<HeaderDetectionResult>,
    mapping: Option<ColumnMapping>,
    overrides: Overrides,
    confirmed: bool,
    status: FileStatus,
    failure: Option<String>,
}

impl MergeFile {
    fn readable(source_id: String, matrix: SheetMatrix) -> Self {
        Self {
            source_id,
            matrix: Some(Arc::new(matrix)),
            read_error: None,
            header_row_override: None,
            header: None,
            mapping: None,
            overrides: Overrides::new(),
            confirmed: false,
            status: FileStatus::Pending,
            failure: None,
        }
    }

    fn unreadable(source_id: String, reason: String) -> Self {
        Self {
            matrix: None,
            read_error: Some(reason),
            status: FileStatus::Unreadable,
            ..Self::readable(source_id, SheetMatrix::default())
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn matrix(&self) -> Option<&SheetMatrix> {
        self.matrix.as_deref()
    }

    pub fn read_error(&self) -> Option<&str> {
        self.read_error.as_deref()
    }

    pub fn header(&self) -> Option<&HeaderDetectionResult> {
        self.header.as_ref()
    }

    pub fn mapping(&self) -> Option<&ColumnMapping> {
        self.mapping.as_ref()
    }

    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn task(&self) -> Option<AnalysisTask> {
        if self.status == FileStatus::Excluded {
            return None;
        }
        Some(AnalysisTask {
            source_id: self.source_id.clone(),
            matrix: Arc::clone(self.matrix.as_ref()?),
            header_row: self.header_row_override,
            overrides: self.overrides.clone(),
        })
    }

    fn unavailable(&self) -> EngineError {
        match (&self.read_error, &self.matrix) {
            (Some(reason), _) => EngineError::FileRead {
                source_id: self.source_id.clone(),
                reason: reason.clone(),
            },
            (None, None) => EngineError::MissingMatrix(self.source_id.clone()),
            (None, Some(_)) => EngineError::NotAnalyzed(self.source_id.clone()),
        }
    }

    fn apply_analysis(&mut self, result: Result<FileAnalysis, EngineError>) {
        match result {
            Ok(analysis) => {
                if analysis.header.low_confidence {
                    warn!(
                        "'{}': no confident header row, using row {}",
                        self.source_id,
                        analysis.header.row_index + 1
                    );
                }
                self.header = Some(analysis.header);
                self.mapping = Some(analysis.mapping);
                self.status = FileStatus::Analyzed;
                self.failure = None;
            }
            Err(err) => {
                warn!("'{}': analysis failed: {err}", self.source_id);
                self.header = None;
                self.mapping = None;
                self.status = FileStatus::Failed;
                self.failure = Some(err.to_string());
            }
        }
    }

    fn reset(&mut self) {
        self.header = None;
        self.mapping = None;
        match self.status {
            FileStatus::Excluded => {}
            _ if self.read_error.is_some() => self.status = FileStatus::Unreadable,
            _ => {
                self.status = FileStatus::Pending;
                self.failure = None;
            }
        }
    }
}

#[derive(Debug)]
struct AnalysisTask {
    source_id: String,
    matrix: Arc<SheetMatrix>,
    header_row: Option<usize>,
    overrides: Overrides,
}

#[derive(Debug)]
struct FileAnalysis {
    header: HeaderDetectionResult,
    mapping: ColumnMapping,
}

/// Detached analysis work: owns everything it reads.
#[derive(Debug)]
pub struct AnalysisJob {
    detector: HeaderDetector,
    mapper: ColumnMapper,
    search_window: usize,
    schema: CanonicalSchema,
    tasks: Vec<AnalysisTask>,
}

#[derive(Debug)]
pub struct AnalysisOutcome {
    results: Vec<(String, Result<FileAnalysis, EngineError>)>,
}

impl AnalysisJob {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Files are analyzed in parallel; results keep attachment order.
    pub fn run(self) -> AnalysisOutcome {
        let results = self
            .tasks
            .par_iter()
            .map(|task| (task.source_id.clone(), self.analyze(task)))
            .collect();
        AnalysisOutcome { results }
    }

    fn analyze(&self, task: &AnalysisTask) -> Result<FileAnalysis, EngineError> {
        let header = match task.header_row {
            Some(row) => HeaderDetector::manual(&task.matrix, row).ok_or_else(|| {
                EngineError::HeaderRowOutOfRange {
                    source_id: task.source_id.clone(),
                    row: row + 1,
                    rows: task.matrix.len(),
                }
            })?,
            None => self.detector.detect(&task.matrix, self.search_window),
        };
        let mapping =
            self.mapper
                .infer_with_overrides(&header.header_names, &self.schema, &task.overrides)?;
        debug!(
            "'{}': header row {} ({:.2}), {} of {} column(s) mapped",
            task.source_id,
            header.row_index + 1,
            header.confidence,
            mapping.mapped_count(),
            self.schema.len()
        );
        Ok(FileAnalysis { header, mapping })
    }
}

#[derive(Debug)]
enum FilePlan {
    Ready {
        matrix: Arc<SheetMatrix>,
        header_row: usize,
        /// Source column per canonical column, in schema order.
        sources: Vec<Option<usize>>,
    },
    Excluded(String),
    Unmergeable(String),
}

/// Detached execution work. Running it is a pure function of its inputs.
#[derive(Debug)]
pub struct ExecutionJob {
    columns: Vec<(String, ColumnType)>,
    normalizer: Normalizer,
    strict: bool,
    plans: Vec<(String, FilePlan)>,
}

/// What one execution pass did to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExecution {
    pub source_id: String,
    pub status: FileStatus,
    pub rows_merged: usize,
    pub error_counts: BTreeMap<String, ErrorCount>,
    pub reason: Option<String>,
}

impl FileExecution {
    fn unmerged(source_id: String, status: FileStatus, reason: String) -> Self {
        Self {
            source_id,
            status,
            rows_merged: 0,
            error_counts: BTreeMap::new(),
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    table: MergedTable,
    files: Vec<FileExecution>,
    skipped_rows: Vec<SkippedRow>,
    aborted: Option<SkippedFile>,
}

impl ExecutionReport {
    pub fn table(&self) -> &MergedTable {
        &self.table
    }

    pub fn files(&self) -> &[FileExecution] {
        &self.files
    }

    pub fn file(&self, source_id: &str) -> Option<&FileExecution> {
        self.files.iter().find(|f| f.source_id == source_id)
    }

    pub fn skipped_rows(&self) -> &[SkippedRow] {
        &self.skipped_rows
    }

    pub fn aborted(&self) -> Option<&SkippedFile> {
        self.aborted.as_ref()
    }
}

impl ExecutionJob {
    pub fn run(self) -> ExecutionReport {
        let names = self.columns.iter().map(|(name, _)| name.clone()).collect();
        let mut report = ExecutionReport {
            table: MergedTable::new(names),
            files: Vec::with_capacity(self.plans.len()),
            skipped_rows: Vec::new(),
            aborted: None,
        };

        for (source_id, plan) in &self.plans {
            match plan {
                FilePlan::Excluded(reason) => {
                    debug!("'{source_id}' excluded: {reason}");
                    report.files.push(FileExecution::unmerged(
                        source_id.clone(),
                        FileStatus::Excluded,
                        reason.clone(),
                    ));
                }
                FilePlan::Unmergeable(reason) if self.strict => {
                    warn!("Aborting merge: '{source_id}' cannot be merged: {reason}");
                    report.aborted = Some(SkippedFile {
                        source_id: source_id.clone(),
                        reason: reason.clone(),
                    });
                    break;
                }
                FilePlan::Unmergeable(reason) => {
                    warn!("Skipping '{source_id}': {reason}");
                    report.files.push(FileExecution::unmerged(
                        source_id.clone(),
                        FileStatus::Skipped,
                        reason.clone(),
                    ));
                }
                FilePlan::Ready {
                    matrix,
                    header_row,
                    sources,
                } => {
                    let merged = self.merge_file(source_id, matrix, *header_row, sources, &mut report);
                    report.files.push(merged);
                }
            }
        }
        report
    }

    fn merge_file(
        &self,
        source_id: &str,
        matrix: &SheetMatrix,
        header_row: usize,
        sources: &[Option<usize>],
        report: &mut ExecutionReport,
    ) -> FileExecution {
        let mut execution = FileExecution {
            source_id: source_id.to_string(),
            status: FileStatus::Merged,
            rows_merged: 0,
            error_counts: BTreeMap::new(),
            reason: None,
        };

        for (row_index, row) in matrix.rows().iter().enumerate().skip(header_row + 1) {
            if row.iter().all(RawCell::is_empty) {
                report.skipped_rows.push(SkippedRow {
                    source_id: source_id.to_string(),
                    row: row_index + 1,
                    reason: BLANK_ROW_REASON.to_string(),
                });
                continue;
            }
            let cells = self
                .columns
                .iter()
                .zip(sources)
                .map(|((name, column_type), source)| {
                    let value = source
                        .and_then(|idx| row.get(idx))
                        .map_or(CellValue::Empty, |raw| {
                            self.normalizer.normalize(raw, *column_type)
                        });
                    if value.is_error() {
                        execution
                            .error_counts
                            .entry(name.clone())
                            .or_insert(ErrorCount {
                                column_type: *column_type,
                                count: 0,
                            })
                            .count += 1;
                    }
                    value
                })
                .collect();
            report.table.push(MergedRow {
                provenance: Provenance {
                    source_id: source_id.to_string(),
                    row_index,
                },
                cells,
            });
            execution.rows_merged += 1;
        }

        info!(
            "Merged {} row(s) from '{source_id}' ({} normalization error(s))",
            execution.rows_merged,
            execution.error_counts.values().map(|c| c.count).sum::<usize>()
        );
        execution
    }
}

#[derive(Debug, Clone)]
pub struct MergeProject {
    id: Uuid,
    schema: CanonicalSchema,
    config: EngineConfig,
    files: Vec<MergeFile>,
    optional_columns: BTreeSet<String>,
    status: ProjectStatus,
    execution: Option<ExecutionReport>,
    output: Option<MergedTable>,
    diagnostics: Diagnostics,
}

impl MergeProject {
    pub fn new(schema: CanonicalSchema, config: EngineConfig) -> Self {
        let mut project = Self {
            id: Uuid::new_v4(),
            schema,
            config,
            files: Vec::new(),
            optional_columns: BTreeSet::new(),
            status: ProjectStatus::Draft,
            execution: None,
            output: None,
            diagnostics: Diagnostics::default(),
        };
        project.refresh_diagnostics();
        project
    }

    /// Starts a project whose schema comes from a stored template.
    pub fn from_template(
        store: &dyn TemplateStore,
        template_id: &str,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let template = store.load_template(template_id)?;
        let schema = template.schema()?;
        info!(
            "Loaded template '{}' with {} column(s)",
            template.name,
            schema.len()
        );
        Ok(Self::new(schema, config))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> ProjectStatus {
        self.status
    }

    pub fn schema(&self) -> &CanonicalSchema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn files(&self) -> &[MergeFile] {
        &self.files
    }

    pub fn file(&self, source_id: &str) -> Option<&MergeFile> {
        self.files.iter().find(|f| f.source_id == source_id)
    }

    pub fn optional_columns(&self) -> &BTreeSet<String> {
        &self.optional_columns
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The last execution pass, successful or aborted.
    pub fn execution(&self) -> Option<&ExecutionReport> {
        self.execution.as_ref()
    }

    pub fn output(&self) -> Option<&MergedTable> {
        self.output.as_ref()
    }

    fn ensure_editable(&self) -> Result<(), EngineError> {
        match self.status {
            status if status.is_terminal() => Err(EngineError::TerminalState(status)),
            status if status.is_busy() => Err(EngineError::Busy(status)),
            _ => Ok(()),
        }
    }

    fn ensure_mapped(&self, operation: &'static str) -> Result<(), EngineError> {
        self.ensure_editable()?;
        if self.status != ProjectStatus::Mapped {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                operation,
            });
        }
        Ok(())
    }

    fn slot(&self, source_id: &str) -> Result<usize, EngineError> {
        self.files
            .iter()
            .position(|f| f.source_id == source_id)
            .ok_or_else(|| EngineError::UnknownFile(source_id.to_string()))
    }

    fn ensure_new(&self, source_id: &str) -> Result<(), EngineError> {
        if self.file(source_id).is_some() {
            return Err(EngineError::DuplicateFile(source_id.to_string()));
        }
        Ok(())
    }

    /// Attaches a readable sheet. A mapped project returns to draft because
    /// the new file has not been analyzed.
    pub fn attach_file(
        &mut self,
        source_id: impl Into<String>,
        matrix: SheetMatrix,
    ) -> Result<(), EngineError> {
        self.ensure_editable()?;
        let source_id = source_id.into();
        self.ensure_new(&source_id)?;
        info!(
            "Attached '{source_id}' ({} row(s) x {} column(s))",
            matrix.len(),
            matrix.width()
        );
        self.files.push(MergeFile::readable(source_id, matrix));
        if self.status == ProjectStatus::Mapped {
            self.status = ProjectStatus::Draft;
        }
        self.refresh_diagnostics();
        Ok(())
    }

    /// Records a file whose sheet could not be read. It stays in the project
    /// so the failure shows up in diagnostics and at execution.
    pub fn attach_unreadable(
        &mut self,
        source_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.ensure_editable()?;
        let source_id = source_id.into();
        self.ensure_new(&source_id)?;
        let reason = reason.into();
        warn!("'{source_id}' could not be read: {reason}");
        self.files.push(MergeFile::unreadable(source_id, reason));
        self.refresh_diagnostics();
        Ok(())
    }

    fn analysis_job(&self, tasks: Vec<AnalysisTask>) -> AnalysisJob {
        AnalysisJob {
            detector: HeaderDetector::new(self.config.detector.clone()),
            mapper: ColumnMapper::new(self.config.mapper),
            search_window: self.config.search_window,
            schema: self.schema.clone(),
            tasks,
        }
    }

    pub fn begin_analysis(&mut self) -> Result<AnalysisJob, EngineError> {
        self.ensure_editable()?;
        if self.files.is_empty() {
            return Err(EngineError::NoFiles);
        }
        let tasks = self
            .files
            .iter()
            .filter_map(MergeFile::task)
            .collect::<Vec<_>>();
        self.status = ProjectStatus::Analyzing;
        info!("Project {}: analyzing {} file(s)", self.id, tasks.len());
        self.refresh_diagnostics();
        Ok(self.analysis_job(tasks))
    }

    pub fn complete_analysis(&mut self, outcome: AnalysisOutcome) -> Result<(), EngineError> {
        if self.status != ProjectStatus::Analyzing {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                operation: "complete analysis",
            });
        }
        for (source_id, result) in outcome.results {
            match self.files.iter_mut().find(|f| f.source_id == source_id) {
                Some(file) => file.apply_analysis(result),
                None => warn!("Discarding analysis for detached file '{source_id}'"),
            }
        }
        self.status = ProjectStatus::Mapped;
        self.refresh_diagnostics();
        info!(
            "Project {}: mapped, {} file(s) with gaps",
            self.id,
            self.readiness().len()
        );
        Ok(())
    }

    /// Detects headers and infers mappings for every readable, non-excluded
    /// file. Manual header rows and overrides already given are reapplied.
    pub fn analyze(&mut self) -> Result<(), EngineError> {
        let job = self.begin_analysis()?;
        let outcome = job.run();
        self.complete_analysis(outcome)
    }

    fn analyze_slot(&mut self, slot: usize) -> Result<(), EngineError> {
        let file = &self.files[slot];
        if file.matrix.is_none() {
            return Err(file.unavailable());
        }
        let tasks = file.task().into_iter().collect();
        let outcome = self.analysis_job(tasks).run();
        let file = &mut self.files[slot];
        for (_, result) in outcome.results {
            file.apply_analysis(result);
        }
        file.confirmed = false;
        self.refresh_diagnostics();
        Ok(())
    }

    /// Re-runs detection and inference for one file. Its confirmation is
    /// dropped; its manual header row and overrides are kept.
    pub fn reanalyze_file(&mut self, source_id: &str) -> Result<(), EngineError> {
        self.ensure_mapped("re-analyze a file")?;
        let slot = self.slot(source_id)?;
        info!("Re-analyzing '{source_id}'");
        self.analyze_slot(slot)
    }

    /// Pins the header row (0-based `row`) for one file and re-analyzes it.
    pub fn set_header_row(&mut self, source_id: &str, row: usize) -> Result<(), EngineError> {
        self.ensure_mapped("set a header row")?;
        let slot = self.slot(source_id)?;
        let file = &self.files[slot];
        let rows = match file.matrix() {
            Some(matrix) => matrix.len(),
            None => return Err(file.unavailable()),
        };
        if row >= rows {
            return Err(EngineError::HeaderRowOutOfRange {
                source_id: source_id.to_string(),
                row: row + 1,
                rows,
            });
        }
        info!("'{source_id}': header row set to {}", row + 1);
        self.files[slot].header_row_override = Some(row);
        self.analyze_slot(slot)
    }

    /// Applies manual decisions on top of inference and marks the mapping
    /// confirmed. The given overrides replace any earlier ones for the file.
    /// An excluded file is brought back into the merge, and analyzed first if
    /// it was excluded before analysis.
    pub fn confirm_mapping(
        &mut self,
        source_id: &str,
        overrides: Overrides,
    ) -> Result<(), EngineError> {
        self.ensure_mapped("confirm a mapping")?;
        let slot = self.slot(source_id)?;
        let file = &mut self.files[slot];
        if file.status == FileStatus::Excluded && file.header.is_none() && file.matrix.is_some() {
            info!("Analyzing re-included file '{source_id}'");
            file.status = FileStatus::Pending;
            file.failure = None;
            self.analyze_slot(slot)?;
        }
        let file = &self.files[slot];
        let Some(header) = file.header.as_ref() else {
            return Err(file.unavailable());
        };
        for header_name in overrides.keys() {
            if !header.header_names.contains(header_name) {
                debug!("'{source_id}': override for absent header '{header_name}'");
            }
        }
        let mapping = ColumnMapper::new(self.config.mapper).infer_with_overrides(
            &header.header_names,
            &self.schema,
            &overrides,
        )?;

        let file = &mut self.files[slot];
        file.overrides = overrides;
        file.mapping = Some(mapping);
        file.confirmed = true;
        if file.status == FileStatus::Excluded {
            file.status = FileStatus::Analyzed;
            file.failure = None;
        }
        info!("'{source_id}': mapping confirmed");
        self.refresh_diagnostics();
        Ok(())
    }

    pub fn exclude_file(
        &mut self,
        source_id: &str,
        reason: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.ensure_editable()?;
        let slot = self.slot(source_id)?;
        let reason = reason.into();
        info!("Excluding '{source_id}': {reason}");
        let file = &mut self.files[slot];
        file.status = FileStatus::Excluded;
        file.failure = Some(reason);
        self.refresh_diagnostics();
        Ok(())
    }

    /// Drops the required flag of `column` for this project only.
    pub fn mark_column_optional(&mut self, column: &str) -> Result<(), EngineError> {
        self.ensure_editable()?;
        if self.schema.column(column).is_none() {
            return Err(EngineError::UnknownColumn(column.to_string()));
        }
        if self.optional_columns.insert(column.to_string()) {
            info!("Column '{column}' marked optional");
        }
        self.refresh_diagnostics();
        Ok(())
    }

    /// Analyzed files whose mapping leaves a required column unfed. Empty
    /// means the project can execute. Files not analyzed yet report nothing.
    pub fn readiness(&self) -> Vec<MappingGap> {
        self.files
            .iter()
            .filter(|file| file.status == FileStatus::Analyzed)
            .filter_map(|file| {
                let missing = file
                    .mapping
                    .as_ref()?
                    .missing_required(&self.schema, &self.optional_columns);
                (!missing.is_empty()).then(|| MappingGap {
                    source_id: file.source_id.clone(),
                    missing,
                })
            })
            .collect()
    }

    /// Excludes every file that has a mapping gap; returns their ids.
    pub fn exclude_incomplete_files(&mut self) -> Result<Vec<String>, EngineError> {
        self.ensure_editable()?;
        let gaps = self.readiness();
        for gap in &gaps {
            self.exclude_file(&gap.source_id, gap.to_string())?;
        }
        Ok(gaps.into_iter().map(|gap| gap.source_id).collect())
    }

    /// Headers no file could map, grouped by similarity across files.
    pub fn suggest_groups(&self) -> Vec<SuggestedGroup> {
        let headers = self
            .files
            .iter()
            .filter_map(|file| file.header.as_ref())
            .map(|header| header.header_names.clone())
            .collect::<Vec<_>>();
        ColumnMapper::new(self.config.mapper).suggest_groups(&headers, &self.schema)
    }

    fn plan_for(&self, file: &MergeFile) -> FilePlan {
        if file.status == FileStatus::Excluded {
            return FilePlan::Excluded(file.failure.clone().unwrap_or_else(|| "excluded".into()));
        }
        let Some(matrix) = file.matrix.as_ref() else {
            return FilePlan::Unmergeable(
                file.read_error
                    .clone()
                    .unwrap_or_else(|| "no sheet data".into()),
            );
        };
        if file.status == FileStatus::Failed {
            return FilePlan::Unmergeable(
                file.failure
                    .clone()
                    .unwrap_or_else(|| "analysis failed".into()),
            );
        }
        match (&file.header, &file.mapping) {
            (Some(header), Some(mapping)) => FilePlan::Ready {
                matrix: Arc::clone(matrix),
                header_row: header.row_index,
                sources: self
                    .schema
                    .columns()
                    .iter()
                    .map(|column| mapping.target_index(&column.name))
                    .collect(),
            },
            _ => FilePlan::Unmergeable("not analyzed".into()),
        }
    }

    /// Gates execution on readiness and snapshots every file's plan.
    pub fn begin_execution(&mut self) -> Result<ExecutionJob, EngineError> {
        self.ensure_mapped("execute")?;
        let gaps = self.readiness();
        if !gaps.is_empty() {
            warn!(
                "Project {}: {} file(s) have mapping gaps; execution refused",
                self.id,
                gaps.len()
            );
            return Err(EngineError::MappingIncomplete(gaps));
        }
        let plans = self
            .files
            .iter()
            .map(|file| (file.source_id.clone(), self.plan_for(file)))
            .collect();
        let columns = self
            .schema
            .columns()
            .iter()
            .map(|column| (column.name.clone(), column.column_type))
            .collect();
        self.status = ProjectStatus::Executing;
        info!("Project {}: executing merge", self.id);
        self.refresh_diagnostics();
        Ok(ExecutionJob {
            columns,
            normalizer: Normalizer::new(self.config.normalizer),
            strict: self.config.strict,
            plans,
        })
    }

    pub fn complete_execution(
        &mut self,
        mut report: ExecutionReport,
    ) -> Result<&MergedTable, EngineError> {
        if self.status != ProjectStatus::Executing {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                operation: "complete execution",
            });
        }
        if report.aborted.is_some() {
            // Nothing from an aborted pass reaches the output.
            for execution in &mut report.files {
                if execution.status == FileStatus::Merged {
                    execution.status = FileStatus::Analyzed;
                    execution.rows_merged = 0;
                    execution.error_counts.clear();
                }
            }
            report.skipped_rows.clear();
        }
        for execution in &report.files {
            if let Some(file) = self
                .files
                .iter_mut()
                .find(|f| f.source_id == execution.source_id)
            {
                file.status = execution.status;
                if execution.status == FileStatus::Skipped {
                    file.failure = execution.reason.clone();
                }
            }
        }

        if let Some(aborted) = report.aborted.clone() {
            if let Some(file) = self
                .files
                .iter_mut()
                .find(|f| f.source_id == aborted.source_id)
            {
                file.status = FileStatus::Failed;
                file.failure = Some(aborted.reason.clone());
            }
            report.table = MergedTable::default();
            self.execution = Some(report);
            self.output = None;
            self.status = ProjectStatus::Failed;
            self.refresh_diagnostics();
            warn!("Project {}: merge aborted", self.id);
            return Err(EngineError::MergeAborted {
                source_id: aborted.source_id,
                reason: aborted.reason,
            });
        }

        let table = std::mem::take(&mut report.table);
        self.execution = Some(report);
        self.status = ProjectStatus::Completed;
        self.refresh_diagnostics();
        info!(
            "Project {}: completed with {} merged row(s)",
            self.id,
            table.len()
        );
        Ok(&*self.output.insert(table))
    }

    /// Runs the merge and returns the merged table.
    pub fn execute(&mut self) -> Result<&MergedTable, EngineError> {
        let job = self.begin_execution()?;
        let report = job.run();
        self.complete_execution(report)
    }

    /// Returns a completed or failed project to draft. Output and analysis
    /// are discarded; manual decisions and exclusions are kept.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        if !self.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                operation: "reset",
            });
        }
        for file in &mut self.files {
            file.reset();
        }
        self.output = None;
        self.execution = None;
        self.status = ProjectStatus::Draft;
        info!("Project {}: reset to draft", self.id);
        self.refresh_diagnostics();
        Ok(())
    }

    /// Template built from the schema plus aliases learned from every
    /// confirmed mapping.
    pub fn derive_template(&self, name: &str) -> Result<MappingTemplate, EngineError> {
        template::template_id(name)?;
        let mappings = self
            .files
            .iter()
            .filter(|file| file.confirmed)
            .filter_map(MergeFile::mapping);
        Ok(template::derive_template(name.trim(), &self.schema, mappings))
    }

    pub fn save_template(
        &self,
        store: &mut dyn TemplateStore,
        name: &str,
    ) -> Result<String, EngineError> {
        let template = self.derive_template(name)?;
        let schema = template.schema().map_err(|err| TemplateError::Invalid {
            id: name.to_string(),
            reason: err.to_string(),
        })?;
        Ok(store.save_template(&template.name, &schema)?)
    }

    fn refresh_diagnostics(&mut self) {
        let mut issues = Vec::new();
        let per_file = self
            .files
            .iter()
            .map(|file| {
                let source_id = file.source_id.as_str();
                if let Some(reason) = &file.read_error {
                    issues.push(Issue::new(IssueKind::FileRead, Some(source_id), reason));
                }
                if let Some(header) = &file.header
                    && header.low_confidence
                {
                    issues.push(Issue::new(
                        IssueKind::HeaderNotDetected,
                        Some(source_id),
                        format!(
                            "no row cleared the confidence floor; row {} used",
                            header.row_index + 1
                        ),
                    ));
                }
                let mapping_used = match &file.mapping {
                    Some(mapping) => {
                        for note in mapping.notes() {
                            if note.kind != NoteKind::AmbiguousMapping {
                                continue;
                            }
                            let mut issue = Issue::new(
                                IssueKind::AmbiguousMapping,
                                Some(source_id),
                                &note.message,
                            );
                            if let Some(column) = &note.column {
                                issue = issue.with_column(column);
                            }
                            issues.push(issue);
                        }
                        self.schema
                            .columns()
                            .iter()
                            .map(|column| ColumnUsage {
                                column: column.name.clone(),
                                source_header: mapping
                                    .entry_for_column(&column.name)
                                    .map(|entry| entry.source_header.clone()),
                                tier: mapping.tier_for(&column.name),
                            })
                            .collect()
                    }
                    None => Vec::new(),
                };
                let execution = self
                    .execution
                    .as_ref()
                    .and_then(|report| report.file(source_id));
                FileDiagnostics {
                    source_id: source_id.to_string(),
                    status: file.status,
                    confirmed: file.confirmed,
                    header_row: file.header.as_ref().map(|h| h.row_index + 1),
                    header_confidence: file.header.as_ref().map(|h| h.confidence),
                    low_confidence: file.header.as_ref().is_some_and(|h| h.low_confidence),
                    mapping_used,
                    error_counts: execution
                        .map(|e| e.error_counts.clone())
                        .unwrap_or_default(),
                    rows_merged: execution.map_or(0, |e| e.rows_merged),
                    failure: file.failure.clone(),
                }
            })
            .collect();

        for gap in self.readiness() {
            issues.push(Issue::new(
                IssueKind::MappingIncomplete,
                Some(&gap.source_id),
                gap.to_string(),
            ));
        }

        let mut skipped_rows = Vec::new();
        let mut skipped_files = Vec::new();
        if let Some(report) = &self.execution {
            skipped_rows = report.skipped_rows.clone();
            for execution in &report.files {
                let reason = execution.reason.clone().unwrap_or_default();
                match execution.status {
                    FileStatus::Skipped => {
                        issues.push(Issue::new(
                            IssueKind::FileSkipped,
                            Some(&execution.source_id),
                            &reason,
                        ));
                        skipped_files.push(SkippedFile {
                            source_id: execution.source_id.clone(),
                            reason,
                        });
                    }
                    FileStatus::Excluded => skipped_files.push(SkippedFile {
                        source_id: execution.source_id.clone(),
                        reason,
                    }),
                    _ => {}
                }
            }
            if let Some(aborted) = &report.aborted {
                issues.push(Issue::new(
                    IssueKind::MergeAborted,
                    Some(&aborted.source_id),
                    &aborted.reason,
                ));
            }
        }

        self.diagnostics = Diagnostics {
            per_file,
            skipped_rows,
            skipped_files,
            issues,
            overall_status: self.status,
        };
    }
}

/// A project shared between callers. Analysis and execution hold the lock
/// only to start and to commit; a second long-running request made while one
/// is in flight gets [`EngineError::Busy`].
#[derive(Debug, Clone)]
pub struct SharedProject {
    inner: Arc<Mutex<MergeProject>>,
}

impl SharedProject {
    pub fn new(project: MergeProject) -> Self {
        Self {
            inner: Arc::new(Mutex::new(project)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MergeProject>, EngineError> {
        self.inner.lock().map_err(|_| EngineError::Poisoned)
    }

    /// Runs `f` with exclusive access to the project.
    pub fn with<R>(&self, f: impl FnOnce(&mut MergeProject) -> R) -> Result<R, EngineError> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    pub fn status(&self) -> Result<ProjectStatus, EngineError> {
        Ok(self.lock()?.status())
    }

    pub fn diagnostics(&self) -> Result<Diagnostics, EngineError> {
        Ok(self.lock()?.diagnostics().clone())
    }

    pub fn snapshot(&self) -> Result<MergeProject, EngineError> {
        Ok(self.lock()?.clone())
    }

    pub fn analyze(&self) -> Result<(), EngineError> {
        let job = self.lock()?.begin_analysis()?;
        let outcome = job.run();
        self.lock()?.complete_analysis(outcome)
    }

    pub fn execute(&self) -> Result<MergedTable, EngineError> {
        let job = self.lock()?.begin_execution()?;
        let report = job.run();
        self.lock()?.complete_execution(report).cloned()
    }
}
