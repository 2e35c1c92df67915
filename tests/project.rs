mod common;

use std::str::FromStr;

use chrono::NaiveDate;
use common::{english_export, korean_export, payroll_schema, sheet};
use rust_decimal::Decimal;
use sheet_merge::{
    cell::CellValue,
    config::{EngineConfig, FileOverrides, OverrideSet},
    diagnostics::IssueKind,
    error::EngineError,
    mapping::{ManualOverride, MatchTier, Overrides},
    normalize::UNPARSEABLE_NUMBER,
    project::{BLANK_ROW_REASON, FileStatus, MergeProject, ProjectStatus, SharedProject},
};

fn number(text: &str) -> CellValue {
    CellValue::number(Decimal::from_str(text).expect("decimal literal"))
}

fn date(y: i32, m: u32, d: u32) -> CellValue {
    CellValue::Date(NaiveDate::from_ymd_opt(y, m, d).expect("valid date"))
}

fn analyzed_project(config: EngineConfig) -> MergeProject {
    let mut project = MergeProject::new(payroll_schema(), config);
    project
        .attach_file("korean.csv", korean_export())
        .expect("attach korean");
    project
        .attach_file("english.csv", english_export())
        .expect("attach english");
    project.analyze().expect("analyze");
    project
}

#[test]
fn differently_shaped_exports_merge_into_one_table() {
    let mut project = analyzed_project(EngineConfig::default());
    assert_eq!(project.status(), ProjectStatus::Mapped);
    assert!(project.readiness().is_empty());

    let table = project.execute().expect("execute").clone();
    assert_eq!(project.status(), ProjectStatus::Completed);
    assert_eq!(
        table.columns(),
        &["Name", "Salary", "HireDate", "Department"]
    );
    assert_eq!(table.len(), 4);

    let first = &table.rows()[0];
    assert_eq!(first.provenance.source_id, "korean.csv");
    assert_eq!(first.provenance.row_index, 3);
    assert_eq!(
        first.cells,
        vec![
            CellValue::String("홍길동".to_string()),
            number("1200000"),
            date(2023, 3, 2),
            CellValue::Empty,
        ]
    );
    assert_eq!(table.cell(1, "Salary"), Some(&number("3500000")));
    assert_eq!(table.cell(1, "HireDate"), Some(&date(2023, 7, 1)));

    let jane = &table.rows()[2];
    assert_eq!(jane.provenance.source_id, "english.csv");
    assert_eq!(jane.provenance.row_index, 1);
    assert_eq!(table.cell(2, "Salary"), Some(&number("4500")));
    assert_eq!(table.cell(2, "HireDate"), Some(&date(2024, 1, 15)));
    assert_eq!(
        table.cell(2, "Department"),
        Some(&CellValue::String("Sales".to_string()))
    );
    assert_eq!(
        table.cell(3, "Salary"),
        Some(&CellValue::Error(UNPARSEABLE_NUMBER.to_string()))
    );
}

#[test]
fn diagnostics_record_headers_tiers_and_errors() {
    let mut project = analyzed_project(EngineConfig::default());
    project.execute().expect("execute");
    let diagnostics = project.diagnostics();

    assert_eq!(diagnostics.overall_status, ProjectStatus::Completed);
    let korean = diagnostics.file("korean.csv").expect("korean diagnostics");
    assert_eq!(korean.header_row, Some(3));
    assert_eq!(korean.status, FileStatus::Merged);
    assert_eq!(korean.rows_merged, 2);
    assert_eq!(korean.total_errors(), 0);
    let name_usage = korean
        .mapping_used
        .iter()
        .find(|usage| usage.column == "Name")
        .expect("Name usage");
    assert_eq!(name_usage.source_header.as_deref(), Some("성명"));
    assert_eq!(name_usage.tier, MatchTier::Alias);

    let english = diagnostics.file("english.csv").expect("english diagnostics");
    assert_eq!(english.error_counts["Salary"].count, 1);
    assert_eq!(diagnostics.total_errors(), 1);

    let json = diagnostics.to_json_pretty().expect("json");
    assert!(json.contains("\"overall_status\": \"completed\""));
}

#[test]
fn manual_override_completes_a_gap_left_by_inference() {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file(
            "legacy.csv",
            sheet(&[
                &["Employee Name", "Pay (KRW)", "Hire Dt"],
                &["Lee", "2,000,000", "2024-03-04"],
            ]),
        )
        .expect("attach");
    project.analyze().expect("analyze");

    let file = project.file("legacy.csv").expect("file");
    let mapping = file.mapping().expect("mapping");
    assert_eq!(mapping.tier_for("HireDate"), MatchTier::Fuzzy);
    assert_eq!(mapping.tier_for("Salary"), MatchTier::Unmapped);

    let gaps = project.readiness();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].missing, vec!["Salary"]);

    let mut overrides = Overrides::new();
    overrides.insert(
        "Pay (KRW)".to_string(),
        ManualOverride::Column("Salary".to_string()),
    );
    project
        .confirm_mapping("legacy.csv", overrides)
        .expect("confirm");
    assert!(project.readiness().is_empty());
    assert!(project.file("legacy.csv").expect("file").is_confirmed());

    let table = project.execute().expect("execute");
    assert_eq!(table.cell(0, "Salary"), Some(&number("2000000")));
    assert_eq!(table.cell(0, "HireDate"), Some(&date(2024, 3, 4)));
}

fn project_with_incomplete_file() -> MergeProject {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file("english.csv", english_export())
        .expect("attach english");
    project
        .attach_file(
            "roster.csv",
            sheet(&[&["Name", "Department"], &["Park", "HR"]]),
        )
        .expect("attach roster");
    project.analyze().expect("analyze");
    project
}

#[test]
fn execution_is_refused_while_required_columns_are_unmapped() {
    let mut project = project_with_incomplete_file();
    let err = project.execute().expect_err("gap must block execution");
    match err {
        EngineError::MappingIncomplete(gaps) => {
            assert_eq!(gaps.len(), 1);
            assert_eq!(gaps[0].source_id, "roster.csv");
            assert_eq!(gaps[0].missing, vec!["Salary"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(project.status(), ProjectStatus::Mapped);
    assert!(
        project
            .diagnostics()
            .has_issue(IssueKind::MappingIncomplete, "roster.csv")
    );
}

#[test]
fn marking_a_column_optional_unblocks_execution() {
    let mut project = project_with_incomplete_file();
    project.mark_column_optional("Salary").expect("optional");
    let table = project.execute().expect("execute");
    let park = table.rows_from("roster.csv").next().expect("roster row");
    assert_eq!(park.cells[1], CellValue::Empty);
    assert_eq!(park.cells[3], CellValue::String("HR".to_string()));

    assert!(matches!(
        MergeProject::new(payroll_schema(), EngineConfig::default()).mark_column_optional("Bonus"),
        Err(EngineError::UnknownColumn(_))
    ));
}

#[test]
fn excluding_incomplete_files_unblocks_execution() {
    let mut project = project_with_incomplete_file();
    let excluded = project.exclude_incomplete_files().expect("exclude");
    assert_eq!(excluded, vec!["roster.csv"]);

    let table = project.execute().expect("execute");
    assert_eq!(table.rows_from("roster.csv").count(), 0);
    assert_eq!(table.len(), 2);
    let diagnostics = project.diagnostics();
    assert!(
        diagnostics
            .skipped_files
            .iter()
            .any(|file| file.source_id == "roster.csv")
    );
    assert_eq!(
        project.file("roster.csv").map(|f| f.status()),
        Some(FileStatus::Excluded)
    );
}

#[test]
fn unreadable_file_is_skipped_unless_strict() {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file("english.csv", english_export())
        .expect("attach");
    project
        .attach_unreadable("broken.xlsx", "not a spreadsheet")
        .expect("attach unreadable");
    project.analyze().expect("analyze");

    let table = project.execute().expect("non-strict execute");
    assert_eq!(table.len(), 2);
    let diagnostics = project.diagnostics();
    assert!(diagnostics.has_issue(IssueKind::FileRead, "broken.xlsx"));
    assert!(diagnostics.has_issue(IssueKind::FileSkipped, "broken.xlsx"));
    assert_eq!(
        project.file("broken.xlsx").map(|f| f.status()),
        Some(FileStatus::Skipped)
    );
}

#[test]
fn strict_mode_aborts_on_an_unreadable_file() {
    let config = EngineConfig {
        strict: true,
        ..EngineConfig::default()
    };
    let mut project = MergeProject::new(payroll_schema(), config);
    project
        .attach_file("english.csv", english_export())
        .expect("attach");
    project
        .attach_unreadable("broken.xlsx", "not a spreadsheet")
        .expect("attach unreadable");
    project.analyze().expect("analyze");

    let err = project.execute().expect_err("strict merge aborts");
    assert!(matches!(err, EngineError::MergeAborted { ref source_id, .. } if source_id == "broken.xlsx"));
    assert_eq!(project.status(), ProjectStatus::Failed);
    assert!(project.output().is_none());

    let english = project.diagnostics().file("english.csv").expect("english");
    assert_eq!(english.status, FileStatus::Analyzed);
    assert_eq!(english.rows_merged, 0);
    assert_eq!(english.total_errors(), 0);
    assert_eq!(
        project.file("english.csv").map(|f| f.status()),
        Some(FileStatus::Analyzed)
    );
    assert!(
        project
            .diagnostics()
            .has_issue(IssueKind::MergeAborted, "broken.xlsx")
    );

    assert!(matches!(
        project.attach_file("late.csv", english_export()),
        Err(EngineError::TerminalState(ProjectStatus::Failed))
    ));
    project.reset().expect("reset");
    assert_eq!(project.status(), ProjectStatus::Draft);
    assert_eq!(
        project.file("broken.xlsx").map(|f| f.status()),
        Some(FileStatus::Unreadable)
    );
}

#[test]
fn rerunning_after_reset_reproduces_the_output() {
    let mut project = analyzed_project(EngineConfig::default());
    let first = project.execute().expect("first run").fingerprint();

    project.reset().expect("reset");
    assert!(project.output().is_none());
    project.analyze().expect("re-analyze");
    let second = project.execute().expect("second run").fingerprint();
    assert_eq!(first, second);

    let mut fresh = analyzed_project(EngineConfig::default());
    assert_eq!(fresh.execute().expect("fresh run").fingerprint(), first);
}

#[test]
fn blank_rows_are_skipped_and_recorded() {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file(
            "gappy.csv",
            sheet(&[
                &["Name", "Salary"],
                &["Kim", "100"],
                &["", ""],
                &["Choi", "200"],
            ]),
        )
        .expect("attach");
    project.analyze().expect("analyze");
    let table = project.execute().expect("execute");
    assert_eq!(table.len(), 2);
    assert_eq!(table.rows()[1].provenance.row_index, 3);

    let skipped = &project.diagnostics().skipped_rows;
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].row, 3);
    assert_eq!(skipped[0].reason, BLANK_ROW_REASON);
}

#[test]
fn low_confidence_header_is_reported_not_fatal() {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file("numbers.csv", sheet(&[&["1", "2"], &["3", "4"]]))
        .expect("attach");
    project.analyze().expect("analyze");
    let diagnostics = project.diagnostics();
    assert!(diagnostics.has_issue(IssueKind::HeaderNotDetected, "numbers.csv"));
    assert!(diagnostics.file("numbers.csv").expect("file").low_confidence);
    assert!(
        project
            .readiness()
            .iter()
            .any(|gap| gap.source_id == "numbers.csv")
    );
}

#[test]
fn header_row_can_be_pinned_by_hand() {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file("korean.csv", korean_export())
        .expect("attach");
    project.analyze().expect("analyze");

    let err = project
        .set_header_row("korean.csv", 50)
        .expect_err("row out of range");
    assert!(matches!(err, EngineError::HeaderRowOutOfRange { rows: 5, .. }));

    project.set_header_row("korean.csv", 3).expect("pin row");
    let header = project
        .file("korean.csv")
        .and_then(|f| f.header())
        .expect("header");
    assert!(header.manual);
    assert_eq!(header.row_index, 3);

    project.reanalyze_file("korean.csv").expect("reanalyze");
    let header = project
        .file("korean.csv")
        .and_then(|f| f.header())
        .expect("header");
    assert_eq!(header.row_index, 3);
}

#[test]
fn override_set_applies_every_decision() {
    let mut project = project_with_incomplete_file();
    let mut set = OverrideSet::default();
    set.files.insert(
        "roster.csv".to_string(),
        FileOverrides {
            exclude: Some("no pay data".to_string()),
            ..FileOverrides::default()
        },
    );
    set.optional_columns.push("HireDate".to_string());
    set.apply(&mut project).expect("apply overrides");

    assert!(project.optional_columns().contains("HireDate"));
    assert_eq!(
        project.file("roster.csv").and_then(|f| f.failure()),
        Some("no pay data")
    );
    assert!(project.readiness().is_empty());
}

#[test]
fn override_header_rows_count_from_one() {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file("korean.csv", korean_export())
        .expect("attach");
    project.analyze().expect("analyze");

    let mut set = OverrideSet::default();
    set.files.insert(
        "korean.csv".to_string(),
        FileOverrides {
            header_row: Some(3),
            ..FileOverrides::default()
        },
    );
    set.apply(&mut project).expect("apply overrides");
    let header = project
        .file("korean.csv")
        .and_then(|f| f.header())
        .expect("header");
    assert_eq!(header.row_index, 2);
    assert_eq!(header.header_names, vec!["성명", "급여", "입사일"]);
    assert_eq!(
        project.diagnostics().file("korean.csv").and_then(|f| f.header_row),
        Some(3)
    );

    set.files.get_mut("korean.csv").expect("entry").header_row = Some(0);
    assert!(matches!(
        set.apply(&mut project),
        Err(EngineError::HeaderRowOutOfRange { row: 0, .. })
    ));
}

#[test]
fn file_excluded_before_analysis_is_analyzed_when_re_included() {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file("english.csv", english_export())
        .expect("attach english");
    project
        .attach_file("korean.csv", korean_export())
        .expect("attach korean");
    project
        .exclude_file("korean.csv", "checked later")
        .expect("exclude in draft");
    project.analyze().expect("analyze");
    assert!(project.file("korean.csv").and_then(|f| f.header()).is_none());

    project
        .confirm_mapping("korean.csv", Overrides::new())
        .expect("re-include");
    let korean = project.file("korean.csv").expect("korean");
    assert_eq!(korean.status(), FileStatus::Analyzed);
    assert!(korean.is_confirmed());
    assert_eq!(korean.header().map(|h| h.row_index), Some(2));

    let table = project.execute().expect("execute");
    assert_eq!(table.rows_from("korean.csv").count(), 2);
}

#[test]
fn operations_outside_their_state_are_rejected() {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file("english.csv", english_export())
        .expect("attach");

    assert!(matches!(
        project.confirm_mapping("english.csv", Overrides::new()),
        Err(EngineError::InvalidTransition { from: ProjectStatus::Draft, .. })
    ));
    project.analyze().expect("analyze");
    assert!(matches!(
        project.confirm_mapping("missing.csv", Overrides::new()),
        Err(EngineError::UnknownFile(_))
    ));
    project.execute().expect("execute");
    assert!(matches!(
        project.analyze(),
        Err(EngineError::TerminalState(ProjectStatus::Completed))
    ));
}

#[test]
fn shared_project_rejects_requests_while_busy() {
    let mut project = MergeProject::new(payroll_schema(), EngineConfig::default());
    project
        .attach_file("english.csv", english_export())
        .expect("attach");
    let shared = SharedProject::new(project);

    let job = shared
        .with(|project| project.begin_analysis())
        .expect("lock")
        .expect("begin analysis");
    assert_eq!(shared.status().expect("status"), ProjectStatus::Analyzing);
    assert!(matches!(
        shared.analyze(),
        Err(EngineError::Busy(ProjectStatus::Analyzing))
    ));
    assert!(matches!(
        shared.execute(),
        Err(EngineError::Busy(ProjectStatus::Analyzing))
    ));

    let outcome = job.run();
    shared
        .with(|project| project.complete_analysis(outcome))
        .expect("lock")
        .expect("complete analysis");
    assert_eq!(shared.status().expect("status"), ProjectStatus::Mapped);

    let worker = shared.clone();
    let table = std::thread::spawn(move || worker.execute())
        .join()
        .expect("worker thread")
        .expect("execute");
    assert_eq!(table.len(), 2);
    assert_eq!(shared.status().expect("status"), ProjectStatus::Completed);
}
