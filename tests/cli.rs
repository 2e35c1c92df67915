mod common;

use std::fs;

use assert_cmd::Command;
use common::{PAYROLL_SCHEMA_YAML, TestWorkspace};
use encoding_rs::EUC_KR;
use predicates::str::contains;

const KOREAN_CSV: &str = "2024년 급여대장,,\n,,\n성명,급여,입사일\n홍길동,\"1,200,000원\",2023-03-02\n김철수,350만원,2023년 7월 1일\n";
const ENGLISH_CSV: &str = "Employee Name,Pay,Start Date,Department\nJane Doe,\"$4,500.00\",\"Jan 15, 2024\",Sales\nJohn Roe,N/A,2024/02/01,Ops\n";
const ROSTER_CSV: &str = "Name,Department\nPark,HR\n";

fn sheet_merge() -> Command {
    Command::cargo_bin("sheet-merge").expect("binary exists")
}

#[test]
fn merge_writes_canonical_csv_with_provenance() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("schema.yaml", PAYROLL_SCHEMA_YAML);
    let korean = workspace.write("korean.csv", KOREAN_CSV);
    let english = workspace.write("english.csv", ENGLISH_CSV);
    let output = workspace.path().join("merged.csv");
    let diagnostics = workspace.path().join("diagnostics.json");

    sheet_merge()
        .args(["merge", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&korean)
        .arg(&english)
        .arg("-o")
        .arg(&output)
        .arg("--diagnostics")
        .arg(&diagnostics)
        .assert()
        .success();

    let merged = fs::read_to_string(&output).expect("read merged output");
    let lines = merged.lines().collect::<Vec<_>>();
    assert_eq!(
        lines[0],
        "source_id,source_row,Name,Salary,HireDate,Department"
    );
    assert_eq!(lines[1], "korean.csv,4,홍길동,1200000,2023-03-02,");
    assert_eq!(lines[2], "korean.csv,5,김철수,3500000,2023-07-01,");
    assert_eq!(lines[3], "english.csv,2,Jane Doe,4500,2024-01-15,Sales");
    assert_eq!(
        lines[4],
        "english.csv,3,John Roe,#ERROR(unparseable number),2024-02-01,Ops"
    );

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&diagnostics).expect("read diagnostics"))
            .expect("parse diagnostics");
    assert_eq!(report["overall_status"], "completed");
    assert_eq!(report["per_file"][0]["header_row"], 3);
}

#[test]
fn merge_refuses_incomplete_mappings() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("schema.yaml", PAYROLL_SCHEMA_YAML);
    let roster = workspace.write("roster.csv", ROSTER_CSV);
    let english = workspace.write("english.csv", ENGLISH_CSV);
    let output = workspace.path().join("merged.csv");

    sheet_merge()
        .args(["merge", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&english)
        .arg(&roster)
        .arg("-o")
        .arg(&output)
        .assert()
        .failure()
        .stderr(contains("mapping incomplete"))
        .stderr(contains("'roster.csv' is missing required column(s) Salary"));
    assert!(!output.exists());

    sheet_merge()
        .args(["merge", "--exclude-incomplete", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&english)
        .arg(&roster)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();
    let merged = fs::read_to_string(&output).expect("read merged output");
    assert!(!merged.contains("roster.csv"));
}

#[test]
fn overrides_file_resolves_unmapped_headers() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("schema.yaml", PAYROLL_SCHEMA_YAML);
    let legacy = workspace.write(
        "legacy.csv",
        "Employee Name,Pay (KRW),Memo\nLee,\"2,000,000\",x\n",
    );
    let overrides = workspace.write(
        "overrides.yaml",
        "files:\n  legacy.csv:\n    columns:\n      \"Pay (KRW)\": Salary\n      Memo: ~\n",
    );

    sheet_merge()
        .args(["merge", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&legacy)
        .arg("--overrides")
        .arg(&overrides)
        .assert()
        .success()
        .stdout(contains("legacy.csv,2,Lee,2000000,,"));
}

#[test]
fn legacy_encoded_input_is_decoded() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("schema.yaml", PAYROLL_SCHEMA_YAML);
    let (bytes, _, _) = EUC_KR.encode("성명,급여\n홍길동,\"1,000원\"\n");
    let input = workspace.write_bytes("euckr.csv", &bytes);

    sheet_merge()
        .args(["merge", "--input-encoding", "euc-kr", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&input)
        .assert()
        .success()
        .stdout(contains("euckr.csv,2,홍길동,1000,,"));
}

#[test]
fn detect_reports_header_row_and_title_lines() {
    let workspace = TestWorkspace::new();
    let korean = workspace.write("korean.csv", KOREAN_CSV);

    sheet_merge()
        .args(["detect", "-i"])
        .arg(&korean)
        .assert()
        .success()
        .stdout(contains("header row: 3"))
        .stdout(contains("row 1: 2024년 급여대장"))
        .stdout(contains("입사일"));
}

#[test]
fn header_row_printed_by_detect_pins_the_same_row() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("schema.yaml", PAYROLL_SCHEMA_YAML);
    let korean = workspace.write("korean.csv", KOREAN_CSV);

    let detected = sheet_merge()
        .args(["detect", "-i"])
        .arg(&korean)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let detected = String::from_utf8(detected).expect("utf-8 output");
    let row = detected
        .lines()
        .find_map(|line| line.strip_prefix("header row: "))
        .and_then(|rest| rest.split_whitespace().next())
        .expect("header row line");

    let overrides = workspace.write(
        "overrides.yaml",
        &format!("files:\n  korean.csv:\n    header_row: {row}\n"),
    );
    sheet_merge()
        .args(["merge", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&korean)
        .arg("--overrides")
        .arg(&overrides)
        .assert()
        .success()
        .stdout(contains("korean.csv,4,홍길동,1200000,2023-03-02,"));
}

#[test]
fn analyze_prints_mappings_and_gaps() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("schema.yaml", PAYROLL_SCHEMA_YAML);
    let roster = workspace.write("roster.csv", ROSTER_CSV);
    let report = workspace.path().join("report.json");

    sheet_merge()
        .args(["analyze", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&roster)
        .arg("--report")
        .arg(&report)
        .assert()
        .success()
        .stdout(contains("== roster.csv =="))
        .stdout(contains("missing"))
        .stdout(contains("gap: 'roster.csv' is missing required column(s) Salary"));
    assert!(report.exists());
}

#[test]
fn unreadable_input_is_skipped_or_fatal_with_strict() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("schema.yaml", PAYROLL_SCHEMA_YAML);
    let english = workspace.write("english.csv", ENGLISH_CSV);
    let missing = workspace.path().join("absent.csv");

    sheet_merge()
        .args(["merge", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&english)
        .arg(&missing)
        .assert()
        .success()
        .stdout(contains("Jane Doe"));

    sheet_merge()
        .args(["merge", "--strict", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&english)
        .arg(&missing)
        .assert()
        .failure()
        .stderr(contains("merge aborted by 'absent.csv'"));
}

#[test]
fn templates_are_saved_listed_and_reused() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("schema.yaml", PAYROLL_SCHEMA_YAML);
    let templates = workspace.path().join("templates");
    let legacy = workspace.write("legacy.csv", "Employee Name,Pay (KRW)\nLee,\"2,000,000\"\n");
    let overrides = workspace.write(
        "overrides.yaml",
        "files:\n  legacy.csv:\n    columns:\n      \"Pay (KRW)\": Salary\n",
    );

    sheet_merge()
        .args(["template", "save", "-n", "Legacy Payroll", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&legacy)
        .arg("--overrides")
        .arg(&overrides)
        .arg("--templates-dir")
        .arg(&templates)
        .assert()
        .success()
        .stdout(contains("legacy_payroll"));

    sheet_merge()
        .args(["template", "show", "--templates-dir"])
        .arg(&templates)
        .assert()
        .success()
        .stdout(contains("legacy_payroll"));

    sheet_merge()
        .args(["template", "show", "legacy_payroll", "--templates-dir"])
        .arg(&templates)
        .assert()
        .success()
        .stdout(contains("Pay (KRW)"));

    sheet_merge()
        .args(["merge", "-t", "legacy_payroll", "--templates-dir"])
        .arg(&templates)
        .arg("-i")
        .arg(&legacy)
        .assert()
        .success()
        .stdout(contains("legacy.csv,2,Lee,2000000,,"));
}

#[test]
fn output_dates_follow_the_requested_format() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("schema.yaml", PAYROLL_SCHEMA_YAML);
    let korean = workspace.write("korean.csv", KOREAN_CSV);

    sheet_merge()
        .args(["merge", "--date-format", "%Y.%m.%d", "-s"])
        .arg(&schema)
        .arg("-i")
        .arg(&korean)
        .assert()
        .success()
        .stdout(contains("korean.csv,4,홍길동,1200000,2023.03.02,"));

    let config = workspace.write("config.yaml", "output:\n  date_format: \"%Q\"\n");
    sheet_merge()
        .args(["merge", "--config"])
        .arg(&config)
        .arg("-s")
        .arg(&schema)
        .arg("-i")
        .arg(&korean)
        .assert()
        .failure()
        .stderr(contains("Invalid output date format"));
}
