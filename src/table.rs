//! Plain-text reports for the command line: detected headers, per-file
//! mappings and merge summaries, laid out as aligned columns.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::{
    diagnostics::Diagnostics,
    project::{MergeFile, MergeProject},
    schema::CanonicalSchema,
};

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let rule = widths
        .iter()
        .map(|w| "-".repeat((*w).max(3)))
        .collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

/// Terminal columns taken by `value`; Hangul and CJK take two.
fn display_width(value: &str) -> usize {
    value
        .chars()
        .map(|ch| match ch as u32 {
            0x1100..=0x115F | 0x2E80..=0x9FFF | 0xAC00..=0xD7A3 | 0xF900..=0xFAFF
            | 0xFF00..=0xFF60 | 0xFFE0..=0xFFE6 => 2,
            _ => 1,
        })
        .sum()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// One line per file: header row, confidence and mapping coverage.
pub fn detection_report(project: &MergeProject) -> (Vec<String>, Vec<Vec<String>>) {
    let rows = project
        .files()
        .iter()
        .map(|file| {
            let (row, confidence) = match file.header() {
                Some(header) => {
                    let mut confidence = format!("{:.2}", header.confidence);
                    if header.manual {
                        confidence.push_str(" (manual)");
                    } else if header.low_confidence {
                        confidence.push_str(" (low)");
                    }
                    ((header.row_index + 1).to_string(), confidence)
                }
                None => ("-".to_string(), "-".to_string()),
            };
            let mapped = file.mapping().map_or_else(
                || "-".to_string(),
                |m| format!("{}/{}", m.mapped_count(), project.schema().len()),
            );
            vec![
                file.source_id().to_string(),
                file.status().to_string(),
                row,
                confidence,
                mapped,
                file.failure().or(file.read_error()).unwrap_or_default().to_string(),
            ]
        })
        .collect();
    (
        headers(&["file", "status", "header_row", "confidence", "mapped", "note"]),
        rows,
    )
}

/// One line per source header of `file`: where it goes and how it matched.
pub fn mapping_report(file: &MergeFile, schema: &CanonicalSchema) -> (Vec<String>, Vec<Vec<String>>) {
    let mut rows = file
        .mapping()
        .map(|mapping| {
            mapping
                .entries()
                .iter()
                .map(|entry| {
                    vec![
                        entry.source_header.clone(),
                        entry.target.clone().unwrap_or_else(|| "-".to_string()),
                        entry.tier.as_str().to_string(),
                        format!("{:.2}", entry.score),
                    ]
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if let Some(mapping) = file.mapping() {
        for column in schema.columns() {
            if mapping.entry_for_column(&column.name).is_none() {
                let marker = if column.required { "missing" } else { "unfed" };
                rows.push(vec![
                    "-".to_string(),
                    column.name.clone(),
                    marker.to_string(),
                    String::new(),
                ]);
            }
        }
    }
    (headers(&["source_header", "column", "tier", "score"]), rows)
}

/// One line per file after execution.
pub fn summary_report(diagnostics: &Diagnostics) -> (Vec<String>, Vec<Vec<String>>) {
    let rows = diagnostics
        .per_file
        .iter()
        .map(|file| {
            vec![
                file.source_id.clone(),
                file.status.to_string(),
                file.rows_merged.to_string(),
                file.total_errors().to_string(),
                file.failure.clone().unwrap_or_default(),
            ]
        })
        .collect();
    (
        headers(&["file", "status", "rows", "errors", "note"]),
        rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hangul_counts_double_width() {
        let table = render_table(
            &headers(&["성명", "x"]),
            &[vec!["Kim".to_string(), "1".to_string()]],
        );
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "성명  x");
        assert_eq!(lines[2], "Kim   1");
    }

    #[test]
    fn control_characters_are_flattened() {
        let table = render_table(&headers(&["a"]), &[vec!["x\ny".to_string()]]);
        assert!(table.ends_with("x y\n"));
    }
}
