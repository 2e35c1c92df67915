//! Header row detection for sheets whose header is not necessarily row 0.
//!
//! Real exports often carry a title, a company name or a "단위: 원" line above
//! the actual column header. The detector scores the first rows of a sheet
//! and picks the one that looks most like a header followed by data.

use std::{collections::HashSet, sync::OnceLock};

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    cell::{RawCell, SheetMatrix},
    normalize::looks_like_data,
};

pub const DEFAULT_SEARCH_WINDOW: usize = 10;

/// Scoring weights and thresholds. All values are heuristics; tune them
/// against real samples rather than treating them as fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_columns: usize,
    pub confidence_floor: f64,
    pub fill_weight: f64,
    pub text_weight: f64,
    pub unique_weight: f64,
    pub next_row_weight: f64,
    pub position_weight: f64,
    pub title_penalty: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_columns: 2,
            confidence_floor: 0.5,
            fill_weight: 0.25,
            text_weight: 0.35,
            unique_weight: 0.15,
            next_row_weight: 0.25,
            position_weight: 0.1,
            title_penalty: 0.5,
        }
    }
}

impl DetectorConfig {
    fn positive_weight(&self) -> f64 {
        let total = self.fill_weight + self.text_weight + self.unique_weight + self.next_row_weight;
        if total > 0.0 { total } else { 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderDetectionResult {
    pub row_index: usize,
    pub confidence: f64,
    pub header_names: Vec<String>,
    /// No candidate cleared the confidence floor; row 0 was used as a fallback.
    #[serde(default)]
    pub low_confidence: bool,
    /// The row was chosen by a person rather than by scoring.
    #[serde(default)]
    pub manual: bool,
}

fn title_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^\d{4}\s*년",
            r"^제?\s*\d+\s*기",
            r"작성\s*[일자]",
            r"기간\s*:",
            r"단위\s*:",
            r"^\(\s*단위",
            r"^[가-힣]+\s*(주식)?회사",
            r"^\(주\)",
            r"(?i)^(report|period|unit|prepared)\b.*:",
        ]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("valid title pattern"))
        .collect()
    })
}

fn is_title_like(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && title_patterns().iter().any(|re| re.is_match(trimmed))
}

fn is_header_like(cell: &RawCell) -> bool {
    match cell {
        RawCell::Text(text) => {
            let trimmed = text.trim();
            !trimmed.is_empty()
                && !looks_like_data(trimmed)
                && trimmed.chars().any(char::is_alphabetic)
        }
        _ => false,
    }
}

fn is_data_like(cell: &RawCell) -> bool {
    match cell {
        RawCell::Empty => false,
        RawCell::Text(text) => looks_like_data(text),
        _ => true,
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeaderDetector {
    config: DetectorConfig,
}

impl HeaderDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detect(&self, matrix: &SheetMatrix, search_window: usize) -> HeaderDetectionResult {
        let window = search_window.max(1).min(matrix.len());
        let width = matrix.rows()[..window]
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0);

        let mut best: Option<(usize, f64)> = None;
        for idx in 0..window {
            let Some(score) = self.score_row(matrix, idx, width, search_window.max(1)) else {
                continue;
            };
            debug!("Header candidate row {idx} scored {score:.3}");
            // Strictly greater keeps the earliest row on ties.
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((idx, score));
            }
        }

        match best {
            Some((row_index, score)) if score >= self.config.confidence_floor => {
                HeaderDetectionResult {
                    row_index,
                    confidence: score,
                    header_names: header_names(matrix.row(row_index).unwrap_or_default()),
                    low_confidence: false,
                    manual: false,
                }
            }
            _ => {
                warn!(
                    "No header row cleared confidence floor {:.2}; falling back to row 0",
                    self.config.confidence_floor
                );
                HeaderDetectionResult {
                    row_index: 0,
                    confidence: 0.0,
                    header_names: header_names(matrix.row(0).unwrap_or_default()),
                    low_confidence: true,
                    manual: false,
                }
            }
        }
    }

    /// Result for a header row chosen by hand.
    pub fn manual(matrix: &SheetMatrix, row_index: usize) -> Option<HeaderDetectionResult> {
        let row = matrix.row(row_index)?;
        Some(HeaderDetectionResult {
            row_index,
            confidence: 1.0,
            header_names: header_names(row),
            low_confidence: false,
            manual: true,
        })
    }

    /// Splits a sheet into the rows above the header and the data rows below it.
    pub fn split<'a>(
        matrix: &'a SheetMatrix,
        result: &HeaderDetectionResult,
    ) -> (&'a [Vec<RawCell>], &'a [Vec<RawCell>]) {
        let rows = matrix.rows();
        let header = result.row_index.min(rows.len());
        let data_start = (header + 1).min(rows.len());
        (&rows[..header], &rows[data_start..])
    }

    fn score_row(
        &self,
        matrix: &SheetMatrix,
        idx: usize,
        width: usize,
        search_window: usize,
    ) -> Option<f64> {
        let row = matrix.row(idx)?;
        let non_empty: Vec<&RawCell> = row.iter().filter(|cell| !cell.is_empty()).collect();
        if non_empty.len() < self.config.min_columns.max(1) || width == 0 {
            return None;
        }
        let count = non_empty.len() as f64;

        let fill_ratio = count / width as f64;
        let labels = non_empty.iter().filter(|c| is_header_like(c)).count();
        // A row of pure data is never a header.
        if labels == 0 {
            return None;
        }
        let text_ratio = labels as f64 / count;
        let unique_ratio = non_empty
            .iter()
            .map(|c| c.as_display().trim().to_lowercase())
            .collect::<HashSet<_>>()
            .len() as f64
            / count;
        let next_ratio = next_non_blank_row(matrix, idx)
            .map(|next| {
                let cells: Vec<&RawCell> = next.iter().filter(|c| !c.is_empty()).collect();
                cells.iter().filter(|c| is_data_like(c)).count() as f64 / cells.len() as f64
            })
            .unwrap_or(0.0);

        let config = &self.config;
        let mut score = config.fill_weight * fill_ratio
            + config.text_weight * text_ratio
            + config.unique_weight * unique_ratio
            + config.next_row_weight * next_ratio;
        score /= config.positive_weight();
        score -= config.position_weight * idx as f64 / search_window as f64;

        let first = non_empty.first().map(|c| c.as_display()).unwrap_or_default();
        if is_title_like(&first) {
            score -= config.title_penalty;
        }
        Some(score.clamp(0.0, 1.0))
    }
}

fn next_non_blank_row(matrix: &SheetMatrix, idx: usize) -> Option<&[RawCell]> {
    matrix.rows()[idx + 1..]
        .iter()
        .find(|row| row.iter().any(|cell| !cell.is_empty()))
        .map(Vec::as_slice)
}

fn header_names(row: &[RawCell]) -> Vec<String> {
    row.iter()
        .enumerate()
        .map(|(idx, cell)| {
            let text = cell.as_display();
            let trimmed = text.trim();
            if trimmed.is_empty() {
                format!("column_{idx}")
            } else {
                trimmed.to_string()
            }
        })
        .collect()
}
