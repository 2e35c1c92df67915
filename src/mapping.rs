//! Column mapping: detected header names onto the canonical schema.
//!
//! Each header is tried against column names, then aliases, then a fuzzy
//! similarity pass. A canonical column accepts at most one header per file;
//! losing candidates are unmapped and recorded as ambiguous.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::{error::EngineError, schema::CanonicalSchema};

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Alias,
    Fuzzy,
    Manual,
    Unmapped,
}

impl MatchTier {
    /// Precedence when two headers compete for one column.
    pub fn rank(self) -> u8 {
        match self {
            MatchTier::Manual => 4,
            MatchTier::Exact => 3,
            MatchTier::Alias => 2,
            MatchTier::Fuzzy => 1,
            MatchTier::Unmapped => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchTier::Exact => "exact",
            MatchTier::Alias => "alias",
            MatchTier::Fuzzy => "fuzzy",
            MatchTier::Manual => "manual",
            MatchTier::Unmapped => "unmapped",
        }
    }
}

/// A person's decision for one source header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualOverride {
    Column(String),
    Ignore,
}

impl From<Option<String>> for ManualOverride {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(column) => ManualOverride::Column(column),
            None => ManualOverride::Ignore,
        }
    }
}

pub type Overrides = BTreeMap<String, ManualOverride>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub source_header: String,
    pub source_index: usize,
    pub target: Option<String>,
    pub tier: MatchTier,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    AmbiguousMapping,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingNote {
    pub kind: NoteKind,
    pub source_header: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnMapping {
    entries: Vec<MappingEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    notes: Vec<MappingNote>,
}

impl ColumnMapping {
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn notes(&self) -> &[MappingNote] {
        &self.notes
    }

    pub fn entry_for_column(&self, column: &str) -> Option<&MappingEntry> {
        self.entries
            .iter()
            .find(|entry| entry.target.as_deref() == Some(column))
    }

    /// Source column index feeding `column`, if any.
    pub fn target_index(&self, column: &str) -> Option<usize> {
        self.entry_for_column(column).map(|entry| entry.source_index)
    }

    pub fn tier_for(&self, column: &str) -> MatchTier {
        self.entry_for_column(column)
            .map_or(MatchTier::Unmapped, |entry| entry.tier)
    }

    pub fn mapped_count(&self) -> usize {
        self.entries.iter().filter(|e| e.target.is_some()).count()
    }

    /// Required columns (minus those marked optional) with no source header.
    pub fn missing_required(
        &self,
        schema: &CanonicalSchema,
        optional: &BTreeSet<String>,
    ) -> Vec<String> {
        schema
            .required_columns()
            .filter(|column| !optional.contains(&column.name))
            .filter(|column| self.entry_for_column(&column.name).is_none())
            .map(|column| column.name.clone())
            .collect()
    }
}

/// Lowercases, trims and turns punctuation into single spaces.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .join(" ")
}

fn compact(normalized: &str) -> String {
    normalized.chars().filter(|ch| !ch.is_whitespace()).collect()
}

fn token_overlap(left: &str, right: &str) -> f64 {
    let a: BTreeSet<&str> = left.split_whitespace().collect();
    let b: BTreeSet<&str> = right.split_whitespace().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Similarity in `[0, 1]`: the better of a character diff ratio and token overlap.
pub fn similarity(left: &str, right: &str) -> f64 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let ratio = f64::from(TextDiff::from_chars(left, right).ratio());
    ratio.max(token_overlap(left, right))
}

struct ColumnKeys {
    name: String,
    name_compact: String,
    aliases: Vec<String>,
    alias_compacts: Vec<String>,
}

impl ColumnKeys {
    fn build(schema: &CanonicalSchema) -> Vec<Self> {
        schema
            .columns()
            .iter()
            .map(|column| {
                let name = normalize_header(&column.name);
                let aliases: Vec<String> = column
                    .aliases
                    .iter()
                    .map(|alias| normalize_header(alias))
                    .filter(|alias| !alias.is_empty())
                    .collect();
                ColumnKeys {
                    name_compact: compact(&name),
                    alias_compacts: aliases.iter().map(|a| compact(a)).collect(),
                    name,
                    aliases,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub fuzzy_threshold: f64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

/// A cluster of unmapped headers that look like the same column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedGroup {
    pub proposed_name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnMapper {
    config: MapperConfig,
}

impl ColumnMapper {
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    pub fn infer(&self, header_names: &[String], schema: &CanonicalSchema) -> ColumnMapping {
        let keys = ColumnKeys::build(schema);
        let candidates = header_names
            .iter()
            .map(|header| self.match_header(header, &keys))
            .collect::<Vec<_>>();
        resolve(header_names, schema, candidates, Vec::new())
    }

    /// Inference with manual decisions applied first. Overrides naming a
    /// column outside the schema are rejected.
    pub fn infer_with_overrides(
        &self,
        header_names: &[String],
        schema: &CanonicalSchema,
        overrides: &Overrides,
    ) -> Result<ColumnMapping, EngineError> {
        for decision in overrides.values() {
            if let ManualOverride::Column(column) = decision
                && schema.column_index(column).is_none()
            {
                return Err(EngineError::UnknownColumn(column.clone()));
            }
        }

        let keys = ColumnKeys::build(schema);
        let mut notes = Vec::new();
        let candidates = header_names
            .iter()
            .map(|header| match overrides.get(header) {
                Some(ManualOverride::Column(column)) => Candidate {
                    column: schema.column_index(column),
                    tier: MatchTier::Manual,
                    score: 1.0,
                },
                Some(ManualOverride::Ignore) => {
                    notes.push(MappingNote {
                        kind: NoteKind::Ignored,
                        source_header: header.clone(),
                        column: None,
                        message: format!("'{header}' ignored by manual override"),
                    });
                    Candidate {
                        column: None,
                        tier: MatchTier::Manual,
                        score: 0.0,
                    }
                }
                None => self.match_header(header, &keys),
            })
            .collect::<Vec<_>>();
        Ok(resolve(header_names, schema, candidates, notes))
    }

    fn match_header(&self, header: &str, keys: &[ColumnKeys]) -> Candidate {
        let normalized = normalize_header(header);
        if normalized.is_empty() {
            return Candidate::unmapped();
        }
        let compacted = compact(&normalized);

        if let Some(idx) = keys
            .iter()
            .position(|key| key.name == normalized || key.name_compact == compacted)
        {
            return Candidate::matched(idx, MatchTier::Exact, 1.0);
        }

        if let Some(idx) = keys.iter().position(|key| {
            key.aliases.contains(&normalized) || key.alias_compacts.contains(&compacted)
        }) {
            return Candidate::matched(idx, MatchTier::Alias, 1.0);
        }

        let mut best: Option<(usize, f64)> = None;
        for (idx, key) in keys.iter().enumerate() {
            let score = std::iter::once(&key.name)
                .chain(key.aliases.iter())
                .map(|candidate| similarity(&normalized, candidate))
                .fold(0.0_f64, f64::max);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((idx, score));
            }
        }
        match best {
            Some((idx, score)) if score >= self.config.fuzzy_threshold => {
                debug!("Fuzzy match '{header}' -> column #{idx} ({score:.3})");
                Candidate::matched(idx, MatchTier::Fuzzy, score)
            }
            _ => Candidate::unmapped(),
        }
    }

    /// Groups headers that no file could map, across all files, by mutual
    /// similarity. Each group proposes its first member as a new column name.
    pub fn suggest_groups(
        &self,
        headers_per_file: &[Vec<String>],
        schema: &CanonicalSchema,
    ) -> Vec<SuggestedGroup> {
        let keys = ColumnKeys::build(schema);
        let unmapped = headers_per_file
            .iter()
            .flatten()
            .unique()
            .filter(|header| self.match_header(header, &keys).column.is_none())
            .cloned()
            .collect::<Vec<_>>();

        let mut assigned = vec![false; unmapped.len()];
        let mut groups = Vec::new();
        for (i, first) in unmapped.iter().enumerate() {
            if assigned[i] {
                continue;
            }
            let base = normalize_header(first);
            let mut members = vec![first.clone()];
            for (j, other) in unmapped.iter().enumerate().skip(i + 1) {
                if !assigned[j]
                    && similarity(&base, &normalize_header(other)) >= self.config.fuzzy_threshold
                {
                    assigned[j] = true;
                    members.push(other.clone());
                }
            }
            if members.len() > 1 {
                groups.push(SuggestedGroup {
                    proposed_name: first.clone(),
                    members,
                });
            }
        }
        groups
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    column: Option<usize>,
    tier: MatchTier,
    score: f64,
}

impl Candidate {
    fn matched(column: usize, tier: MatchTier, score: f64) -> Self {
        Self {
            column: Some(column),
            tier,
            score,
        }
    }

    fn unmapped() -> Self {
        Self {
            column: None,
            tier: MatchTier::Unmapped,
            score: 0.0,
        }
    }
}

fn resolve(
    header_names: &[String],
    schema: &CanonicalSchema,
    mut candidates: Vec<Candidate>,
    mut notes: Vec<MappingNote>,
) -> ColumnMapping {
    // Winner per canonical column: highest tier, then first encountered.
    let mut winners: BTreeMap<usize, usize> = BTreeMap::new();
    for (header_idx, candidate) in candidates.iter().enumerate() {
        let Some(column) = candidate.column else {
            continue;
        };
        match winners.get(&column) {
            Some(&current) if candidates[current].tier.rank() >= candidate.tier.rank() => {}
            _ => {
                winners.insert(column, header_idx);
            }
        }
    }

    for (header_idx, candidate) in candidates.iter_mut().enumerate() {
        let Some(column) = candidate.column else {
            continue;
        };
        let winner = winners[&column];
        if winner == header_idx {
            continue;
        }
        let column_name = schema.columns()[column].name.clone();
        let message = format!(
            "'{}' also matched '{}' ({}) but '{}' was kept",
            header_names[header_idx],
            column_name,
            candidate.tier.as_str(),
            header_names[winner]
        );
        warn!("Ambiguous mapping: {message}");
        notes.push(MappingNote {
            kind: NoteKind::AmbiguousMapping,
            source_header: header_names[header_idx].clone(),
            column: Some(column_name),
            message,
        });
        *candidate = Candidate::unmapped();
    }

    let entries = header_names
        .iter()
        .zip(candidates)
        .enumerate()
        .map(|(source_index, (header, candidate))| MappingEntry {
            source_header: header.clone(),
            source_index,
            target: candidate
                .column
                .map(|column| schema.columns()[column].name.clone()),
            tier: candidate.tier,
            score: candidate.score,
        })
        .collect();

    ColumnMapping { entries, notes }
}
