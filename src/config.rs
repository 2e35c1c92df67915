use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, bail};
use chrono::format::{Item, StrftimeItems};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    cell::ISO_DATE_FORMAT,
    error::EngineError,
    header::{DEFAULT_SEARCH_WINDOW, DetectorConfig},
    mapping::{ManualOverride, MapperConfig, Overrides},
    normalize::NormalizerConfig,
    project::MergeProject,
};

/// Tunables for one merge project. Every field has a default, so a YAML file
/// only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Abort the whole merge when a file cannot be merged instead of skipping it.
    pub strict: bool,
    /// Number of leading rows scanned for a header.
    pub search_window: usize,
    pub detector: DetectorConfig,
    pub mapper: MapperConfig,
    pub normalizer: NormalizerConfig,
    pub output: OutputConfig,
}

/// How merged values are written out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// strftime pattern for date cells in CSV output.
    pub date_format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            date_format: ISO_DATE_FORMAT.to_string(),
        }
    }
}

impl OutputConfig {
    pub fn validate(&self) -> Result<()> {
        let items = StrftimeItems::new(&self.date_format).collect::<Vec<_>>();
        if items.is_empty() || items.iter().any(|item| matches!(item, Item::Error)) {
            bail!("Invalid output date format '{}'", self.date_format);
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict: false,
            search_window: DEFAULT_SEARCH_WINDOW,
            detector: DetectorConfig::default(),
            mapper: MapperConfig::default(),
            normalizer: NormalizerConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: EngineConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        config
            .output
            .validate()
            .with_context(|| format!("Validating config file {path:?}"))?;
        Ok(config)
    }
}

/// Manual decisions for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOverrides {
    /// 1-based row number, as printed by `detect` and `analyze`.
    pub header_row: Option<usize>,
    /// Source header to canonical column; `null` ignores the header.
    pub columns: BTreeMap<String, Option<String>>,
    /// Reason for leaving the file out of the merge.
    pub exclude: Option<String>,
}

impl FileOverrides {
    pub fn overrides(&self) -> Overrides {
        self.columns
            .iter()
            .map(|(header, target)| (header.clone(), ManualOverride::from(target.clone())))
            .collect()
    }
}

/// Manual decisions collected outside the engine, typically from a YAML file
/// edited between `analyze` and `merge`.
///
/// ```yaml
/// optional_columns: [Department]
/// files:
///   q2.csv:
///     header_row: 3
///     columns:
///       "Pay (KRW)": Salary
///       "Memo": null
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideSet {
    pub optional_columns: Vec<String>,
    pub files: BTreeMap<String, FileOverrides>,
}

impl OverrideSet {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening overrides file {path:?}"))?;
        let set: OverrideSet = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing overrides file {path:?}"))?;
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.optional_columns.is_empty() && self.files.is_empty()
    }

    /// Applies every decision to an analyzed project.
    pub fn apply(&self, project: &mut MergeProject) -> Result<(), EngineError> {
        for column in &self.optional_columns {
            project.mark_column_optional(column)?;
        }
        for (source_id, file) in &self.files {
            if let Some(reason) = &file.exclude {
                project.exclude_file(source_id, reason)?;
                continue;
            }
            if let Some(row) = file.header_row {
                let Some(row_index) = row.checked_sub(1) else {
                    return Err(EngineError::HeaderRowOutOfRange {
                        source_id: source_id.clone(),
                        row,
                        rows: project
                            .file(source_id)
                            .and_then(|f| f.matrix())
                            .map_or(0, |m| m.len()),
                    });
                };
                project.set_header_row(source_id, row_index)?;
            }
            if !file.columns.is_empty() {
                project.confirm_mapping(source_id, file.overrides())?;
            }
        }
        info!(
            "Applied overrides for {} file(s), {} optional column(s)",
            self.files.len(),
            self.optional_columns.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: EngineConfig =
            serde_yaml::from_str("strict: true\nmapper:\n  fuzzy_threshold: 0.9\n")
                .expect("parse config");
        assert!(config.strict);
        assert_eq!(config.search_window, DEFAULT_SEARCH_WINDOW);
        assert_eq!(config.mapper.fuzzy_threshold, 0.9);
        assert_eq!(config.detector, DetectorConfig::default());
    }

    #[test]
    fn output_date_format_defaults_to_iso_and_is_validated() {
        assert_eq!(EngineConfig::default().output.date_format, "%Y-%m-%d");
        let config: EngineConfig =
            serde_yaml::from_str("output:\n  date_format: \"%d/%m/%Y\"\n").expect("parse");
        assert!(config.output.validate().is_ok());

        let broken = OutputConfig {
            date_format: "%Q".to_string(),
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn null_column_override_ignores_header() {
        let set: OverrideSet = serde_yaml::from_str(
            "files:\n  a.csv:\n    columns:\n      Memo: ~\n      Pay: Salary\n",
        )
        .expect("parse overrides");
        let overrides = set.files["a.csv"].overrides();
        assert_eq!(overrides["Memo"], ManualOverride::Ignore);
        assert_eq!(
            overrides["Pay"],
            ManualOverride::Column("Salary".to_string())
        );
    }
}
