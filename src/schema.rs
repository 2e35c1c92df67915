//! Canonical schema model and YAML persistence.
//!
//! A [`CanonicalSchema`] is the target column set every file of a merge
//! project is normalized into. Columns carry a declared [`ColumnType`], a set
//! of aliases used by the column mapper, and a `required` flag consulted
//! before execution.
//!
//! ```yaml
//! columns:
//!   - name: Name
//!     type: String
//!     aliases: [성명, 이름]
//!     required: true
//!   - name: Salary
//!     type: Number
//!     aliases: [연봉]
//! ```

use std::{collections::HashSet, fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::EngineError;

/// Declared type of a canonical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnType {
    String,
    Number,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["string", "number", "date"]
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "string" | "text" | "str" => Ok(ColumnType::String),
            "number" | "numeric" | "decimal" | "float" | "integer" | "int" | "currency" => {
                Ok(ColumnType::Number)
            }
            "date" => Ok(ColumnType::Date),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let token = match self {
            ColumnType::String => "String",
            ColumnType::Number => "Number",
            ColumnType::Date => "Date",
        };
        serializer.serialize_str(token)
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalColumn {
    pub name: String,
    #[serde(rename = "type", alias = "datatype")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

impl CanonicalColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            aliases: Vec::new(),
            required: false,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for alias in aliases {
            self.add_alias(alias);
        }
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Adds an alias unless an identical one is already present.
    pub fn add_alias(&mut self, alias: impl Into<String>) -> bool {
        let alias = alias.into();
        let trimmed = alias.trim();
        if trimmed.is_empty() || self.aliases.iter().any(|existing| existing == trimmed) {
            return false;
        }
        self.aliases.push(trimmed.to_string());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalSchema {
    columns: Vec<CanonicalColumn>,
}

impl<'de> Deserialize<'de> for CanonicalSchema {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawSchema {
            columns: Vec<CanonicalColumn>,
        }
        let raw = RawSchema::deserialize(deserializer)?;
        CanonicalSchema::new(raw.columns).map_err(|err| de::Error::custom(err.to_string()))
    }
}

impl CanonicalSchema {
    /// Builds a schema, rejecting empty and duplicate column names.
    pub fn new(columns: Vec<CanonicalColumn>) -> Result<Self, EngineError> {
        if columns.is_empty() {
            return Err(EngineError::MissingSchema(
                "schema defines no columns".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for column in &columns {
            let name = column.name.trim();
            if name.is_empty() {
                return Err(EngineError::MissingSchema(
                    "column names must not be empty".to_string(),
                ));
            }
            if !seen.insert(name.to_string()) {
                return Err(EngineError::MissingSchema(format!(
                    "duplicate column '{name}'"
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[CanonicalColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&CanonicalColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub(crate) fn column_mut(&mut self, name: &str) -> Option<&mut CanonicalColumn> {
        self.columns.iter_mut().find(|column| column.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &CanonicalColumn> {
        self.columns.iter().filter(|column| column.required)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema: CanonicalSchema =
            serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        Ok(schema)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing schema YAML")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing schema to YAML string")
    }
}
