//! Mapping templates: named, reusable canonical schemas with aliases.
//!
//! The engine only needs `load_template` and `save_template`; how templates
//! are stored is up to the [`TemplateStore`] implementation. Two stores ship
//! with the crate: a YAML directory store and an in-memory store for tests and
//! embedding.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use heck::ToSnakeCase;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineError, TemplateError},
    mapping::{ColumnMapping, MatchTier, normalize_header},
    schema::{CanonicalColumn, CanonicalSchema},
};

/// The durable artifact handed to and from a template store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTemplate {
    pub name: String,
    pub canonical_columns: Vec<CanonicalColumn>,
}

impl MappingTemplate {
    pub fn new(name: impl Into<String>, schema: &CanonicalSchema) -> Self {
        Self {
            name: name.into(),
            canonical_columns: schema.columns().to_vec(),
        }
    }

    pub fn schema(&self) -> Result<CanonicalSchema, EngineError> {
        CanonicalSchema::new(self.canonical_columns.clone())
    }
}

pub trait TemplateStore: Send + Sync {
    fn load_template(&self, id: &str) -> Result<MappingTemplate, TemplateError>;
    /// Persists the template and returns the id it can be loaded back with.
    fn save_template(
        &mut self,
        name: &str,
        schema: &CanonicalSchema,
    ) -> Result<String, TemplateError>;
    fn list_templates(&self) -> Result<Vec<String>, TemplateError>;
}

/// Identifier derived from a template name: `"HR Payroll"` -> `hr_payroll`.
pub fn template_id(name: &str) -> Result<String, TemplateError> {
    let id = name.trim().to_snake_case();
    if id.is_empty() {
        // Names without ASCII letters (e.g. Hangul only) keep their text.
        let fallback: String = name
            .trim()
            .chars()
            .map(|ch| if ch.is_alphanumeric() { ch } else { '_' })
            .collect();
        if fallback.trim_matches('_').is_empty() {
            return Err(TemplateError::EmptyName);
        }
        return Ok(fallback);
    }
    Ok(id)
}

/// Builds a template from a schema plus confirmed file mappings: every source
/// header that reached a column and is not already its name or an alias is
/// added as an alias.
pub fn derive_template<'a, I>(name: &str, schema: &CanonicalSchema, mappings: I) -> MappingTemplate
where
    I: IntoIterator<Item = &'a ColumnMapping>,
{
    let mut derived = schema.clone();
    for mapping in mappings {
        for entry in mapping.entries() {
            if entry.tier == MatchTier::Unmapped {
                continue;
            }
            let Some(target) = entry.target.as_deref() else {
                continue;
            };
            let Some(column) = derived.column_mut(target) else {
                continue;
            };
            let header = normalize_header(&entry.source_header);
            let known = normalize_header(&column.name) == header
                || column.aliases.iter().any(|a| normalize_header(a) == header);
            if !known && column.add_alias(entry.source_header.trim()) {
                debug!(
                    "Template '{name}': learned alias '{}' for '{}'",
                    entry.source_header, column.name
                );
            }
        }
    }
    MappingTemplate::new(name, &derived)
}

#[derive(Debug, Clone)]
pub struct YamlTemplateStore {
    dir: PathBuf,
}

impl YamlTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.yaml"))
    }
}

impl TemplateStore for YamlTemplateStore {
    fn load_template(&self, id: &str) -> Result<MappingTemplate, TemplateError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(TemplateError::NotFound(id.to_string()));
        }
        let file = File::open(&path).map_err(|source| TemplateError::Io {
            id: id.to_string(),
            source,
        })?;
        let template: MappingTemplate = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|source| TemplateError::Yaml {
                id: id.to_string(),
                source,
            })?;
        template
            .schema()
            .map_err(|err| TemplateError::Invalid {
                id: id.to_string(),
                reason: err.to_string(),
            })?;
        debug!("Loaded template '{id}' from {path:?}");
        Ok(template)
    }

    fn save_template(
        &mut self,
        name: &str,
        schema: &CanonicalSchema,
    ) -> Result<String, TemplateError> {
        let id = template_id(name)?;
        fs::create_dir_all(&self.dir).map_err(|source| TemplateError::Io {
            id: id.clone(),
            source,
        })?;
        let template = MappingTemplate::new(name.trim(), schema);
        let path = self.path_for(&id);
        let file = File::create(&path).map_err(|source| TemplateError::Io {
            id: id.clone(),
            source,
        })?;
        serde_yaml::to_writer(file, &template).map_err(|source| TemplateError::Yaml {
            id: id.clone(),
            source,
        })?;
        info!("Saved template '{name}' as {path:?}");
        Ok(id)
    }

    fn list_templates(&self) -> Result<Vec<String>, TemplateError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| TemplateError::Io {
            id: self.dir.display().to_string(),
            source,
        })?;
        let mut ids = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateStore {
    templates: BTreeMap<String, MappingTemplate>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn load_template(&self, id: &str) -> Result<MappingTemplate, TemplateError> {
        self.templates
            .get(id)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    fn save_template(
        &mut self,
        name: &str,
        schema: &CanonicalSchema,
    ) -> Result<String, TemplateError> {
        let id = template_id(name)?;
        self.templates
            .insert(id.clone(), MappingTemplate::new(name.trim(), schema));
        Ok(id)
    }

    fn list_templates(&self) -> Result<Vec<String>, TemplateError> {
        Ok(self.templates.keys().cloned().collect())
    }
}
