use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    cli::{MergeArgs, ProjectArgs, ReadArgs},
    config::{EngineConfig, OverrideSet},
    io_utils,
    project::MergeProject,
    schema::CanonicalSchema,
    table,
    template::YamlTemplateStore,
};

pub(crate) fn load_config(read: &ReadArgs) -> Result<EngineConfig> {
    match &read.config {
        Some(path) => {
            EngineConfig::load(path).with_context(|| format!("Loading engine config {path:?}"))
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Attaches every input to `project`. A sheet that cannot be read is kept as
/// an unreadable file so it is reported rather than silently dropped.
pub(crate) fn attach_inputs(
    project: &mut MergeProject,
    inputs: &[PathBuf],
    read: &ReadArgs,
) -> Result<()> {
    let encoding = io_utils::resolve_encoding(read.input_encoding.as_deref())?;
    for input in inputs {
        let source_id = io_utils::source_id_for(input);
        let delimiter = io_utils::resolve_input_delimiter(input, read.delimiter);
        match io_utils::read_sheet(input, delimiter, encoding) {
            Ok(matrix) => project
                .attach_file(source_id, matrix)
                .with_context(|| format!("Attaching {input:?}"))?,
            Err(err) => project
                .attach_unreadable(source_id, format!("{err:#}"))
                .with_context(|| format!("Attaching {input:?}"))?,
        }
    }
    Ok(())
}

pub(crate) fn apply_overrides(project: &mut MergeProject, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let overrides = OverrideSet::load(path)?;
    overrides
        .apply(project)
        .with_context(|| format!("Applying overrides from {path:?}"))
}

/// Loads the schema, reads and analyzes every input, then applies manual
/// decisions. The returned project is `Mapped`.
pub(crate) fn prepare_project(args: &ProjectArgs, config: EngineConfig) -> Result<MergeProject> {
    let mut project = match (&args.schema, &args.template) {
        (Some(path), _) => MergeProject::new(CanonicalSchema::load(path)?, config),
        (None, Some(id)) => {
            let store = YamlTemplateStore::new(&args.templates_dir);
            MergeProject::from_template(&store, id, config)
                .with_context(|| format!("Loading template '{id}'"))?
        }
        (None, None) => anyhow::bail!("Either --schema or --template must be provided"),
    };
    info!(
        "Project {} with {} canonical column(s)",
        project.id(),
        project.schema().len()
    );
    attach_inputs(&mut project, &args.inputs, &args.read)?;
    project.analyze().context("Analyzing inputs")?;
    apply_overrides(&mut project, args.overrides.as_deref())?;
    Ok(project)
}

pub fn execute(args: &MergeArgs) -> Result<()> {
    let mut config = load_config(&args.project.read)?;
    if args.strict {
        config.strict = true;
    }
    if let Some(format) = &args.date_format {
        config.output.date_format = format.clone();
        config.output.validate()?;
    }
    let mut project = prepare_project(&args.project, config)?;

    if args.exclude_incomplete {
        for source_id in project.exclude_incomplete_files()? {
            warn!("Excluded '{source_id}': required columns unmapped");
        }
    }

    let outcome = project.execute().cloned();
    if let Some(path) = &args.diagnostics {
        project.diagnostics().save(path)?;
        info!("Diagnostics written to {path:?}");
    }
    let merged = outcome.context("Merging sheets")?;

    let delimiter = args
        .output
        .as_deref()
        .map_or(io_utils::DEFAULT_CSV_DELIMITER, |path| {
            io_utils::resolve_input_delimiter(path, None)
        });
    let mut writer = io_utils::open_csv_writer(args.output.as_deref(), delimiter)?;
    merged.write_csv(&mut writer, &project.config().output.date_format)?;

    let (headers, rows) = table::summary_report(project.diagnostics());
    for line in table::render_table(&headers, &rows).lines() {
        info!("{line}");
    }
    info!(
        "Wrote {} merged row(s) (fingerprint {})",
        merged.len(),
        &merged.fingerprint()[..12]
    );
    Ok(())
}
