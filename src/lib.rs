pub mod cell;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod header;
pub mod io_utils;
pub mod mapping;
pub mod merge;
pub mod merged;
pub mod normalize;
pub mod project;
pub mod schema;
pub mod table;
pub mod template;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, TemplateCommands},
    header::HeaderDetector,
    project::{FileStatus, MergeProject},
    schema::CanonicalSchema,
    template::{TemplateStore, YamlTemplateStore},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_merge", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Detect(args) => handle_detect(&args),
        Commands::Analyze(args) => handle_analyze(&args),
        Commands::Merge(args) => merge::execute(&args),
        Commands::Template { command } => match command {
            TemplateCommands::Save(args) => handle_template_save(&args),
            TemplateCommands::Show(args) => handle_template_show(&args),
        },
    }
}

fn handle_detect(args: &cli::DetectArgs) -> Result<()> {
    let config = merge::load_config(&args.read)?;
    let encoding = io_utils::resolve_encoding(args.read.input_encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.read.delimiter);
    info!(
        "Detecting header of '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(delimiter)
    );
    let matrix = io_utils::read_sheet(&args.input, delimiter, encoding)?;
    let window = args.search_window.unwrap_or(config.search_window);
    let result = HeaderDetector::new(config.detector).detect(&matrix, window);
    debug!("Detection result: {result:?}");

    println!(
        "header row: {} (confidence {:.2}{})",
        result.row_index + 1,
        result.confidence,
        if result.low_confidence { ", low" } else { "" }
    );
    let (above, _) = HeaderDetector::split(&matrix, &result);
    for (idx, row) in above.iter().enumerate() {
        let text = row
            .iter()
            .map(|cell| cell.as_display())
            .filter(|value| !value.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !text.is_empty() {
            println!("  row {}: {text}", idx + 1);
        }
    }
    let rows = result
        .header_names
        .iter()
        .enumerate()
        .map(|(idx, name)| vec![(idx + 1).to_string(), name.clone()])
        .collect::<Vec<_>>();
    table::print_table(&["#".to_string(), "header".to_string()], &rows);
    Ok(())
}

fn handle_analyze(args: &cli::AnalyzeArgs) -> Result<()> {
    let config = merge::load_config(&args.project.read)?;
    let project = merge::prepare_project(&args.project, config)?;

    let (headers, rows) = table::detection_report(&project);
    table::print_table(&headers, &rows);
    for file in project.files() {
        if file.mapping().is_none() {
            continue;
        }
        println!();
        println!("== {} ==", file.source_id());
        let (headers, rows) = table::mapping_report(file, project.schema());
        table::print_table(&headers, &rows);
    }

    let gaps = project.readiness();
    if gaps.is_empty() {
        println!();
        println!("ready to merge");
    } else {
        println!();
        for gap in &gaps {
            println!("gap: {gap}");
        }
    }
    for group in project.suggest_groups() {
        println!(
            "suggestion: '{}' could be one column for {}",
            group.proposed_name,
            group.members.join(", ")
        );
    }

    if let Some(path) = &args.report {
        project.diagnostics().save(path)?;
        info!("Diagnostics written to {path:?}");
    }
    Ok(())
}

fn handle_template_save(args: &cli::TemplateSaveArgs) -> Result<()> {
    let schema = CanonicalSchema::load(&args.schema)?;
    let mut store = YamlTemplateStore::new(&args.templates_dir);
    if args.inputs.is_empty() {
        let id = store.save_template(&args.name, &schema)?;
        println!("{id}");
        return Ok(());
    }

    let config = merge::load_config(&args.read)?;
    let mut project = MergeProject::new(schema, config);
    merge::attach_inputs(&mut project, &args.inputs, &args.read)?;
    project.analyze().context("Analyzing inputs")?;
    merge::apply_overrides(&mut project, args.overrides.as_deref())?;
    let pending = project
        .files()
        .iter()
        .filter(|file| file.status() == FileStatus::Analyzed && !file.is_confirmed())
        .map(|file| (file.source_id().to_string(), file.overrides().clone()))
        .collect::<Vec<_>>();
    for (source_id, overrides) in pending {
        project
            .confirm_mapping(&source_id, overrides)
            .with_context(|| format!("Confirming mapping for '{source_id}'"))?;
    }
    let id = project.save_template(&mut store, &args.name)?;
    info!(
        "Template '{}' saved to {:?}",
        args.name,
        store.dir().join(format!("{id}.yaml"))
    );
    println!("{id}");
    Ok(())
}

fn handle_template_show(args: &cli::TemplateShowArgs) -> Result<()> {
    let store = YamlTemplateStore::new(&args.templates_dir);
    match &args.id {
        Some(id) => {
            let template = store.load_template(id)?;
            let yaml = serde_yaml::to_string(&template)
                .with_context(|| format!("Serializing template '{id}'"))?;
            print!("{yaml}");
        }
        None => {
            for id in store.list_templates()? {
                println!("{id}");
            }
        }
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
