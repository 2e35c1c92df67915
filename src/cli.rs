use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Merge spreadsheet exports with differing layouts into one canonical table",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect the header row of a single sheet
    Detect(DetectArgs),
    /// Detect headers and infer column mappings without merging
    Analyze(AnalyzeArgs),
    /// Merge sheets into one canonical CSV
    Merge(MergeArgs),
    /// Save or inspect mapping templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum TemplateCommands {
    /// Save a schema as a template, learning aliases from analyzed inputs
    Save(TemplateSaveArgs),
    /// List templates, or print one as YAML
    Show(TemplateShowArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ReadArgs {
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Engine configuration YAML (detector, mapper and normalizer settings)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ProjectArgs {
    /// Input sheets to merge (repeatable)
    #[arg(short, long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// Canonical schema YAML
    #[arg(short, long, conflicts_with = "template", required_unless_present = "template")]
    pub schema: Option<PathBuf>,
    /// Template id to take the canonical schema from
    #[arg(short, long)]
    pub template: Option<String>,
    /// Directory holding template YAML files
    #[arg(long = "templates-dir", default_value = "templates")]
    pub templates_dir: PathBuf,
    /// Manual decisions YAML: header rows, column overrides, exclusions
    #[arg(long)]
    pub overrides: Option<PathBuf>,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Input sheet to inspect
    #[arg(short, long)]
    pub input: PathBuf,
    /// Number of leading rows considered as header candidates
    #[arg(long = "search-window")]
    pub search_window: Option<usize>,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
    /// Write the diagnostics record as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
    /// Output CSV file (stdout when omitted or '-')
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Abort the merge when any file cannot be merged
    #[arg(long)]
    pub strict: bool,
    /// Exclude files with unmapped required columns instead of refusing to merge
    #[arg(long = "exclude-incomplete")]
    pub exclude_incomplete: bool,
    /// Write the diagnostics record as JSON
    #[arg(long)]
    pub diagnostics: Option<PathBuf>,
    /// strftime pattern for dates in the output (default ISO, %Y-%m-%d)
    #[arg(long = "date-format")]
    pub date_format: Option<String>,
}

#[derive(Debug, Args)]
pub struct TemplateSaveArgs {
    /// Template name; the id is derived from it
    #[arg(short, long)]
    pub name: String,
    /// Canonical schema YAML the template starts from
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Sheets whose confirmed mappings contribute aliases
    #[arg(short, long = "input")]
    pub inputs: Vec<PathBuf>,
    /// Manual decisions YAML applied before aliases are learned
    #[arg(long)]
    pub overrides: Option<PathBuf>,
    /// Directory holding template YAML files
    #[arg(long = "templates-dir", default_value = "templates")]
    pub templates_dir: PathBuf,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct TemplateShowArgs {
    /// Template id to print; lists all templates when omitted
    pub id: Option<String>,
    /// Directory holding template YAML files
    #[arg(long = "templates-dir", default_value = "templates")]
    pub templates_dir: PathBuf,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
