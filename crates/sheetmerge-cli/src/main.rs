use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sheetmerge_engine::{
    MergeConfig, MergeRun, Reporter, classify_sources, is_external_template, rewrite,
};
use sheetmerge_io::{FsStore, LoadOptions, TableLoader};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sheetmerge",
    version,
    about = "Append sub-tables to a master workbook and carry its formulas down"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify, load and merge sub files into the master workbook.
    Merge(MergeArgs),
    /// Show which sheet group each file would go to.
    Classify(ClassifyArgs),
    /// Rewrite a template formula for another row.
    Rewrite(RewriteArgs),
    /// Print the effective configuration as YAML.
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
struct ConfigArgs {
    /// YAML configuration; the built-in reference layout when omitted.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct MergeArgs {
    /// Master workbook (.xlsx/.xlsm).
    #[arg(long, short = 'm')]
    master: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,

    /// Only merge these sheets. May be repeated or comma-separated.
    #[arg(long = "sheet", value_delimiter = ',')]
    sheets: Vec<String>,

    /// Encoding label for CSV files that are not UTF-8.
    #[arg(long, default_value = "gb18030")]
    encoding: String,

    /// Report per-batch progress.
    #[arg(long)]
    debug: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,

    /// Exit non-zero when any sheet aborts, any formula row fails, or the
    /// result had to be written to the fallback copy.
    #[arg(long)]
    strict: bool,

    /// Sub files, or directories whose files are all considered.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
struct ClassifyArgs {
    #[command(flatten)]
    config: ConfigArgs,

    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
struct RewriteArgs {
    formula: String,

    /// Row the formula was written for.
    #[arg(long, default_value_t = 2)]
    from: u32,

    /// Row to rewrite it for.
    #[arg(long)]
    to: u32,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(matches!(&cli.command, Command::Merge(args) if args.debug));
    match cli.command {
        Command::Merge(args) => merge(args),
        Command::Classify(args) => classify(args),
        Command::Rewrite(args) => {
            println!("{}", rewrite(&args.formula, args.from, args.to));
            if is_external_template(&args.formula) {
                eprintln!("note: formula reads another workbook");
            }
            Ok(())
        }
        Command::Config(args) => {
            let config = load_config(&args)?;
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

fn load_config(args: &ConfigArgs) -> Result<MergeConfig> {
    match &args.config {
        Some(path) => MergeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(MergeConfig::reference_deployment()),
    }
}

/// Files named directly plus the files directly inside named directories,
/// sorted and without Office lock files.
fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let entries = std::fs::read_dir(input)
                .with_context(|| format!("reading directory {}", input.display()))?;
            let mut found: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    files.retain(|p| !is_lock_file(p));
    Ok(files)
}

fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("~$"))
}

fn merge(args: MergeArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let Some(encoding) = encoding_rs::Encoding::for_label(args.encoding.as_bytes()) else {
        bail!("unknown encoding '{}'", args.encoding);
    };
    let loader = TableLoader::new(LoadOptions {
        legacy_encoding: encoding,
        ..LoadOptions::default()
    });

    let files = expand_inputs(&args.inputs)?;
    let classification = classify_sources(&files, &config);

    let mut run = MergeRun::new(config, Reporter::tracing(args.debug));
    if !args.sheets.is_empty() {
        run.select(&args.sheets);
    }
    if run.load_classified(&loader, &classification) == 0 {
        bail!("no input file could be loaded");
    }

    let summary = run
        .execute(&FsStore, &args.master)
        .with_context(|| format!("merging into {}", args.master.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render_table());
    }
    if args.strict && !summary.is_clean() {
        bail!("merge finished with problems");
    }
    Ok(())
}

fn classify(args: ClassifyArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let files = expand_inputs(&args.inputs)?;
    let classification = classify_sources(&files, &config);
    for (sheet, files) in &classification.groups {
        println!("{sheet} ({})", files.len());
        for file in files {
            println!("  {}", file.display());
        }
    }
    if !classification.unrecognized.is_empty() {
        println!("unrecognized ({})", classification.unrecognized.len());
        for file in &classification.unrecognized {
            println!("  {}", file.display());
        }
    }
    Ok(())
}
