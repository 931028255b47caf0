//! fieldshift CLI - run field-mapping routines against tabular data
//!
//! ```bash
//! fieldshift serve data.csv                         # HTTP API (port 3000)
//! fieldshift run data.csv -m "Height (in) → Height (cm)" -c to_cm.rhai -o out.csv
//! fieldshift mappings list                          # Catalog
//! fieldshift mappings schema "Sex code → Sex label" # JSON Schema of the targets
//! fieldshift check data.csv                         # Which mappings apply
//! fieldshift audit out.csv -m "Height (in) → Height (cm)"
//! ```
//!
//! Environment (also read from `.env`): `FIELDSHIFT_BACKEND`,
//! `FIELDSHIFT_MAX_ROW_FAILURES`, `FIELDSHIFT_CATALOG`, `FIELDSHIFT_PORT`,
//! `RUST_LOG`.

use clap::{Parser, Subcommand, ValueEnum};
use fieldshift::api::logs::init_tracing;
use fieldshift::catalog::MappingCatalog;
use fieldshift::config::EngineConfig;
use fieldshift::export::{export, ExportFormat};
use fieldshift::models::ConsoleLevel;
use fieldshift::parser::{load_file, LoadedDataset};
use fieldshift::sandbox::Backend;
use fieldshift::session::{RunOutcome, Session};
use fieldshift::transform::{assess, summarize};
use fieldshift::validation::{audit_dataset, mapping_schema, Side};
use std::fs;
use std::path::{Path, PathBuf};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "fieldshift")]
#[command(about = "Run user-authored field mappings against tabular data", long_about = None)]
struct Cli {
    /// Catalog file replacing the built-in catalog
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server over a dataset file
    Serve {
        /// Dataset file (.csv or .json)
        data: PathBuf,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Default backend: native or embedded
        #[arg(short, long)]
        backend: Option<Backend>,

        /// Failed rows tolerated before a run stops
        #[arg(long)]
        max_row_failures: Option<usize>,
    },

    /// Run one transformation and write the result
    Run {
        /// Dataset file (.csv or .json)
        data: PathBuf,

        /// Mapping key
        #[arg(short, long)]
        mapping: String,

        /// File holding the routine's code
        #[arg(short, long)]
        code: PathBuf,

        /// native or embedded
        #[arg(short, long)]
        backend: Option<Backend>,

        /// Output file; the extension picks the format (default: JSON to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        max_row_failures: Option<usize>,
    },

    /// Inspect the mapping catalog
    Mappings {
        #[command(subcommand)]
        action: MappingsAction,
    },

    /// Report which mappings apply to a dataset
    Check {
        data: PathBuf,

        /// Only this mapping
        #[arg(short, long)]
        mapping: Option<String>,
    },

    /// Check a dataset against a mapping's concept schemas (advisory)
    Audit {
        data: PathBuf,

        #[arg(short, long)]
        mapping: String,

        #[arg(long, value_enum, default_value = "target")]
        side: SideArg,
    },
}

#[derive(Subcommand)]
enum MappingsAction {
    /// List mapping keys
    List,

    /// Show one mapping
    Show { key: String },

    /// Print the JSON Schema of one side of a mapping
    Schema {
        key: String,

        #[arg(long, value_enum, default_value = "target")]
        side: SideArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Source,
    Target,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Source => Side::Source,
            SideArg::Target => Side::Target,
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult {
    let config = load_config(cli.catalog)?;

    match cli.command {
        Commands::Serve {
            data,
            port,
            backend,
            max_row_failures,
        } => {
            let config = override_config(config, backend, max_row_failures);
            cmd_serve(&data, port, config).await
        }

        Commands::Run {
            data,
            mapping,
            code,
            backend,
            output,
            max_row_failures,
        } => {
            let config = override_config(config, backend, max_row_failures);
            cmd_run(&data, &mapping, &code, output.as_deref(), config).await
        }

        Commands::Mappings { action } => cmd_mappings(action, &config),

        Commands::Check { data, mapping } => cmd_check(&data, mapping.as_deref(), &config),

        Commands::Audit {
            data,
            mapping,
            side,
        } => cmd_audit(&data, &mapping, side.into(), &config),
    }
}

fn load_config(catalog: Option<PathBuf>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::from_env()?;
    if catalog.is_some() {
        config.catalog_path = catalog;
    }
    Ok(config)
}

fn override_config(
    mut config: EngineConfig,
    backend: Option<Backend>,
    max_row_failures: Option<usize>,
) -> EngineConfig {
    if let Some(backend) = backend {
        config.backend = backend;
    }
    if let Some(max) = max_row_failures {
        config.max_row_failures = max;
    }
    config
}

fn load_dataset(path: &Path) -> Result<LoadedDataset, Box<dyn std::error::Error>> {
    eprintln!("Loading: {}", path.display());
    let loaded = load_file(path)?;
    if let Some(encoding) = &loaded.encoding {
        eprintln!("   Encoding: {}", encoding);
    }
    if let Some(delimiter) = loaded.delimiter {
        eprintln!("   Delimiter: '{}'", format_delimiter(delimiter));
    }
    eprintln!("   Rows: {}", loaded.rows.len());
    Ok(loaded)
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

async fn cmd_serve(data: &Path, port: Option<u16>, config: EngineConfig) -> CliResult {
    let loaded = load_dataset(data)?;
    let catalog = config.load_catalog()?;
    let port = port.unwrap_or(config.port);

    let session = Session::new(catalog, loaded.rows, &config)?;
    eprintln!(
        "Serving on http://localhost:{} (default backend: {})",
        port, config.backend
    );
    fieldshift::api::start_server(session, port).await
}

async fn cmd_run(
    data: &Path,
    mapping: &str,
    code_path: &Path,
    output: Option<&Path>,
    config: EngineConfig,
) -> CliResult {
    let loaded = load_dataset(data)?;
    let code = fs::read_to_string(code_path)?;
    let catalog = config.load_catalog()?;
    let session = Session::new(catalog, loaded.rows, &config)?;

    if config.backend == Backend::Embedded {
        session.executor().bootstrap_embedded().await?;
    }

    let selection = session.select_mapping(mapping)?;
    if let Some(notice) = &selection.notice {
        eprintln!("   {}", notice);
    }

    let outcome = match session.run_transform(&code).await? {
        RunOutcome::Completed(outcome) => outcome,
        RunOutcome::NotApplicable { notice } => return Err(notice.into()),
    };

    for line in &outcome.console_lines {
        let tag = match line.level {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
        };
        eprintln!("   [{}] {}", tag, line.text);
    }
    for line in summarize(&outcome) {
        eprintln!("{}", line);
    }

    match output {
        Some(path) => {
            let format = output_format(path)?;
            fs::write(path, export(&outcome.data, format)?)?;
            eprintln!("Saved to: {}", path.display());
        }
        None => println!("{}", export(&outcome.data, ExportFormat::Json)?),
    }
    Ok(())
}

fn output_format(path: &Path) -> Result<ExportFormat, Box<dyn std::error::Error>> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
    Ok(extension.parse()?)
}

fn cmd_mappings(action: MappingsAction, config: &EngineConfig) -> CliResult {
    let catalog = config.load_catalog()?;

    match action {
        MappingsAction::List => {
            eprintln!("{} mappings", catalog.len());
            for mapping in catalog.iter() {
                println!("{}  ({})", mapping.key, mapping.cardinality());
            }
        }
        MappingsAction::Show { key } => {
            let mapping = catalog.get_mapping(&key)?;
            println!("{}", serde_json::to_string_pretty(mapping)?);
        }
        MappingsAction::Schema { key, side } => {
            let mapping = catalog.get_mapping(&key)?;
            let schema = mapping_schema(mapping, side.into());
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }
    Ok(())
}

fn cmd_check(data: &Path, only: Option<&str>, config: &EngineConfig) -> CliResult {
    let loaded = load_dataset(data)?;
    let catalog = config.load_catalog()?;

    let mappings: Vec<_> = match only {
        Some(key) => vec![catalog.get_mapping(key)?],
        None => catalog.iter().collect(),
    };

    for mapping in mappings {
        let applicability = assess(mapping, &loaded.rows);
        let mark = if applicability.applicable { "yes" } else { "no " };
        println!("{}  {}  {}", mark, mapping.key, applicability.reason());
    }
    Ok(())
}

fn cmd_audit(data: &Path, key: &str, side: Side, config: &EngineConfig) -> CliResult {
    let loaded = load_dataset(data)?;
    let catalog: MappingCatalog = config.load_catalog()?;
    let mapping = catalog.get_mapping(key)?;

    let report = audit_dataset(mapping, side, &loaded.rows);
    eprintln!(
        "Audit of '{}': {} valid, {} invalid of {}",
        report.mapping, report.valid, report.invalid, report.checked
    );
    for issue in report.issues.iter().take(5) {
        eprintln!("\n   Row {}:", issue.row_index);
        for err in issue.errors.iter().take(3) {
            eprintln!("     - {}", err);
        }
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
