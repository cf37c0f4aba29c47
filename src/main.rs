use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colshard::{Dataset, IngestConfig, Router};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "colshard", version, about = "Sharded columnar store for subject-keyed records")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest the source files named by a TOML config.
    Ingest {
        config: PathBuf,
        /// Write logs to this file instead of stderr.
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// Save the run summary as JSON.
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Print a row range of one bucket column.
    Read {
        target: PathBuf,
        #[arg(long)]
        bucket: u32,
        #[arg(long)]
        field: String,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Print every stored row of one subject.
    Subject {
        target: PathBuf,
        #[arg(long)]
        id: u64,
        #[arg(long, default_value = "Enrolid")]
        subject_field: String,
        /// Comma-separated fields; all fields when omitted.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
    /// Print the bucket of each subject id.
    Route {
        #[arg(long)]
        buckets: u32,
        #[arg(required = true)]
        ids: Vec<u64>,
    },
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default.into());

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_file = match &cli.command {
        Commands::Ingest { log_file, .. } => log_file.as_deref(),
        _ => None,
    };
    init_tracing(cli.verbose, log_file)?;

    match cli.command {
        Commands::Ingest {
            config, summary, ..
        } => ingest(&config, summary.as_deref()),
        Commands::Read {
            target,
            bucket,
            field,
            start,
            count,
        } => {
            let dataset = open(&target)?;
            let values = dataset
                .read_column(bucket, &field, start, count)
                .with_context(|| format!("failed to read {field} from bucket {bucket}"))?;
            for v in values {
                println!("{v}");
            }
            Ok(())
        }
        Commands::Subject {
            target,
            id,
            subject_field,
            fields,
        } => {
            let dataset = open(&target)?;
            let rows = dataset
                .read_subject(id, &subject_field, &fields)
                .with_context(|| format!("failed to read subject {id}"))?;
            let header: Vec<&str> = rows.columns.iter().map(|(name, _)| name.as_str()).collect();
            println!("{}", header.join("\t"));
            for i in 0..rows.rows.len() {
                let line: Vec<String> = rows
                    .columns
                    .iter()
                    .map(|(_, values)| values[i].to_string())
                    .collect();
                println!("{}", line.join("\t"));
            }
            Ok(())
        }
        Commands::Route { buckets, ids } => {
            let router = Router::new(buckets)?;
            for id in ids {
                println!("{id}\t{:04}", router.route(id));
            }
            Ok(())
        }
    }
}

fn open(target: &Path) -> Result<Dataset> {
    Dataset::open(target).with_context(|| format!("failed to open dataset {}", target.display()))
}

#[cfg(feature = "source-csv")]
fn ingest(config_path: &Path, summary_path: Option<&Path>) -> Result<()> {
    use colshard::CsvSource;

    let config = IngestConfig::from_toml_file(config_path)
        .with_context(|| format!("invalid config {}", config_path.display()))?;
    let source = CsvSource {
        delimiter: config.csv.delimiter as u8,
        missing_markers: config.csv.missing_markers.clone(),
    };
    let summary = colshard::run_ingest(&config, &source).context("ingestion failed")?;
    summary.print();
    if let Some(path) = summary_path {
        summary
            .save_to_file(path)
            .with_context(|| format!("failed to save summary to {}", path.display()))?;
    }
    Ok(())
}

#[cfg(not(feature = "source-csv"))]
fn ingest(config_path: &Path, _summary_path: Option<&Path>) -> Result<()> {
    IngestConfig::from_toml_file(config_path)?;
    anyhow::bail!("this build has no source reader; enable the `source-csv` feature")
}
