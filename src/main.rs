//! Tagsieve CLI
//!
//! Command-line interface for the tagsieve series index:
//! - Import log lines into the index
//! - Search series by label selector and time range
//! - Print the default configuration

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Mutex;
use tagsieve::config::{generate_default_config, Config};
use tagsieve::engine::{IndexEngine, SearchOutcome};
use tagsieve::ingest::{now_millis, TimeRange};
use tagsieve::query::{parse_selector, parse_time};
use tagsieve::storage::Tenant;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "tagsieve")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Label-indexed series search over date-bucketed postings")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Tenant as account or account:project
    #[arg(short, long, default_value = "0:0", global = true)]
    pub tenant: Tenant,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import lines of `metric{k="v",...} "line" [timestamp]`
    Import {
        /// File to import ("-" for stdin)
        path: PathBuf,
        /// Timestamp for lines without one, in Unix ms (default: now)
        #[arg(long)]
        timestamp: Option<u64>,
    },

    /// Search series by selector
    Search {
        /// Selector like `http_requests{job=~"api|web"}`
        selector: String,
        /// Range start: now-1h, RFC 3339, or Unix ms
        #[arg(long, default_value = "now-1d")]
        start: String,
        /// Range end: now, RFC 3339, or Unix ms
        #[arg(long, default_value = "now")]
        end: String,
        /// Print at most this many series
        #[arg(short, long)]
        limit: Option<usize>,
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let config = generate_default_config();
        match output {
            Some(path) => {
                // Create parent directory if needed
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &config)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", config),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => Config::load_default(),
    };
    init_tracing(&config)?;

    tracing::info!("Tagsieve v{}", env!("CARGO_PKG_VERSION"));
    let engine = IndexEngine::open(&config).context("opening index")?;

    match cli.command {
        Commands::Import { path, timestamp } => {
            let input = if path.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {:?}", path))?
            };
            let summary = engine
                .import(cli.tenant, &input, timestamp.unwrap_or_else(now_millis))
                .await?;
            println!(
                "Imported {} rows ({} invalid lines skipped)",
                summary.rows_indexed, summary.invalid_lines
            );
        }

        Commands::Search {
            selector,
            start,
            end,
            limit,
            format,
        } => {
            let selector = parse_selector(&selector)?;
            let now = now_millis();
            let (start, end) = (parse_time(&start, now)?, parse_time(&end, now)?);
            let Some(range) = TimeRange::try_new(start, end) else {
                bail!("range start {} is after end {}", start, end);
            };

            let mut outcome = engine
                .search(cli.tenant, &selector.matchers, range, true)
                .await?;
            if let Some(limit) = limit {
                outcome.ids.truncate(limit);
                if let Some(series) = outcome.series.as_mut() {
                    series.truncate(limit);
                }
            }

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                OutputFormat::Table => print_table(&outcome),
            }
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

/// Initialize logging; RUST_LOG takes precedence over the configured level
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("tagsieve={}", config.logging.level)))
        .context("invalid log level")?;

    let writer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init(),
    }
    Ok(())
}

fn print_table(outcome: &SearchOutcome) {
    println!("{:<20} {}", "ID", "Labels");
    match &outcome.series {
        Some(series) => {
            for entry in series {
                let labels: Vec<String> = entry.labels.iter().map(|l| l.to_string()).collect();
                println!("{:<20} {{{}}}", entry.id, labels.join(", "));
            }
        }
        None => {
            for id in &outcome.ids {
                println!("{:<20}", id);
            }
        }
    }
    if outcome.truncated {
        println!("(result truncated at the configured max_series)");
    }
    println!("{} series", outcome.ids.len());
}
