use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lol_star_etl::config::{EtlConfig, FileConfig, TeamKey};
use lol_star_etl::dimensions::TimeFrame;
use lol_star_etl::loader::{self, LoadOptions};
use lol_star_etl::warehouse::Warehouse;
use lol_star_etl::{flat, schema};

#[derive(Parser, Debug)]
#[command(
    name = "lol-star-etl",
    about = "Load the ranked-games dataset into a star schema",
    version
)]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalOptions {
    /// JSON config file (keys: source_path, connection_uri, batch_size, ...)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Source CSV file
    #[arg(long = "source", global = true)]
    source: Option<PathBuf>,

    /// Store connection URI (e.g., sqlite://lol_experiment.db)
    #[arg(long = "db", global = true)]
    db: Option<String>,

    /// Rows per committed batch
    #[arg(long = "batch-size", global = true)]
    batch_size: Option<usize>,

    /// How team rows are keyed
    #[arg(long = "team-key", value_enum, global = true)]
    team_key: Option<TeamKey>,

    /// Source column linked as the fact's objective
    #[arg(long = "objective-column", global = true)]
    objective_column: Option<String>,

    /// Source column linked as the fact's structure
    #[arg(long = "structure-column", global = true)]
    structure_column: Option<String>,

    /// Log dimension-level detail
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and the star schema if missing
    Schema,
    /// Load the source file row by row into the star schema
    Load,
    /// Append column projections of the source file to flat tables
    LoadFlat,
    /// Show the time dimension values derived from a frame
    Phase {
        /// Frame in seconds since game start
        frame: i64,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.options.verbose);

    if let Err(err) = run(cli) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(options: GlobalOptions) -> Result<EtlConfig> {
    let overrides = FileConfig {
        source_path: options.source,
        connection_uri: options.db,
        batch_size: options.batch_size,
        team_key: options.team_key,
        objective_column: options.objective_column,
        structure_column: options.structure_column,
    };

    EtlConfig::resolve(options.config.as_deref(), overrides).context("loading configuration")
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Phase { frame } = cli.command {
        let tf = TimeFrame::from_frame(frame);
        println!(
            "frame={} minute={} second={} phase={}",
            tf.frame, tf.minute, tf.second, tf.phase
        );
        return Ok(());
    }

    let config = resolve_config(cli.options)?;
    let mut warehouse = Warehouse::open(&config.connection_uri)
        .with_context(|| format!("opening store {}", config.connection_uri))?;

    match cli.command {
        Command::Schema => {
            warehouse.init_schema().context("creating star schema")?;
            for table in schema::existing_tables(warehouse.connection())? {
                println!("{}", table);
            }
        }
        Command::Load => {
            let source = config.require_source()?;
            let options = LoadOptions::from_config(&config)?;

            warehouse.init_schema().context("creating star schema")?;
            let report = loader::load_source(&mut warehouse, source, &options)
                .with_context(|| format!("loading {}", source.display()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::LoadFlat => {
            let source = config.require_source()?;
            let reports = flat::load_flat(&mut warehouse, source)
                .with_context(|| format!("flat load of {}", source.display()))?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Phase { .. } => {}
    }

    Ok(())
}
