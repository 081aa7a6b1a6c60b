use std::{path::PathBuf, process::exit};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use dbaccess::{
    config::{context::build_pool, load_config, DbAccessConfig},
    ingest::probe_columns,
    schema::{Ident, TableRef},
};

const DEFAULT_LOG_FILTER: &str = "dbaccess=info";

#[derive(Debug, Parser)]
#[clap(name = "dbaccess", about = "Metadata-driven data access for PostgreSQL")]
struct Args {
    #[clap(short, long = "config", default_value = "dbaccess.toml")]
    config_path: PathBuf,

    #[clap(long, help = "Emit logs as JSON lines")]
    json_logs: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to the configured database and print its version
    Check,
    /// Print the live columns of a table, as bulk ingest sees them
    Columns { schema: String, table: String },
}

fn prepare_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let result = if json_logs {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish(),
        )
    };

    if let Err(e) = result {
        eprintln!("Error setting up logging: {e}");
    }
    // Route records from crates logging through `log` (sqlx) into tracing
    let _ = LogTracer::init();
}

async fn check(config: &DbAccessConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = build_pool(&config.database).await?;
    let (version,): (String,) = sqlx::query_as("SELECT version()")
        .fetch_one(&pool)
        .await?;

    info!("Connection OK");
    println!("{version}");
    Ok(())
}

async fn columns(
    config: &DbAccessConfig,
    schema: &str,
    table: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let table = TableRef {
        schema: Ident::new(schema)?,
        table: Ident::new(table)?,
    };
    let pool = build_pool(&config.database).await?;
    let live = probe_columns(&pool, &table).await?;

    if live.is_empty() {
        return Err(format!("Table {table} not found or has no columns").into());
    }

    for column in live {
        println!(
            "{}\t{}\t{}",
            column.column_name,
            column.udt_name,
            if column.nullable() { "NULL" } else { "NOT NULL" }
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    prepare_tracing(args.json_logs);

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading config from {:?}: {e}", args.config_path);
            eprintln!("Error loading the config: {e}");
            exit(1);
        }
    };

    let result = match args.command {
        Command::Check => check(&config).await,
        Command::Columns { schema, table } => columns(&config, &schema, &table).await,
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("Error: {e}");
        exit(1);
    }
}
