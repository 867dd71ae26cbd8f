//! hudicat CLI - browse and manage Hudi tables in a Hive Metastore.

use anyhow::Result;
use clap::{Parser, Subcommand};
use hudicat_core::config::LogFormat;
use hudicat_core::{Config, ErrorKind, HudiCatalog};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Schema, table or partition does not exist
    NotFound = 2,
    /// Create collided with an existing entity
    AlreadyExists = 3,
    /// Hudi metadata could not be interpreted
    InvalidMetadata = 4,
    /// Column type has no mapping
    UnsupportedType = 5,
    /// Metastore unreachable, pool exhausted or circuit open
    Unavailable = 6,
    /// Permission denied by the Metastore
    Unauthorized = 7,
    /// Bad name, filter or non-empty schema
    InvalidArgument = 8,
    /// Health check failure
    HealthCheckError = 9,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code by its catalog error kind.
    fn from_error(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<hudicat_core::Error>() {
            Some(e) => Self::from_kind(e.kind()),
            None if error.downcast_ref::<toml::de::Error>().is_some() => ExitCode::ConfigError,
            None => ExitCode::RuntimeError,
        }
    }

    fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => ExitCode::NotFound,
            ErrorKind::AlreadyExists => ExitCode::AlreadyExists,
            ErrorKind::InvalidMetadata => ExitCode::InvalidMetadata,
            ErrorKind::UnsupportedType => ExitCode::UnsupportedType,
            ErrorKind::TransientUnavailable => ExitCode::Unavailable,
            ErrorKind::Unauthorized => ExitCode::Unauthorized,
            ErrorKind::InvalidArgument | ErrorKind::NotEmpty => ExitCode::InvalidArgument,
            ErrorKind::Config => ExitCode::ConfigError,
            ErrorKind::Io => ExitCode::RuntimeError,
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "hudicat")]
#[command(about = "Hudi catalog over the Hive Metastore", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "HUDICAT_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List schemas
    Schemas,

    /// Show one schema
    Schema { name: String },

    /// Create a schema
    CreateSchema {
        name: String,

        #[arg(long)]
        comment: Option<String>,

        /// Storage location; defaults to the warehouse path
        #[arg(long)]
        location: Option<String>,
    },

    /// Drop a schema
    DropSchema {
        name: String,

        /// Drop contained tables too
        #[arg(long)]
        cascade: bool,
    },

    /// List tables of a schema
    Tables { schema: String },

    /// Resolve and describe a table
    Describe { schema: String, table: String },

    /// Drop a table's Metastore registration
    DropTable { schema: String, table: String },

    /// List partitions of a table
    Partitions {
        schema: String,
        table: String,

        /// Partition filter, e.g. `dt=2024-01-01`, `hour>=6` or
        /// `region in (us,eu)`; repeat to combine
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Print names only
        #[arg(long)]
        names_only: bool,
    },

    /// Check the Metastore connection
    Health,

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config when it parses
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring)
        .unwrap_or_default();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(monitoring.log_level.as_str()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Logs go to stderr so command output stays parseable.
    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {:#}", e);
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<ExitCode> {
    let json = cli.json;

    if let Commands::Validate = cli.command {
        let config = load_config(&cli.config)?;
        println!("Configuration is valid");
        println!("  Catalog:   {}", config.catalog.name);
        println!(
            "  Metastore: {} ({:?}, pool size {})",
            config.metastore.uri.as_deref().unwrap_or("-"),
            config.metastore.backend,
            config.metastore.pool_size
        );
        println!("  Cache:     {}", if config.cache.enabled { "enabled" } else { "disabled" });
        return Ok(ExitCode::Success);
    }

    let config = load_config(&cli.config)?;
    let catalog = HudiCatalog::new(&config)?;

    match cli.command {
        Commands::Schemas => commands::schema::list(&catalog, json).await?,
        Commands::Schema { name } => commands::schema::show(&catalog, &name, json).await?,
        Commands::CreateSchema {
            name,
            comment,
            location,
        } => commands::schema::create(&catalog, &name, comment, location, json).await?,
        Commands::DropSchema { name, cascade } => {
            commands::schema::drop(&catalog, &name, cascade).await?
        }
        Commands::Tables { schema } => commands::table::list(&catalog, &schema, json).await?,
        Commands::Describe { schema, table } => {
            commands::table::describe(&catalog, &schema, &table, json).await?
        }
        Commands::DropTable { schema, table } => {
            commands::table::drop(&catalog, &schema, &table).await?
        }
        Commands::Partitions {
            schema,
            table,
            filters,
            names_only,
        } => {
            commands::partition::list(&catalog, &schema, &table, &filters, names_only, json)
                .await?
        }
        Commands::Health => {
            if !commands::health::run(&catalog, json).await? {
                return Ok(ExitCode::HealthCheckError);
            }
        }
        Commands::Validate => {}
    }

    Ok(ExitCode::Success)
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path
        .clone()
        .unwrap_or_else(|| PathBuf::from("conf/hudicat.toml"));
    Ok(Config::from_file(&path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_error_kind() {
        let err = anyhow::Error::from(hudicat_core::Error::not_found(
            hudicat_core::Entity::Table,
            "sales.orders",
        ));
        assert_eq!(ExitCode::from_error(&err), ExitCode::NotFound);

        let err = anyhow::Error::from(hudicat_core::Error::NotEmpty("sales".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::InvalidArgument);

        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_error(&err), ExitCode::RuntimeError);
    }

    #[test]
    fn test_cli_parses_repeated_filters() {
        let cli = Cli::parse_from([
            "hudicat", "--json", "partitions", "sales", "orders", "-f", "dt=2024-01-01", "-f",
            "hour>=6",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Partitions { filters, .. } => assert_eq!(filters.len(), 2),
            _ => panic!("expected partitions command"),
        }
    }
}
