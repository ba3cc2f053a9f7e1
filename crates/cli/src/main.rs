mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use oac_migrator::{init_logging, ConnectionConfig, LoggingConfig, MigratorConfig};

#[derive(Parser, Debug)]
#[command(name = "oac-database")]
#[command(version, about = "Install or update the OAC database schema")]
struct Cli {
    #[command(flatten)]
    database: DatabaseArgs,

    /// Directory holding the core `migrations/` folder and `modules.yaml`
    #[arg(long, env = "OAC_MIGRATIONS_ROOT", default_value = ".", global = true)]
    migrations_root: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "OAC_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Full filter directive, e.g. "oac_migrator=debug,sqlx=info" (overridden by RUST_LOG)
    #[arg(long, env = "OAC_LOG_FILTER", global = true)]
    log_filter: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct DatabaseArgs {
    /// Database host
    #[arg(long, env = "OAC_DB_HOST", default_value = "127.0.0.1", global = true)]
    db_host: String,

    /// Database port
    #[arg(long, env = "OAC_DB_PORT", default_value_t = 5432, global = true)]
    db_port: u16,

    /// Database name
    #[arg(long, env = "OAC_DB_NAME", default_value = "oac", global = true)]
    db_name: String,

    /// Schema holding the OAC tables
    #[arg(long, env = "OAC_DB_SCHEMA", default_value = "public", global = true)]
    db_schema: String,

    /// Database user
    #[arg(long, env = "OAC_DB_USER", default_value = "postgres", global = true)]
    db_user: String,

    #[arg(long, env = "OAC_DB_PASSWORD", default_value = "postgres", hide_env_values = true, global = true)]
    db_password: String,

    /// Comma-separated module keys; core is always installed
    #[arg(long, env = "OAC_DB_MODULES", default_value = "core", global = true)]
    db_modules: String,

    /// Drop and recreate the database before migrating
    #[arg(long, env = "OAC_DB_REPLACE", global = true)]
    db_replace: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Apply outstanding migrations (default)
    Migrate,

    /// List outstanding migrations without applying them
    Status,
}

impl Cli {
    fn migrator_config(&self) -> MigratorConfig {
        let db = &self.database;
        MigratorConfig {
            connection: ConnectionConfig {
                host: db.db_host.clone(),
                port: db.db_port,
                database: db.db_name.clone(),
                user: db.db_user.clone(),
                password: db.db_password.clone(),
                schema: db.db_schema.clone(),
            },
            replace: db.db_replace,
            migrations_root: self.migrations_root.clone(),
            ..MigratorConfig::default()
        }
        .with_module_list(&db.db_modules)
    }

    fn logging_config(&self) -> LoggingConfig {
        let config = LoggingConfig::default()
            .with_level(self.log_level.as_str())
            .json(self.log_json);
        match &self.log_filter {
            Some(filter) => config.with_env_filter(filter.as_str()),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.logging_config()).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let config = cli.migrator_config();
    match cli.command.unwrap_or(Commands::Migrate) {
        Commands::Migrate => commands::migrate::run(&config).await?,
        Commands::Status => commands::migrate::status(&config).await?,
    }

    Ok(())
}
