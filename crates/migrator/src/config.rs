//! Migrator configuration
//!
//! Built once at startup (by the CLI) and passed by reference into the
//! connection provider and the runner.

use std::fmt;
use std::path::PathBuf;

/// Key of the module that is always installed
pub const CORE_MODULE: &str = "core";

/// Connection parameters for the target database
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Schema placed on the connection's `search_path`
    pub schema: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            database: "oac".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            schema: "public".to_string(),
        }
    }
}

// Keeps the password out of logs and panics.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"****")
            .field("schema", &self.schema)
            .finish()
    }
}

/// Complete configuration for one migrator run
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    pub connection: ConnectionConfig,
    /// Requested module keys, `core` first
    pub modules: Vec<String>,
    /// Drop and recreate the database before migrating
    pub replace: bool,
    /// Directory holding `migrations/` for core and the module manifest
    pub migrations_root: PathBuf,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            modules: vec![CORE_MODULE.to_string()],
            replace: false,
            migrations_root: PathBuf::from("."),
        }
    }
}

impl MigratorConfig {
    /// Set the requested modules from a comma separated list
    pub fn with_module_list(mut self, list: &str) -> Self {
        self.modules = parse_module_list(list);
        self
    }

    /// Whether the module key was requested for this run
    pub fn is_requested(&self, key: &str) -> bool {
        self.modules.iter().any(|m| m == key)
    }

    /// Log the run parameters, password excluded
    pub fn log_summary(&self) {
        tracing::info!("Start installing/upgrading OAC database with the following parameters:");
        tracing::info!("  - HOST:     {}", self.connection.host);
        tracing::info!("  - PORT:     {}", self.connection.port);
        tracing::info!("  - DATABASE: {}", self.connection.database);
        tracing::info!("  - SCHEMA:   {}", self.connection.schema);
        tracing::info!("  - USER:     {}", self.connection.user);
        tracing::info!("  - MODULES:  [{}]", self.modules.join(","));
        tracing::info!("  - REPLACE:  {}", self.replace);
    }
}

/// Split a comma separated module list, trimming entries and dropping
/// blanks and duplicates. `core` always comes first, the order modules are
/// processed in.
pub fn parse_module_list(list: &str) -> Vec<String> {
    let mut modules = vec![CORE_MODULE.to_string()];
    for key in list.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !modules.iter().any(|m| m == key) {
            modules.push(key.to_string());
        }
    }
    modules
}
