//! Logging setup
//!
//! Progress of a migrator run is reported through `tracing`; this module
//! installs the subscriber the binary writes to.

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the migrator
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Include the event target in text output
    pub include_target: bool,
    /// Environment filter (supports complex filters like "oac_migrator=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_target: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Create logging configuration for a given level
    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    /// Switch to JSON output
    pub fn json(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }

    /// Set environment filter
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// The filter directive used when `RUST_LOG` is not set. sqlx statement
    /// logging is kept at warn so migration bodies are not echoed.
    pub fn directive(&self) -> String {
        match &self.env_filter {
            Some(filter) => filter.clone(),
            None => format!("{},sqlx=warn", self.level),
        }
    }
}

/// Initialize logging for the application
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.directive()))?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stdout).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stdout)
                    .with_target(config.include_target),
            )
            .try_init()?;
    }

    tracing::debug!(
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );

    Ok(())
}
