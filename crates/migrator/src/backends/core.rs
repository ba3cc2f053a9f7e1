//! Core Migration Backend Trait
//!
//! This module defines the operations the migration runner needs from a
//! database connection. The runner owns the protocol (classification,
//! bookkeeping upgrades, transactional batches); a backend only knows how to
//! talk to its database.

use async_trait::async_trait;

use crate::error::{MigrationError, MigrationResult};
use crate::migrations::definitions::{MigrationFile, MigrationRecord};

/// The outstanding migrations of one module, applied as one transaction
#[derive(Debug, Clone)]
pub struct MigrationBatch<'a> {
    pub module: &'a str,
    /// Outstanding migrations, in application order
    pub migrations: &'a [MigrationFile],
    /// Write the `module` column of the bookkeeping rows
    pub with_module: bool,
    /// Rows registered after the migrations, in the same transaction
    pub backfill: Vec<MigrationRecord>,
}

impl<'a> MigrationBatch<'a> {
    pub fn new(module: &'a str, migrations: &'a [MigrationFile], with_module: bool) -> Self {
        Self {
            module,
            migrations,
            with_module,
            backfill: Vec::new(),
        }
    }

    pub fn with_backfill(mut self, records: Vec<MigrationRecord>) -> Self {
        self.backfill = records;
        self
    }

    /// Bookkeeping row for one of the batch's migrations
    pub fn record(&self, migration: &MigrationFile) -> MigrationRecord {
        MigrationRecord::new(migration, self.module)
    }

    /// Progress line emitted before a migration body runs
    pub fn announce(&self, migration: &MigrationFile) {
        tracing::info!("Installing script [{}]<{}>...", self.module, migration.name);
        tracing::debug!("Script source: {}", migration.path.display());
    }

    /// Attribute a failure inside the batch to the step that caused it
    pub fn failed(&self, step: &str, err: impl std::fmt::Display) -> MigrationError {
        MigrationError::MigrationApplyFailed {
            module: self.module.to_string(),
            file: step.to_string(),
            message: err.to_string(),
        }
    }
}

/// A single connection the migration protocol runs over
#[async_trait]
pub trait MigrationConnection: Send {
    /// Probe the installed OAC version; `None` when the probe fails
    async fn installed_version(&mut self) -> Option<String>;

    /// Whether the bookkeeping table exists in the target schema
    async fn bookkeeping_exists(&mut self) -> MigrationResult<bool>;

    /// Whether the bookkeeping table has the `module` discriminator column
    async fn module_column_exists(&mut self) -> MigrationResult<bool>;

    /// Add the `module` column, defaulting existing rows to core
    async fn add_module_column(&mut self) -> MigrationResult<()>;

    /// Names of the applied migrations, filtered by module when given
    async fn applied_migrations(&mut self, module: Option<&str>) -> MigrationResult<Vec<String>>;

    /// Apply a batch in one transaction. Each migration body runs verbatim,
    /// the bookkeeping table is created after the first one if still
    /// missing, then its row is recorded. Any failure rolls the whole batch
    /// back and is reported as `MigrationApplyFailed`.
    async fn apply_batch(&mut self, batch: &MigrationBatch<'_>) -> MigrationResult<()>;

    /// Close the connection
    async fn close(&mut self) -> MigrationResult<()>;
}

/// DDL for the bookkeeping table
pub const CREATE_BOOKKEEPING_SQL: &str = "CREATE TABLE IF NOT EXISTS migrations (\n    \
        md5sum VARCHAR(32) NOT NULL,\n    \
        file VARCHAR(255) NOT NULL,\n    \
        module VARCHAR(100) NOT NULL DEFAULT 'core'\n\
    )";

/// DDL adding the module discriminator to a pre-module bookkeeping table
pub const ADD_MODULE_COLUMN_SQL: &str =
    "ALTER TABLE migrations ADD COLUMN module VARCHAR(100) NOT NULL DEFAULT 'core'";

/// Quote a PostgreSQL identifier for the few statements (CREATE/DROP
/// DATABASE) that cannot take bind parameters.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("oac"), "\"oac\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_batch_failure_names_module_and_step() {
        let batch = MigrationBatch::new("gis", &[], true);
        let err = batch.failed("00000002-layers.sql", "syntax error");
        assert_eq!(
            err.to_string(),
            "Failed to apply migration [gis]<00000002-layers.sql>: syntax error"
        );
    }

    #[test]
    fn test_bookkeeping_ddl() {
        assert!(CREATE_BOOKKEEPING_SQL.starts_with("CREATE TABLE IF NOT EXISTS migrations"));
        assert!(CREATE_BOOKKEEPING_SQL.contains("module VARCHAR(100) NOT NULL DEFAULT 'core'"));
        assert!(ADD_MODULE_COLUMN_SQL.contains("DEFAULT 'core'"));
    }
}
