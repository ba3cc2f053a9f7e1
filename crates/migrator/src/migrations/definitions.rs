//! Migration Definitions - Core types for the migration protocol
//!
//! Defines migration files, bookkeeping records, the database classification
//! and the per-module run report.

use std::path::PathBuf;

use crate::config::CORE_MODULE;

/// Name of the bookkeeping table
pub const MIGRATIONS_TABLE: &str = "migrations";

/// Core migrations that installations predating the bookkeeping table already
/// carry in their schema, with the checksums they were shipped with.
pub const BOOTSTRAP_MIGRATIONS: [(&str, &str); 3] = [
    ("00000001-init-schema.sql", "bcda17ef90d9921595fedba9a50cf23e"),
    ("00000002-init-functions.sql", "b5263de524c9c955135bb231c708c4e0"),
    ("00000003-init-triggers.sql", "6cfb957017ba87a1ffafa8fd20497843"),
];

/// A single SQL migration file waiting to be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File name, e.g. `00000004-add-layers.sql`
    pub name: String,
    /// SQL executed verbatim
    pub content: String,
    /// Hex MD5 of the file bytes
    pub checksum: String,
    /// Where the file was loaded from
    pub path: PathBuf,
}

/// A row of the bookkeeping table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub checksum: String,
    pub name: String,
    pub module: String,
}

impl MigrationRecord {
    pub fn new(file: &MigrationFile, module: &str) -> Self {
        Self {
            checksum: file.checksum.clone(),
            name: file.name.clone(),
            module: module.to_string(),
        }
    }

    /// Records backfilled for a legacy core installation
    pub fn bootstrap() -> Vec<MigrationRecord> {
        BOOTSTRAP_MIGRATIONS
            .iter()
            .map(|(name, checksum)| MigrationRecord {
                checksum: checksum.to_string(),
                name: name.to_string(),
                module: CORE_MODULE.to_string(),
            })
            .collect()
    }
}

/// What was found in the target database before any module ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseState {
    /// No OAC installation
    Empty,
    /// OAC schema installed, but no bookkeeping table
    Legacy,
    /// Bookkeeping table present
    Current,
}

impl DatabaseState {
    /// Bookkeeping table presence wins over the version probe; a version
    /// function alone means an installation older than bookkeeping.
    pub fn classify(version_available: bool, bookkeeping_exists: bool) -> Self {
        match (version_available, bookkeeping_exists) {
            (_, true) => DatabaseState::Current,
            (true, false) => DatabaseState::Legacy,
            (false, false) => DatabaseState::Empty,
        }
    }
}

/// Outcome for one module of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// Outstanding migrations were applied, in order
    Updated { applied: Vec<String> },
    /// Nothing was outstanding
    UpToDate,
    /// Not requested for this run, or unknown to the catalog
    NotFound,
    /// The module's migration directory does not exist
    DirectoryMissing { path: Option<PathBuf> },
}

/// Per-module entry of a run result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    pub module: String,
    pub outcome: ModuleOutcome,
}

/// Result of running migrations
#[derive(Debug)]
pub struct MigrationRunResult {
    /// Classification made before the first module ran
    pub state: DatabaseState,
    /// One entry per module, in processing order
    pub modules: Vec<ModuleReport>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    /// Whether this run installed a fresh database (vs updating one)
    pub fn installed(&self) -> bool {
        self.state == DatabaseState::Empty
    }

    /// Number of migrations applied over all modules
    pub fn applied_count(&self) -> usize {
        self.modules
            .iter()
            .map(|report| match &report.outcome {
                ModuleOutcome::Updated { applied } => applied.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, module: &str) -> Option<&ModuleOutcome> {
        self.modules
            .iter()
            .find(|report| report.module == module)
            .map(|report| &report.outcome)
    }
}

/// Outstanding migrations of one module, as reported by a dry run
#[derive(Debug, Clone)]
pub struct ModuleStatus {
    pub module: String,
    /// Outstanding migrations, in application order
    pub pending: Vec<MigrationFile>,
    /// Set when the module could not be inspected
    pub skipped: Option<ModuleOutcome>,
}
