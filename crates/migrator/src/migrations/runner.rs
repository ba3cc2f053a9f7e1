//! Migration Runner - Executes migrations against the database
//!
//! Drives one migrator run: classifies the target database, then for each
//! module (core first) upgrades the bookkeeping table, works out which files
//! are outstanding and applies them in a single transaction per module.
//! A failed batch is rolled back and ends the run; modules committed before
//! it stay committed.

use std::collections::HashSet;
use std::time::Instant;

use super::definitions::{
    DatabaseState, MigrationFile, MigrationRecord, MigrationRunResult, ModuleOutcome, ModuleReport,
    ModuleStatus, BOOTSTRAP_MIGRATIONS,
};
use super::modules::{ModuleCatalog, ModuleDefinition, ModuleLocator};
use super::resolver::MigrationResolver;
use crate::backends::{MigrationBatch, MigrationConnection};
use crate::config::{MigratorConfig, CORE_MODULE};
use crate::error::{MigrationError, MigrationResult};

/// A module as scheduled for this run
#[derive(Debug, Clone)]
enum PlannedModule {
    Run(ModuleDefinition),
    /// Known to the catalog but not requested
    NotRequested(String),
    /// Requested but not in the catalog
    Unknown(String),
}

/// Where a module stands before anything is written
enum Resolution {
    Skipped(ModuleOutcome),
    Outstanding {
        pending: Vec<MigrationFile>,
        bookkeeping_existed: bool,
    },
}

/// Migration runner that executes migrations against a database
pub struct MigrationRunner {
    connection: Box<dyn MigrationConnection>,
    catalog: ModuleCatalog,
    locator: ModuleLocator,
    resolver: MigrationResolver,
    config: MigratorConfig,
}

impl MigrationRunner {
    /// Create a new migration runner
    pub fn new(connection: Box<dyn MigrationConnection>, config: &MigratorConfig, catalog: ModuleCatalog) -> Self {
        Self {
            connection,
            catalog,
            locator: ModuleLocator::new(&config.migrations_root),
            resolver: MigrationResolver::new(),
            config: config.clone(),
        }
    }

    /// Apply all outstanding migrations. The connection is closed before
    /// returning, whatever the outcome.
    pub async fn run(mut self) -> MigrationResult<MigrationRunResult> {
        let result = self.run_modules().await;
        self.release().await;
        result
    }

    /// Report outstanding migrations per module without writing anything.
    /// The connection is closed before returning.
    pub async fn status(mut self) -> MigrationResult<Vec<ModuleStatus>> {
        let result = self.collect_status().await;
        self.release().await;
        result
    }

    async fn run_modules(&mut self) -> MigrationResult<MigrationRunResult> {
        let start_time = Instant::now();
        let state = self.classify().await?;

        let mut module_column = false;
        let mut reports = Vec::new();
        for planned in self.plan() {
            let module = match planned {
                PlannedModule::Run(module) => module,
                skipped => {
                    reports.push(report_not_found(skipped));
                    continue;
                }
            };

            if !module_column {
                module_column = self.upgrade_bookkeeping().await;
            }

            let outcome = self.migrate_module(&module, state, module_column).await?;
            reports.push(ModuleReport {
                module: module.key.clone(),
                outcome,
            });

            // First run on an empty database: the table only exists now
            if !module_column {
                module_column = self.upgrade_bookkeeping().await;
            }
        }

        if state == DatabaseState::Empty {
            tracing::info!("[<OK>] - Database installed!");
        } else {
            tracing::info!("[<OK>] - Database updated!");
        }

        Ok(MigrationRunResult {
            state,
            modules: reports,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    async fn collect_status(&mut self) -> MigrationResult<Vec<ModuleStatus>> {
        let state = self.classify().await?;
        let module_column = self.connection.bookkeeping_exists().await?
            && self.connection.module_column_exists().await?;

        let mut statuses = Vec::new();
        for planned in self.plan() {
            let module = match planned {
                PlannedModule::Run(module) => module,
                skipped => {
                    let report = report_not_found(skipped);
                    statuses.push(ModuleStatus {
                        module: report.module,
                        pending: Vec::new(),
                        skipped: Some(report.outcome),
                    });
                    continue;
                }
            };

            let status = match self.resolve_module(&module, state, module_column).await? {
                Resolution::Skipped(outcome) => ModuleStatus {
                    module: module.key.clone(),
                    pending: Vec::new(),
                    skipped: Some(outcome),
                },
                Resolution::Outstanding { pending, .. } => ModuleStatus {
                    module: module.key.clone(),
                    pending,
                    skipped: None,
                },
            };
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Classify the target database once, before any module runs
    async fn classify(&mut self) -> MigrationResult<DatabaseState> {
        let version = self.connection.installed_version().await;
        if let Some(version) = &version {
            tracing::info!("OAC Version: {}", version);
        }

        let bookkeeping = self.connection.bookkeeping_exists().await?;
        let state = DatabaseState::classify(version.is_some(), bookkeeping);
        match state {
            DatabaseState::Empty => tracing::warn!("Empty database: no OAC installation found"),
            DatabaseState::Legacy => {
                tracing::info!("OAC installation without bookkeeping table detected")
            }
            DatabaseState::Current => tracing::debug!("Bookkeeping table found"),
        }
        Ok(state)
    }

    /// Modules in processing order: the catalog's (core first), then the
    /// requested keys the catalog does not know.
    fn plan(&self) -> Vec<PlannedModule> {
        let mut plan: Vec<PlannedModule> = self
            .catalog
            .modules()
            .iter()
            .map(|module| {
                if module.is_core() || self.config.is_requested(&module.key) {
                    PlannedModule::Run(module.clone())
                } else {
                    PlannedModule::NotRequested(module.key.clone())
                }
            })
            .collect();

        for key in &self.config.modules {
            if key != CORE_MODULE && self.catalog.get(key).is_none() {
                plan.push(PlannedModule::Unknown(key.clone()));
            }
        }
        plan
    }

    /// Make sure the bookkeeping table carries the module column. Returns
    /// whether the column is confirmed; failures only disable it for now.
    async fn upgrade_bookkeeping(&mut self) -> bool {
        match self.try_upgrade_bookkeeping().await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                tracing::warn!("Bookkeeping upgrade unavailable: {}", e);
                false
            }
        }
    }

    async fn try_upgrade_bookkeeping(&mut self) -> MigrationResult<bool> {
        if !self.connection.bookkeeping_exists().await? {
            tracing::debug!("No bookkeeping table yet, module column check deferred");
            return Ok(false);
        }
        if self.connection.module_column_exists().await? {
            return Ok(true);
        }

        tracing::info!("Adding module column to the bookkeeping table...");
        self.connection.add_module_column().await.map_err(|e| match e {
            MigrationError::BookkeepingUpgradeFailed(_) => e,
            other => MigrationError::BookkeepingUpgradeFailed(other.to_string()),
        })?;
        Ok(true)
    }

    async fn migrate_module(
        &mut self,
        module: &ModuleDefinition,
        state: DatabaseState,
        module_column: bool,
    ) -> MigrationResult<ModuleOutcome> {
        let (pending, bookkeeping_existed) = match self.resolve_module(module, state, module_column).await? {
            Resolution::Skipped(outcome) => return Ok(outcome),
            Resolution::Outstanding {
                pending,
                bookkeeping_existed,
            } => (pending, bookkeeping_existed),
        };

        if pending.is_empty() {
            tracing::info!("[<OK>] - Database module [{}] already updated!", module.key);
            return Ok(ModuleOutcome::UpToDate);
        }

        tracing::info!("Migration's files to execute:");
        for migration in &pending {
            tracing::info!("  * [{}] - {}", migration.checksum, migration.name);
        }

        let with_module = module_column || !module.is_core();
        let backfill = state == DatabaseState::Legacy && !bookkeeping_existed;
        self.apply_batch(module, &pending, with_module, backfill).await?;

        tracing::info!("[<OK>] - Database module [{}]: DONE!", module.key);
        Ok(ModuleOutcome::Updated {
            applied: pending.into_iter().map(|m| m.name).collect(),
        })
    }

    /// Locate the module's directory and list what is not yet applied
    async fn resolve_module(
        &mut self,
        module: &ModuleDefinition,
        state: DatabaseState,
        module_column: bool,
    ) -> MigrationResult<Resolution> {
        let directory = match self.locator.locate(module) {
            Ok(directory) => directory,
            Err(e) if e.is_missing_directory() => {
                tracing::warn!("[~KO~] - Database module [{}] skipped: {}", module.key, e);
                return Ok(Resolution::Skipped(ModuleOutcome::DirectoryMissing { path: None }));
            }
            Err(e) => return Err(e),
        };

        let bookkeeping_existed = self.connection.bookkeeping_exists().await?;
        let applied = self
            .applied_set(module, state, bookkeeping_existed, module_column)
            .await?;
        tracing::debug!("Module [{}] has {} applied migration(s)", module.key, applied.len());

        match self.resolver.resolve(&directory, &applied) {
            Ok(pending) => Ok(Resolution::Outstanding {
                pending,
                bookkeeping_existed,
            }),
            Err(e) if e.is_missing_directory() => {
                tracing::warn!("[~KO~] - Database module [{}] skipped: {}", module.key, e);
                Ok(Resolution::Skipped(ModuleOutcome::DirectoryMissing {
                    path: Some(directory),
                }))
            }
            Err(e) => Err(e),
        }
    }

    /// Names already applied for a module
    async fn applied_set(
        &mut self,
        module: &ModuleDefinition,
        state: DatabaseState,
        bookkeeping_exists: bool,
        module_column: bool,
    ) -> MigrationResult<HashSet<String>> {
        if bookkeeping_exists {
            let names = if module_column {
                self.connection.applied_migrations(Some(&module.key)).await?
            } else if module.is_core() {
                // Rows written before the module column existed are core's
                self.connection.applied_migrations(None).await?
            } else {
                Vec::new()
            };
            return Ok(names.into_iter().collect());
        }

        if state == DatabaseState::Legacy && module.is_core() {
            return Ok(BOOTSTRAP_MIGRATIONS
                .iter()
                .map(|(name, _)| name.to_string())
                .collect());
        }
        Ok(HashSet::new())
    }

    /// Apply the outstanding migrations of one module in one transaction
    async fn apply_batch(
        &mut self,
        module: &ModuleDefinition,
        pending: &[MigrationFile],
        with_module: bool,
        backfill: bool,
    ) -> MigrationResult<()> {
        let mut batch = MigrationBatch::new(&module.key, pending, with_module);
        if backfill {
            batch = batch.with_backfill(MigrationRecord::bootstrap());
        }

        self.connection.apply_batch(&batch).await.map_err(|e| {
            tracing::error!("{}", e);
            e
        })
    }

    async fn release(&mut self) {
        if let Err(e) = self.connection.close().await {
            tracing::warn!("{}", e);
        }
    }
}

fn report_not_found(planned: PlannedModule) -> ModuleReport {
    let module = match planned {
        PlannedModule::NotRequested(key) => {
            tracing::warn!("[~KO~] - Database module {} NOT FOUND in the configured modules", key);
            key
        }
        PlannedModule::Unknown(key) => {
            tracing::warn!("[~KO~] - Database module {} NOT FOUND", key);
            key
        }
        PlannedModule::Run(module) => module.key,
    };
    ModuleReport {
        module,
        outcome: ModuleOutcome::NotFound,
    }
}
