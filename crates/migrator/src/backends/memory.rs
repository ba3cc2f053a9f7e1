//! In-memory backend for exercising the migration protocol in tests
//!
//! Models just enough of PostgreSQL: an optional version function, the
//! bookkeeping table (with or without the module column), the scripts that
//! ran, and batches whose snapshot is restored when they fail.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

use super::core::{MigrationBatch, MigrationConnection};
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::definitions::MigrationRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub checksum: String,
    pub name: String,
    /// `None` when the table had no module column at insert time
    pub module: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BookkeepingTable {
    pub has_module_column: bool,
    pub rows: Vec<StoredRow>,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    bookkeeping: Option<BookkeepingTable>,
    executed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    pub version: Option<String>,
    pub bookkeeping: Option<BookkeepingTable>,
    /// Migration bodies that ran and are currently visible
    pub executed: Vec<String>,
    /// Scripts containing this marker fail
    pub fail_marker: Option<String>,
    pub fail_add_column: bool,
    pub add_column_attempts: usize,
    pub close_calls: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

impl MemoryDatabase {
    pub fn empty() -> Self {
        Self::default()
    }

    /// An installation predating bookkeeping
    pub fn legacy(version: &str) -> Self {
        Self {
            version: Some(version.to_string()),
            ..Self::default()
        }
    }

    /// An installation with bookkeeping rows already present
    pub fn current(has_module_column: bool, rows: &[(&str, &str)]) -> Self {
        let rows = rows
            .iter()
            .map(|(module, name)| StoredRow {
                checksum: "0".repeat(32),
                name: name.to_string(),
                module: has_module_column.then(|| module.to_string()),
            })
            .collect();
        Self {
            version: Some("1.0.0".to_string()),
            bookkeeping: Some(BookkeepingTable {
                has_module_column,
                rows,
            }),
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    /// Names recorded for a module; rows without a module count as core
    pub fn recorded(&self, module: &str) -> Vec<String> {
        self.bookkeeping
            .as_ref()
            .map(|table| {
                table
                    .rows
                    .iter()
                    .filter(|row| row.module.as_deref().unwrap_or("core") == module)
                    .map(|row| row.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            bookkeeping: self.bookkeeping.clone(),
            executed: self.executed.clone(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.bookkeeping = snapshot.bookkeeping;
        self.executed = snapshot.executed;
    }

    fn execute_script(&mut self, sql: &str) -> MigrationResult<()> {
        if let Some(marker) = &self.fail_marker {
            if sql.contains(marker.as_str()) {
                return Err(MigrationError::Database(format!("syntax error at or near \"{}\"", marker)));
            }
        }
        if sql.contains("CREATE TABLE migrations") && self.bookkeeping.is_none() {
            self.bookkeeping = Some(BookkeepingTable {
                has_module_column: sql.contains("module"),
                rows: Vec::new(),
            });
        }
        self.executed.push(sql.to_string());
        Ok(())
    }

    fn ensure_bookkeeping(&mut self) {
        self.bookkeeping.get_or_insert_with(|| BookkeepingTable {
            has_module_column: true,
            rows: Vec::new(),
        });
    }

    fn record(&mut self, record: &MigrationRecord, with_module: bool) -> MigrationResult<()> {
        let table = self.bookkeeping.as_mut().ok_or_else(table_missing)?;
        if with_module && !table.has_module_column {
            return Err(MigrationError::Database(
                "column \"module\" of relation \"migrations\" does not exist".to_string(),
            ));
        }
        let module = if with_module {
            Some(record.module.clone())
        } else if table.has_module_column {
            Some("core".to_string())
        } else {
            None
        };
        table.rows.push(StoredRow {
            checksum: record.checksum.clone(),
            name: record.name.clone(),
            module,
        });
        Ok(())
    }

    fn apply_in_transaction(&mut self, batch: &MigrationBatch<'_>) -> MigrationResult<()> {
        let mut bookkeeping_ready = false;
        for migration in batch.migrations {
            batch.announce(migration);
            self.execute_script(&migration.content)
                .map_err(|e| batch.failed(&migration.name, e))?;
            if !bookkeeping_ready {
                self.ensure_bookkeeping();
                bookkeeping_ready = true;
            }
            self.record(&batch.record(migration), batch.with_module)
                .map_err(|e| batch.failed(&migration.name, e))?;
        }
        for record in &batch.backfill {
            self.record(record, batch.with_module)
                .map_err(|e| batch.failed(&record.name, e))?;
        }
        Ok(())
    }
}

/// Connection handle sharing a [`MemoryDatabase`] with the test
#[derive(Clone)]
pub struct MemoryConnection {
    db: Arc<Mutex<MemoryDatabase>>,
}

impl MemoryConnection {
    pub fn new(db: MemoryDatabase) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn db(&self) -> MutexGuard<'_, MemoryDatabase> {
        self.db.lock().unwrap()
    }
}

fn table_missing() -> MigrationError {
    MigrationError::Database("relation \"migrations\" does not exist".to_string())
}

#[async_trait]
impl MigrationConnection for MemoryConnection {
    async fn installed_version(&mut self) -> Option<String> {
        self.db().version.clone()
    }

    async fn bookkeeping_exists(&mut self) -> MigrationResult<bool> {
        Ok(self.db().bookkeeping.is_some())
    }

    async fn module_column_exists(&mut self) -> MigrationResult<bool> {
        Ok(self
            .db()
            .bookkeeping
            .as_ref()
            .map_or(false, |table| table.has_module_column))
    }

    async fn add_module_column(&mut self) -> MigrationResult<()> {
        let mut db = self.db();
        db.add_column_attempts += 1;
        if db.fail_add_column {
            return Err(MigrationError::BookkeepingUpgradeFailed(
                "permission denied for table migrations".to_string(),
            ));
        }
        let table = db.bookkeeping.as_mut().ok_or_else(table_missing)?;
        if table.has_module_column {
            return Err(MigrationError::BookkeepingUpgradeFailed(
                "column \"module\" of relation \"migrations\" already exists".to_string(),
            ));
        }
        table.has_module_column = true;
        for row in &mut table.rows {
            row.module.get_or_insert_with(|| "core".to_string());
        }
        Ok(())
    }

    async fn applied_migrations(&mut self, module: Option<&str>) -> MigrationResult<Vec<String>> {
        let db = self.db();
        let table = db.bookkeeping.as_ref().ok_or_else(table_missing)?;
        Ok(table
            .rows
            .iter()
            .filter(|row| match module {
                Some(module) => row.module.as_deref() == Some(module),
                None => true,
            })
            .map(|row| row.name.clone())
            .collect())
    }

    async fn apply_batch(&mut self, batch: &MigrationBatch<'_>) -> MigrationResult<()> {
        let mut db = self.db();
        let snapshot = db.snapshot();
        match db.apply_in_transaction(batch) {
            Ok(()) => {
                db.commits += 1;
                Ok(())
            }
            Err(e) => {
                db.restore(snapshot);
                db.rollbacks += 1;
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> MigrationResult<()> {
        self.db().close_calls += 1;
        Ok(())
    }
}
