//! PostgreSQL Backend Implementation
//!
//! Implements [`MigrationConnection`] over a single sqlx `PgConnection`. The
//! target schema is put on the connection's `search_path` when connecting
//! (see `database::connect_options`), so statements here use unqualified
//! table names and metadata lookups bind the schema as a parameter.

use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection, Postgres, Transaction};

use super::core::*;
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::definitions::{MigrationRecord, MIGRATIONS_TABLE};

/// Shown when the version function exists but returns NULL
const UNKNOWN_VERSION: &str = "unknown";

/// PostgreSQL connection used for a migrator run
pub struct PostgresConnection {
    conn: Option<PgConnection>,
    schema: String,
}

impl PostgresConnection {
    pub fn new(conn: PgConnection, schema: impl Into<String>) -> Self {
        Self {
            conn: Some(conn),
            schema: schema.into(),
        }
    }

    fn conn(&mut self) -> MigrationResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| MigrationError::ConnectionFailed("Connection already closed".to_string()))
    }
}

#[async_trait]
impl MigrationConnection for PostgresConnection {
    async fn installed_version(&mut self) -> Option<String> {
        let conn = self.conn().ok()?;
        match sqlx::query_scalar::<_, Option<String>>("SELECT oac_getversion()::text AS version")
            .fetch_one(conn)
            .await
        {
            Ok(version) => Some(reported_version(version)),
            Err(e) => {
                tracing::debug!("Version probe failed: {}", e);
                None
            }
        }
    }

    async fn bookkeeping_exists(&mut self) -> MigrationResult<bool> {
        let schema = self.schema.clone();
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (\
                SELECT 1 FROM information_schema.tables \
                WHERE table_schema = $1 AND table_name = $2\
            )",
        )
        .bind(schema)
        .bind(MIGRATIONS_TABLE)
        .fetch_one(self.conn()?)
        .await?;
        Ok(exists)
    }

    async fn module_column_exists(&mut self) -> MigrationResult<bool> {
        let schema = self.schema.clone();
        let column = sqlx::query_scalar::<_, String>(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 AND column_name = 'module'",
        )
        .bind(schema)
        .bind(MIGRATIONS_TABLE)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(column.is_some())
    }

    async fn add_module_column(&mut self) -> MigrationResult<()> {
        self.conn()?
            .execute(ADD_MODULE_COLUMN_SQL)
            .await
            .map_err(|e| MigrationError::BookkeepingUpgradeFailed(e.to_string()))?;
        Ok(())
    }

    async fn applied_migrations(&mut self, module: Option<&str>) -> MigrationResult<Vec<String>> {
        let conn = self.conn()?;
        let files = match module {
            Some(module) => {
                sqlx::query_scalar::<_, String>("SELECT file FROM migrations WHERE module = $1")
                    .bind(module)
                    .fetch_all(conn)
                    .await?
            }
            None => {
                sqlx::query_scalar::<_, String>("SELECT file FROM migrations")
                    .fetch_all(conn)
                    .await?
            }
        };
        Ok(files)
    }

    async fn apply_batch(&mut self, batch: &MigrationBatch<'_>) -> MigrationResult<()> {
        let mut tx = self.conn()?.begin().await.map_err(|e| batch.failed("BEGIN", e))?;

        match apply_in_transaction(&mut tx, batch).await {
            Ok(()) => tx.commit().await.map_err(|e| batch.failed("COMMIT", e)),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!("Rollback of module [{}] failed: {}", batch.module, rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> MigrationResult<()> {
        match self.conn.take() {
            Some(conn) => conn
                .close()
                .await
                .map_err(|e| MigrationError::ConnectionFailed(format!("Failed to close connection: {}", e))),
            None => Ok(()),
        }
    }
}

/// The probe succeeding is what marks an installation; a NULL version still
/// counts as installed.
fn reported_version(version: Option<String>) -> String {
    version.unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

async fn apply_in_transaction(tx: &mut Transaction<'_, Postgres>, batch: &MigrationBatch<'_>) -> MigrationResult<()> {
    let mut bookkeeping_ready = false;
    for migration in batch.migrations {
        batch.announce(migration);
        // A plain &str runs over the simple query protocol, which accepts
        // multi-statement bodies and dollar-quoted function definitions.
        (&mut **tx)
            .execute(migration.content.as_str())
            .await
            .map_err(|e| batch.failed(&migration.name, e))?;

        // Migrations may create the bookkeeping table themselves
        if !bookkeeping_ready {
            (&mut **tx)
                .execute(CREATE_BOOKKEEPING_SQL)
                .await
                .map_err(|e| batch.failed(&migration.name, e))?;
            bookkeeping_ready = true;
        }

        insert_record(tx, &batch.record(migration), batch.with_module)
            .await
            .map_err(|e| batch.failed(&migration.name, e))?;
    }

    if !batch.backfill.is_empty() {
        tracing::info!("Registering the bootstrap migrations of the existing installation");
    }
    for record in &batch.backfill {
        insert_record(tx, record, batch.with_module)
            .await
            .map_err(|e| batch.failed(&record.name, e))?;
    }
    Ok(())
}

async fn insert_record(
    tx: &mut Transaction<'_, Postgres>,
    record: &MigrationRecord,
    with_module: bool,
) -> Result<(), sqlx::Error> {
    if with_module {
        sqlx::query("INSERT INTO migrations (md5sum, file, module) VALUES ($1, $2, $3)")
            .bind(&record.checksum)
            .bind(&record.name)
            .bind(&record.module)
            .execute(&mut **tx)
            .await?;
    } else {
        sqlx::query("INSERT INTO migrations (md5sum, file) VALUES ($1, $2)")
            .bind(&record.checksum)
            .bind(&record.name)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}
