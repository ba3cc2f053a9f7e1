//! Database Provisioning - connections to the target database
//!
//! Opens the single connection a migrator run uses, creating the target
//! database when it does not exist yet, and implements the destructive
//! replace pathway (terminate sessions, drop the database).

use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, Executor, PgConnection};

use crate::backends::quote_identifier;
use crate::config::ConnectionConfig;
use crate::error::{MigrationError, MigrationResult};

/// Database used for CREATE/DROP DATABASE and session termination
pub const MAINTENANCE_DATABASE: &str = "postgres";

/// Reported to PostgreSQL in `pg_stat_activity`
pub const APPLICATION_NAME: &str = "oac-database";

/// SQLSTATE for `invalid_catalog_name`
const DATABASE_DOES_NOT_EXIST: &str = "3D000";

const TERMINATE_SESSIONS_SQL: &str = "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
     WHERE datname = $1 AND leader_pid IS NULL AND pid <> pg_backend_pid()";

/// Connect options for the configured target database
pub fn connect_options(config: &ConnectionConfig) -> PgConnectOptions {
    database_options(config, &config.database).options([("search_path", config.schema.as_str())])
}

/// Connect options for the maintenance database
pub fn maintenance_options(config: &ConnectionConfig) -> PgConnectOptions {
    database_options(config, MAINTENANCE_DATABASE)
}

fn database_options(config: &ConnectionConfig, database: &str) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(database)
        .application_name(APPLICATION_NAME)
}

/// Whether a connection failure means the target database does not exist
pub fn is_missing_database(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(DATABASE_DOES_NOT_EXIST),
        _ => false,
    }
}

/// Connect to the target database, which must exist
pub async fn connect(config: &ConnectionConfig) -> MigrationResult<PgConnection> {
    PgConnection::connect_with(&connect_options(config))
        .await
        .map_err(|e| connection_failed(config, e))
}

/// Connect to the target database, creating it first if it does not exist
pub async fn connect_or_create(config: &ConnectionConfig) -> MigrationResult<PgConnection> {
    match PgConnection::connect_with(&connect_options(config)).await {
        Ok(conn) => Ok(conn),
        Err(e) if is_missing_database(&e) => {
            tracing::warn!("Database {} does not exist: start creating it...", config.database);
            create_database(config).await?;
            connect(config).await
        }
        Err(e) => Err(connection_failed(config, e)),
    }
}

/// Create the configured database from the maintenance database
pub async fn create_database(config: &ConnectionConfig) -> MigrationResult<()> {
    let mut admin = connect_maintenance(config).await?;
    let statement = format!("CREATE DATABASE {}", quote_identifier(&config.database));
    let result = admin.execute(statement.as_str()).await;
    close_quietly(admin).await;

    result.map_err(|e| {
        MigrationError::Provisioning(format!("Failed to create database {}: {}", config.database, e))
    })?;
    tracing::info!("Database {} created", config.database);
    Ok(())
}

/// Terminate every other session on the configured database and drop it.
/// The caller recreates it through [`connect_or_create`].
pub async fn replace_database(config: &ConnectionConfig) -> MigrationResult<()> {
    tracing::warn!("Replacing database {}: all its data will be lost", config.database);
    let mut admin = connect_maintenance(config).await?;
    let result = drop_database(&mut admin, &config.database).await;
    close_quietly(admin).await;
    result
}

async fn drop_database(admin: &mut PgConnection, database: &str) -> MigrationResult<()> {
    let terminated = sqlx::query(TERMINATE_SESSIONS_SQL)
        .bind(database)
        .execute(&mut *admin)
        .await
        .map_err(|e| {
            MigrationError::Provisioning(format!("Failed to terminate sessions on {}: {}", database, e))
        })?;
    tracing::debug!("Terminated {} session(s) on {}", terminated.rows_affected(), database);

    let statement = format!("DROP DATABASE IF EXISTS {}", quote_identifier(database));
    admin
        .execute(statement.as_str())
        .await
        .map_err(|e| MigrationError::Provisioning(format!("Failed to drop database {}: {}", database, e)))?;
    tracing::info!("Database {} dropped", database);
    Ok(())
}

async fn connect_maintenance(config: &ConnectionConfig) -> MigrationResult<PgConnection> {
    PgConnection::connect_with(&maintenance_options(config))
        .await
        .map_err(|e| {
            MigrationError::ConnectionFailed(format!(
                "Unable to connect to {}@{}:{}/{}: {}",
                config.user, config.host, config.port, MAINTENANCE_DATABASE, e
            ))
        })
}

async fn close_quietly(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!("Failed to close maintenance connection: {}", e);
    }
}

fn connection_failed(config: &ConnectionConfig, err: sqlx::Error) -> MigrationError {
    MigrationError::ConnectionFailed(format!(
        "Unable to connect to {}@{}:{}/{}: {}",
        config.user, config.host, config.port, config.database, err
    ))
}
