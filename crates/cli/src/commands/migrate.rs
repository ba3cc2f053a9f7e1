use anyhow::Context;
use oac_migrator::{
    connect, connect_or_create, replace_database, MigrationRunner, MigratorConfig, ModuleCatalog, ModuleOutcome,
    PostgresConnection,
};

/// Install or update the configured database
pub async fn run(config: &MigratorConfig) -> anyhow::Result<()> {
    config.log_summary();
    let catalog = ModuleCatalog::load(&config.migrations_root)?;

    if config.replace {
        replace_database(&config.connection)
            .await
            .context("Failed to replace the database")?;
    }

    let conn = connect_or_create(&config.connection).await?;
    let connection = PostgresConnection::new(conn, config.connection.schema.as_str());
    let result = MigrationRunner::new(Box::new(connection), config, catalog)
        .run()
        .await?;

    tracing::info!(
        "Applied {} migration(s) in {}ms",
        result.applied_count(),
        result.execution_time_ms
    );
    Ok(())
}

/// Report outstanding migrations per module without applying them
pub async fn status(config: &MigratorConfig) -> anyhow::Result<()> {
    config.log_summary();
    let catalog = ModuleCatalog::load(&config.migrations_root)?;

    let conn = connect(&config.connection).await?;
    let connection = PostgresConnection::new(conn, config.connection.schema.as_str());
    let statuses = MigrationRunner::new(Box::new(connection), config, catalog)
        .status()
        .await?;

    let mut outstanding = 0;
    for status in &statuses {
        match &status.skipped {
            Some(ModuleOutcome::NotFound) => {
                tracing::warn!("[~KO~] - Database module {}: not installed by this run", status.module)
            }
            Some(ModuleOutcome::DirectoryMissing { .. }) => {
                tracing::warn!("[~KO~] - Database module {}: no migration directory", status.module)
            }
            Some(_) => {}
            None if status.pending.is_empty() => {
                tracing::info!("[<OK>] - Database module [{}] already updated!", status.module)
            }
            None => {
                tracing::info!(
                    "Database module [{}]: {} outstanding migration(s)",
                    status.module,
                    status.pending.len()
                );
                for migration in &status.pending {
                    tracing::info!("  * [{}] - {}", migration.checksum, migration.name);
                }
                outstanding += status.pending.len();
            }
        }
    }

    tracing::info!("{} outstanding migration(s) in total", outstanding);
    Ok(())
}
