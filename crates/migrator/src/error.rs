//! Error types for the migrator
//!
//! Distinguishes the failures that merely skip a module (missing directories),
//! the ones that are logged and tolerated (bookkeeping upgrade) and the ones
//! that abort the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for migrator operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration directory not found: {}", .path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("Migration directory for module '{module}' not found (searched: {})", display_paths(.searched))]
    ModuleDirectoryNotFound {
        module: String,
        searched: Vec<PathBuf>,
    },

    #[error("Unable to read migration file {}: {source}", .path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bookkeeping upgrade failed: {0}")]
    BookkeepingUpgradeFailed(String),

    #[error("Failed to apply migration [{module}]<{file}>: {message}")]
    MigrationApplyFailed {
        module: String,
        file: String,
        message: String,
    },

    #[error("Connection error: {0}")]
    ConnectionFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provisioning error: {0}")]
    Provisioning(String),
}

impl MigrationError {
    /// Missing migration sources only skip the module; everything else is
    /// handled by the caller's own policy.
    pub fn is_missing_directory(&self) -> bool {
        matches!(
            self,
            MigrationError::DirectoryNotFound { .. } | MigrationError::ModuleDirectoryNotFound { .. }
        )
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(err.to_string())
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_directory_message_lists_searched_paths() {
        let err = MigrationError::ModuleDirectoryNotFound {
            module: "gis".to_string(),
            searched: vec![PathBuf::from("/a/migrations"), PathBuf::from("/b/migrations")],
        };
        assert_eq!(
            err.to_string(),
            "Migration directory for module 'gis' not found (searched: /a/migrations, /b/migrations)"
        );
        assert!(err.is_missing_directory());
    }

    #[test]
    fn test_apply_failure_is_not_a_missing_directory() {
        let err = MigrationError::MigrationApplyFailed {
            module: "core".to_string(),
            file: "00000004-x.sql".to_string(),
            message: "syntax error".to_string(),
        };
        assert!(!err.is_missing_directory());
        assert!(err.to_string().contains("[core]<00000004-x.sql>"));
    }
}
