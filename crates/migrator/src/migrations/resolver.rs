//! Migration Resolver - Finds the outstanding migrations of a directory
//!
//! Loads every `.sql` file not yet recorded in bookkeeping, together with its
//! content and checksum, ordered by file name.

use md5::{Digest, Md5};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::definitions::MigrationFile;
use crate::error::{MigrationError, MigrationResult};

/// Extension of migration files; everything else in the directory is ignored
pub const MIGRATION_EXTENSION: &str = "sql";

/// Resolves outstanding migrations from the filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct MigrationResolver;

impl MigrationResolver {
    pub fn new() -> Self {
        Self
    }

    /// Return the migrations of `directory` whose name is not in `applied`,
    /// sorted by name.
    pub fn resolve(&self, directory: &Path, applied: &HashSet<String>) -> MigrationResult<Vec<MigrationFile>> {
        if !directory.is_dir() {
            return Err(MigrationError::DirectoryNotFound {
                path: directory.to_path_buf(),
            });
        }

        let entries = fs::read_dir(directory).map_err(|source| MigrationError::UnreadableFile {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut migrations = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::UnreadableFile {
                path: directory.to_path_buf(),
                source,
            })?;

            let path = entry.path();
            if path.is_dir() || !path.extension().map_or(false, |ext| ext == MIGRATION_EXTENSION) {
                continue;
            }

            let name = match path.file_name().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => {
                    tracing::warn!("Ignoring migration file with non UTF-8 name: {}", path.display());
                    continue;
                }
            };
            if applied.contains(&name) {
                continue;
            }

            migrations.push(load_migration(&path, name)?);
        }

        // Directory enumeration order is platform dependent
        migrations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(migrations)
    }
}

fn load_migration(path: &Path, name: String) -> MigrationResult<MigrationFile> {
    let content = fs::read_to_string(path).map_err(|source| MigrationError::UnreadableFile {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(MigrationFile {
        name,
        checksum: checksum(content.as_bytes()),
        content,
        path: path.to_path_buf(),
    })
}

/// Lowercase hex MD5 of `bytes`, the format of the `md5sum` column
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    fn applied(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_checksum_is_md5_hex() {
        assert_eq!(checksum(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(checksum(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_resolve_sorts_by_name_and_skips_applied() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "00000003-init-triggers.sql", "CREATE TRIGGER t;");
        write(&temp_dir, "00000001-init-schema.sql", "CREATE TABLE a();");
        write(&temp_dir, "00000002-init-functions.sql", "CREATE FUNCTION f();");

        let resolver = MigrationResolver::new();
        let pending = resolver
            .resolve(temp_dir.path(), &applied(&["00000002-init-functions.sql"]))
            .unwrap();

        let names: Vec<_> = pending.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["00000001-init-schema.sql", "00000003-init-triggers.sql"]);
        assert_eq!(pending[0].content, "CREATE TABLE a();");
        assert_eq!(pending[0].checksum, checksum(b"CREATE TABLE a();"));
    }

    #[test]
    fn test_resolve_ignores_other_files_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "00000001-init-schema.sql", "SELECT 1;");
        write(&temp_dir, "README.md", "# notes");
        write(&temp_dir, "00000002-draft.sql.bak", "SELECT 2;");
        fs::create_dir(temp_dir.path().join("00000003-nested.sql")).unwrap();

        let pending = MigrationResolver::new()
            .resolve(temp_dir.path(), &HashSet::new())
            .unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "00000001-init-schema.sql");
    }

    #[test]
    fn test_resolve_everything_applied() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "00000001-init-schema.sql", "SELECT 1;");

        let pending = MigrationResolver::new()
            .resolve(temp_dir.path(), &applied(&["00000001-init-schema.sql"]))
            .unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_resolve_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");

        let err = MigrationResolver::new()
            .resolve(&missing, &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, MigrationError::DirectoryNotFound { path } if path == missing));
    }

    #[test]
    fn test_resolve_unreadable_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("00000001-binary.sql"), [0xff, 0xfe, 0x00]).unwrap();

        let err = MigrationResolver::new()
            .resolve(temp_dir.path(), &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnreadableFile { .. }));
    }
}
