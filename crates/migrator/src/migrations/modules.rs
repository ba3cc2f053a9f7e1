//! Module catalog and locator
//!
//! A module is a named set of migration files layered over the core schema.
//! The catalog lists the known modules (core plus those declared in
//! `modules.yaml`); the locator finds each module's migration directory.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CORE_MODULE;
use crate::error::{MigrationError, MigrationResult};

/// Manifest declaring the non-core modules, relative to the migrations root
pub const MODULE_MANIFEST: &str = "modules.yaml";

/// Package name the core migrations ship in
pub const CORE_PACKAGE: &str = "oac_database";

/// A module known to the migrator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleDefinition {
    /// Discriminator stored in the bookkeeping `module` column
    pub key: String,
    /// Package (directory) name holding the module's migrations
    pub package: String,
}

impl ModuleDefinition {
    pub fn core() -> Self {
        Self {
            key: CORE_MODULE.to_string(),
            package: CORE_PACKAGE.to_string(),
        }
    }

    pub fn is_core(&self) -> bool {
        self.key == CORE_MODULE
    }
}

#[derive(Debug, Deserialize)]
struct ModuleManifest {
    #[serde(default)]
    modules: Vec<ModuleDefinition>,
}

/// Ordered list of known modules; core is always first
#[derive(Debug, Clone)]
pub struct ModuleCatalog {
    modules: Vec<ModuleDefinition>,
}

impl Default for ModuleCatalog {
    fn default() -> Self {
        Self {
            modules: vec![ModuleDefinition::core()],
        }
    }
}

impl ModuleCatalog {
    /// Load the catalog for a migrations root; a missing manifest yields the
    /// core-only catalog.
    pub fn load(root: &Path) -> MigrationResult<Self> {
        let manifest_path = root.join(MODULE_MANIFEST);
        if !manifest_path.is_file() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&manifest_path).map_err(|e| {
            MigrationError::Configuration(format!("Failed to read {}: {}", manifest_path.display(), e))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| MigrationError::Configuration(format!("Invalid {}: {}", manifest_path.display(), e)))
    }

    /// Parse a module manifest
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let manifest: ModuleManifest = serde_yaml::from_str(content)?;
        let mut catalog = Self::default();
        for module in manifest.modules {
            catalog.register(module);
        }
        Ok(catalog)
    }

    /// Add a module; core and already known keys are ignored
    pub fn register(&mut self, module: ModuleDefinition) {
        if module.is_core() || self.get(&module.key).is_some() {
            tracing::debug!("Module '{}' already registered, ignoring duplicate", module.key);
            return;
        }
        self.modules.push(module);
    }

    pub fn get(&self, key: &str) -> Option<&ModuleDefinition> {
        self.modules.iter().find(|m| m.key == key)
    }

    pub fn modules(&self) -> &[ModuleDefinition] {
        &self.modules
    }
}

/// Resolves a module's migration directory
#[derive(Debug, Clone)]
pub struct ModuleLocator {
    root: PathBuf,
}

impl ModuleLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Candidate directories, in search order
    pub fn candidates(&self, module: &ModuleDefinition) -> Vec<PathBuf> {
        if module.is_core() {
            return vec![self.root.join("migrations")];
        }
        vec![
            self.root.join("packages").join(&module.package).join("migrations"),
            self.root.join("..").join(&module.package).join("migrations"),
        ]
    }

    /// First existing candidate directory. Core is returned unchecked so the
    /// resolver reports it as a plain missing directory.
    pub fn locate(&self, module: &ModuleDefinition) -> MigrationResult<PathBuf> {
        if module.is_core() {
            return Ok(self.root.join("migrations"));
        }

        let candidates = self.candidates(module);
        match candidates.iter().find(|dir| dir.is_dir()) {
            Some(dir) => Ok(dir.clone()),
            None => Err(MigrationError::ModuleDirectoryNotFound {
                module: module.key.clone(),
                searched: candidates,
            }),
        }
    }
}
