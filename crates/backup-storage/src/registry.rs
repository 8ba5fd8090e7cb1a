//! Storage registry: named storage targets resolved from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use backup_types::StorageConfig;
use tracing::info;

use crate::error::StorageError;
use crate::filesystem::FilesystemStorage;
use crate::port::StoragePort;

/// Storage targets by configured name.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    targets: BTreeMap<String, Arc<dyn StoragePort>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configured storage target.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::UnsupportedType` for an unknown `type`, or an
    /// I/O error if a filesystem root cannot be created.
    pub fn from_config(storage: &BTreeMap<String, StorageConfig>) -> Result<Self, StorageError> {
        let mut registry = Self::new();
        for (name, config) in storage {
            let adapter: Arc<dyn StoragePort> = match config.kind.as_str() {
                "filesystem" => {
                    let base_path = config.expanded_base_path();
                    info!(storage = %name, path = %base_path.display(), "Opening filesystem storage");
                    Arc::new(FilesystemStorage::open(base_path)?)
                }
                other => {
                    return Err(StorageError::UnsupportedType {
                        name: name.clone(),
                        kind: other.to_string(),
                    })
                }
            };
            registry.insert(name.clone(), adapter);
        }
        Ok(registry)
    }

    /// Register (or replace) a storage target.
    pub fn insert(&mut self, name: impl Into<String>, storage: Arc<dyn StoragePort>) {
        self.targets.insert(name.into(), storage);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn StoragePort>, StorageError> {
        self.targets
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }
}
