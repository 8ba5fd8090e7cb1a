//! Connector registry keyed by type identifier.

use std::collections::BTreeMap;
use std::sync::Arc;

use backup_types::JobSpec;

use crate::connector::Connector;
use crate::connectors::DirectoryConnector;
use crate::error::ConnectorError;

/// Builds a fresh connector instance for one job execution.
pub type ConnectorFactory =
    Arc<dyn Fn(&JobSpec) -> Result<Box<dyn Connector>, ConnectorError> + Send + Sync>;

/// Connector factories by type identifier.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: BTreeMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in connectors (`directory`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(DirectoryConnector::TYPE, |_spec| {
            Ok(Box::new(DirectoryConnector::new()) as Box<dyn Connector>)
        });
        registry
    }

    /// Register (or replace) a factory.
    pub fn register<F>(&mut self, connector_type: impl Into<String>, factory: F)
    where
        F: Fn(&JobSpec) -> Result<Box<dyn Connector>, ConnectorError> + Send + Sync + 'static,
    {
        self.factories
            .insert(connector_type.into(), Arc::new(factory));
    }

    pub fn contains(&self, connector_type: &str) -> bool {
        self.factories.contains_key(connector_type)
    }

    pub fn types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate the connector a job asks for.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::UnknownType` if nothing is registered for
    /// `spec.connector`.
    pub fn create(&self, spec: &JobSpec) -> Result<Box<dyn Connector>, ConnectorError> {
        let factory = self
            .factories
            .get(&spec.connector)
            .ok_or_else(|| ConnectorError::UnknownType(spec.connector.clone()))?;
        factory(spec)
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;

    #[test]
    fn test_builtins_include_directory() {
        let registry = ConnectorRegistry::with_builtins();
        assert!(registry.contains("directory"));
        assert_eq!(registry.types(), vec!["directory"]);

        let spec = JobSpec::new("docs", "directory");
        let connector = registry.create(&spec).unwrap();
        assert_eq!(connector.connector_type(), "directory");
    }

    #[test]
    fn test_unknown_type() {
        let registry = ConnectorRegistry::with_builtins();
        let spec = JobSpec::new("repos", "github");
        match registry.create(&spec) {
            Err(ConnectorError::UnknownType(t)) => assert_eq!(t, "github"),
            _ => panic!("Expected UnknownType"),
        }
    }

    #[test]
    fn test_register_custom_factory() {
        let mut registry = ConnectorRegistry::new();
        registry.register("mock", |_spec| {
            Ok(Box::new(MockConnector::succeeding()) as Box<dyn Connector>)
        });

        assert!(registry.contains("mock"));
        assert!(!registry.contains("directory"));
        let connector = registry.create(&JobSpec::new("x", "mock")).unwrap();
        assert_eq!(connector.connector_type(), "mock");
    }
}
