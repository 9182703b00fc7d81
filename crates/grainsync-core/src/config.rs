//! Migrator configuration.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default name of the bootstrap grain and of its schema.
pub const DEFAULT_SYSTEM_SCHEMA: &str = "celesta";

/// Default name of the grain status table.
pub const DEFAULT_GRAINS_TABLE: &str = "grains";

/// Default name of the element status table.
pub const DEFAULT_ELEMENTS_TABLE: &str = "grain_elements";

/// Default name of the element registry table.
pub const DEFAULT_REGISTRY_TABLE: &str = "tables";

/// Location of the status store relations in the target database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusTables {
    /// Schema holding the relations.
    pub schema: String,
    /// Grain status table.
    pub grains: String,
    /// Element status table.
    pub elements: String,
    /// Element registry table.
    pub registry: String,
}

/// Configuration for [`DbUpdater`](crate::migration::DbUpdater).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Initialize the status store even when the database already holds
    /// unmanaged tables.
    pub force_initialize: bool,

    /// Schema (and bootstrap grain) holding the status store.
    pub system_schema: String,

    /// Grain status table.
    pub grains_table: String,

    /// Element status table.
    pub elements_table: String,

    /// Element registry table.
    pub registry_table: String,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            force_initialize: false,
            system_schema: DEFAULT_SYSTEM_SCHEMA.to_string(),
            grains_table: DEFAULT_GRAINS_TABLE.to_string(),
            elements_table: DEFAULT_ELEMENTS_TABLE.to_string(),
            registry_table: DEFAULT_REGISTRY_TABLE.to_string(),
        }
    }
}

impl MigratorConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that all names are usable.
    pub fn validate(&self) -> Result<(), Error> {
        for (key, value) in [
            ("system_schema", &self.system_schema),
            ("grains_table", &self.grains_table),
            ("elements_table", &self.elements_table),
            ("registry_table", &self.registry_table),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", key)));
            }
        }
        if self.grains_table == self.elements_table {
            return Err(Error::Config(
                "grains_table and elements_table must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Status store relations named by this configuration.
    pub fn status_tables(&self) -> StatusTables {
        StatusTables {
            schema: self.system_schema.clone(),
            grains: self.grains_table.clone(),
            elements: self.elements_table.clone(),
            registry: self.registry_table.clone(),
        }
    }

    /// Allow bootstrapping over a non-empty database.
    pub fn with_force_initialize(mut self, force: bool) -> Self {
        self.force_initialize = force;
        self
    }

    /// Set the system schema / bootstrap grain name.
    pub fn with_system_schema(mut self, schema: impl Into<String>) -> Self {
        self.system_schema = schema.into();
        self
    }

    /// Set the grain status table name.
    pub fn with_grains_table(mut self, table: impl Into<String>) -> Self {
        self.grains_table = table.into();
        self
    }

    /// Set the element status table name.
    pub fn with_elements_table(mut self, table: impl Into<String>) -> Self {
        self.elements_table = table.into();
        self
    }

    /// Set the registry table name.
    pub fn with_registry_table(mut self, table: impl Into<String>) -> Self {
        self.registry_table = table.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MigratorConfig::default();
        assert!(!config.force_initialize);
        assert_eq!(config.system_schema, "celesta");
        assert_eq!(config.grains_table, "grains");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"force_initialize": true, "system_schema": "sys"}}"#).unwrap();

        let config = MigratorConfig::from_json_file(file.path()).unwrap();
        assert!(config.force_initialize);
        assert_eq!(config.system_schema, "sys");
        assert_eq!(config.elements_table, DEFAULT_ELEMENTS_TABLE);
    }

    #[test]
    fn test_from_json_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"grains_table": ""}}"#).unwrap();
        assert!(matches!(
            MigratorConfig::from_json_file(file.path()),
            Err(Error::Config(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            MigratorConfig::from_json_file(file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_builders() {
        let config = MigratorConfig::new()
            .with_force_initialize(true)
            .with_system_schema("sys")
            .with_grains_table("g")
            .with_elements_table("e")
            .with_registry_table("r");
        assert!(config.force_initialize);
        assert_eq!(
            (config.grains_table.as_str(), config.elements_table.as_str()),
            ("g", "e")
        );
        assert_eq!(config.registry_table, "r");

        let tables = config.status_tables();
        assert_eq!(tables.schema, "sys");
        assert_eq!(tables.registry, "r");
    }
}
