//! Grain completion hooks.
//!
//! Hooks run once every element of a grain has been applied successfully,
//! before the grain is marked READY, inside the same transaction.

use crate::adapter::DbAdapter;
use crate::config::StatusTables;
use crate::error::Error;
use crate::score::Grain;
use crate::status::{RegistryKind, RegistryRow};
use std::collections::HashSet;
use tracing::debug;

/// Work to run when a grain finishes upgrading.
pub trait GrainHook {
    /// Name used when reporting a failure of this hook.
    fn name(&self) -> &str;

    /// Called after all elements of `grain` were applied.
    fn on_grain_ready(
        &self,
        adapter: &mut dyn DbAdapter,
        tables: &StatusTables,
        grain: &Grain,
    ) -> Result<(), Error>;
}

/// Keeps the element registry in line with the grain: every declared
/// table, view, materialized view and parameterized view has a live row,
/// and rows for objects the grain no longer declares are flagged orphaned.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryHook;

impl GrainHook for RegistryHook {
    fn name(&self) -> &str {
        "registry"
    }

    fn on_grain_ready(
        &self,
        adapter: &mut dyn DbAdapter,
        tables: &StatusTables,
        grain: &Grain,
    ) -> Result<(), Error> {
        let existing = adapter.select_registry(tables, &grain.name)?;

        let mut declared = HashSet::new();
        for element in &grain.elements {
            let Some(kind) = RegistryKind::for_element(element.kind()) else {
                continue;
            };
            declared.insert(element.name().to_string());
            let row = RegistryRow {
                grain_id: grain.name.clone(),
                name: element.name().to_string(),
                kind,
                orphaned: false,
            };
            if !existing.contains(&row) {
                adapter.upsert_registry(tables, &row)?;
            }
        }

        for mut row in existing {
            if row.orphaned || declared.contains(&row.name) {
                continue;
            }
            debug!(grain = %grain.name, name = %row.name, "marking registry entry orphaned");
            row.orphaned = true;
            adapter.upsert_registry(tables, &row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::config::MigratorConfig;
    use crate::migration::store::system_grain;
    use crate::score::{Index, Table, VersionString, View};

    fn installed() -> (MemoryAdapter, StatusTables) {
        let config = MigratorConfig::default();
        let mut adapter = MemoryAdapter::new();
        let sys = system_grain(&config).unwrap();
        adapter.create_schema_if_not_exists(&sys.name).unwrap();
        for table in sys.tables() {
            adapter.create_table(table).unwrap();
        }
        adapter.commit().unwrap();
        (adapter, config.status_tables())
    }

    #[test]
    fn test_registry_tracks_declared_objects() {
        let (mut adapter, tables) = installed();
        let grain = Grain::new("shop", VersionString::default())
            .with_element(Table::new("shop", "orders"))
            .with_element(View::new("shop", "v_orders", "select"))
            .with_element(Index::new("shop", "ix", "orders", ["id"]));

        RegistryHook.on_grain_ready(&mut adapter, &tables, &grain).unwrap();

        let mut names: Vec<_> = adapter.registry("shop").iter().map(|r| r.name.clone()).collect();
        names.sort();
        assert_eq!(names, ["orders", "v_orders"]);
    }

    #[test]
    fn test_registry_marks_orphans() {
        let (mut adapter, tables) = installed();
        let before = Grain::new("shop", VersionString::default())
            .with_element(Table::new("shop", "orders"))
            .with_element(Table::new("shop", "legacy"));
        RegistryHook.on_grain_ready(&mut adapter, &tables, &before).unwrap();

        let after = Grain::new("shop", VersionString::default())
            .with_element(Table::new("shop", "orders"));
        RegistryHook.on_grain_ready(&mut adapter, &tables, &after).unwrap();

        let rows = adapter.registry("shop");
        let legacy = rows.iter().find(|r| r.name == "legacy").unwrap();
        let orders = rows.iter().find(|r| r.name == "orders").unwrap();
        assert!(legacy.orphaned);
        assert!(!orders.orphaned);
        assert_eq!(legacy.kind, RegistryKind::Table);
    }

    #[test]
    fn test_registry_requires_store() {
        let mut adapter = MemoryAdapter::new();
        let tables = MigratorConfig::default().status_tables();
        let grain = Grain::new("shop", VersionString::default());
        assert!(RegistryHook.on_grain_ready(&mut adapter, &tables, &grain).is_err());
    }
}
