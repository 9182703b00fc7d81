//! Status store access.
//!
//! Every transition written here is committed immediately so that an
//! operator looking at the store mid-run sees where the run is.

use super::error::MigrationError;
use crate::adapter::DbAdapter;
use crate::config::{MigratorConfig, StatusTables};
use crate::error::Error;
use crate::score::{
    Column, ColumnType, Element, ElementRef, Fingerprint, ForeignKey, Grain, Table,
    VersionString,
};
use crate::status::{ElementState, ElementStatusRow, GrainInfo, GrainState, GrainStatusRow};
use std::collections::HashMap;
use tracing::debug;

/// Typed access to the status store relations.
#[derive(Debug, Clone)]
pub struct StatusStore {
    tables: StatusTables,
}

impl StatusStore {
    /// Create a store over the given relations.
    pub fn new(tables: StatusTables) -> Self {
        Self { tables }
    }

    /// Relations backing the store.
    pub fn tables(&self) -> &StatusTables {
        &self.tables
    }

    /// Whether the grain status relation exists.
    pub fn is_installed<A: DbAdapter + ?Sized>(&self, adapter: &mut A) -> Result<bool, Error> {
        adapter.table_exists(&self.tables.schema, &self.tables.grains)
    }

    /// Load every grain row.
    ///
    /// A row in a state no run may start from aborts with
    /// [`MigrationError::FatalStatus`].
    pub fn load<A: DbAdapter + ?Sized>(
        &self,
        adapter: &mut A,
    ) -> Result<HashMap<String, GrainInfo>, MigrationError> {
        let rows = adapter.select_grain_statuses(&self.tables)?;
        let mut infos = HashMap::with_capacity(rows.len());
        for row in rows {
            if !row.state.allows_upgrade_run() {
                return Err(MigrationError::FatalStatus {
                    grain: row.id,
                    state: row.state,
                });
            }
            let info = row.to_info()?;
            infos.insert(row.id, info);
        }
        Ok(infos)
    }

    /// Record a grain seen for the first time, in RECOVER.
    pub fn insert_first_seen<A: DbAdapter + ?Sized>(
        &self,
        adapter: &mut A,
        grain: &Grain,
    ) -> Result<(), Error> {
        debug!(grain = %grain.name, "recording new grain");
        adapter.insert_grain_status(&self.tables, &GrainStatusRow::first_seen(grain))?;
        adapter.commit()
    }

    /// Move a grain row to `state`, keeping its recorded fingerprint.
    pub fn set_grain_state<A: DbAdapter + ?Sized>(
        &self,
        adapter: &mut A,
        grain_id: &str,
        state: GrainState,
        message: &str,
    ) -> Result<(), Error> {
        let mut row = self.grain_row(adapter, grain_id)?;
        row.transition(state, message);
        adapter.update_grain_status(&self.tables, &row)?;
        adapter.commit()
    }

    /// Mark a grain READY with its current version and fingerprint.
    pub fn mark_grain_ready<A: DbAdapter + ?Sized>(
        &self,
        adapter: &mut A,
        grain: &Grain,
    ) -> Result<(), Error> {
        let mut row = self.grain_row(adapter, &grain.name)?;
        row.mark_ready(grain);
        adapter.update_grain_status(&self.tables, &row)?;
        adapter.commit()
    }

    /// Upsert an element row and commit, together with any DDL issued since
    /// the last commit.
    pub fn set_element_state<A: DbAdapter + ?Sized>(
        &self,
        adapter: &mut A,
        element: &ElementRef,
        state: ElementState,
        message: &str,
    ) -> Result<(), Error> {
        let row = ElementStatusRow::new(&element.grain, &element.name, element.kind, state, message);
        match adapter.get_element_status(&self.tables, &element.grain, &element.name)? {
            Some(_) => adapter.update_element_status(&self.tables, &row)?,
            None => adapter.insert_element_status(&self.tables, &row)?,
        }
        adapter.commit()
    }

    fn grain_row<A: DbAdapter + ?Sized>(
        &self,
        adapter: &mut A,
        grain_id: &str,
    ) -> Result<GrainStatusRow, Error> {
        adapter
            .get_grain_status(&self.tables, grain_id)?
            .ok_or_else(|| Error::InvalidStatus(format!("no status row for grain '{}'", grain_id)))
    }
}

/// The bootstrap grain declaring the status store relations named by
/// `config`.
pub fn system_grain(config: &MigratorConfig) -> Result<Grain, Error> {
    let schema = config.system_schema.as_str();
    let name = |length| ColumnType::String {
        length: Some(length),
    };
    let text = ColumnType::String { length: None };

    let grains = Table::new(schema, &config.grains_table)
        .with_column(Column::new("id", name(30)).not_null())
        .with_column(Column::new("version", name(2000)).not_null())
        .with_column(Column::new("length", ColumnType::Integer).not_null())
        .with_column(Column::new("checksum", name(8)).not_null())
        .with_column(Column::new("state", ColumnType::Integer).not_null())
        .with_column(Column::new("lastmodified", ColumnType::DateTime).not_null())
        .with_column(Column::new("message", text.clone()))
        .with_primary_key(["id"]);

    let grain_fk = |constraint: String| {
        ForeignKey::new(constraint, ["grainid"], schema, &config.grains_table)
            .with_ref_columns(["id"])
    };

    let elements = Table::new(schema, &config.elements_table)
        .with_column(Column::new("grainid", name(30)).not_null())
        .with_column(Column::new("id", name(30)).not_null())
        .with_column(Column::new("kind", name(30)).not_null())
        .with_column(Column::new("state", ColumnType::Integer).not_null())
        .with_column(Column::new("lastmodified", ColumnType::DateTime).not_null())
        .with_column(Column::new("message", text))
        .with_primary_key(["grainid", "id"])
        .with_foreign_key(grain_fk(format!("fk_{}_{}", schema, config.elements_table)));

    let registry = Table::new(schema, &config.registry_table)
        .with_column(Column::new("grainid", name(30)).not_null())
        .with_column(Column::new("tablename", name(30)).not_null())
        .with_column(Column::new("tabletype", name(2)).not_null())
        .with_column(Column::new("orphaned", ColumnType::Boolean).not_null())
        .with_primary_key(["grainid", "tablename"])
        .with_foreign_key(grain_fk(format!("fk_{}_{}", schema, config.registry_table)));

    let elements: Vec<Element> = vec![grains.into(), elements.into(), registry.into()];
    let fingerprint = Fingerprint::of(&serde_json::to_vec(&elements)?);

    let mut grain = Grain::new(schema, VersionString::default()).with_fingerprint(fingerprint);
    for element in elements {
        grain = grain.with_element(element);
    }
    Ok(grain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::score::ElementKind;

    fn installed() -> (MemoryAdapter, StatusStore, Grain) {
        let config = MigratorConfig::default();
        let grain = system_grain(&config).unwrap();
        let mut adapter = MemoryAdapter::new();
        adapter.create_schema_if_not_exists(&grain.name).unwrap();
        for table in grain.tables() {
            adapter.create_table(table).unwrap();
        }
        adapter.commit().unwrap();
        (adapter, StatusStore::new(config.status_tables()), grain)
    }

    #[test]
    fn test_system_grain_shape() {
        let grain = system_grain(&MigratorConfig::default()).unwrap();
        assert_eq!(grain.name, "celesta");
        assert_eq!(grain.tables().count(), 3);
        assert!(grain.table("grain_elements").unwrap().foreign_keys[0].ref_table == "grains");
        assert_ne!(grain.checksum(), 0);
    }

    #[test]
    fn test_first_seen_then_ready() {
        let (mut adapter, store, grain) = installed();
        assert!(store.is_installed(&mut adapter).unwrap());

        store.insert_first_seen(&mut adapter, &grain).unwrap();
        let infos = store.load(&mut adapter).unwrap();
        assert!(infos["celesta"].recover);

        store
            .set_grain_state(&mut adapter, "celesta", GrainState::Upgrading, "")
            .unwrap();
        assert!(matches!(
            store.load(&mut adapter),
            Err(MigrationError::FatalStatus { state: GrainState::Upgrading, .. })
        ));

        store.mark_grain_ready(&mut adapter, &grain).unwrap();
        let infos = store.load(&mut adapter).unwrap();
        assert!(!infos["celesta"].recover);
        assert_eq!(infos["celesta"].checksum, grain.checksum());
    }

    #[test]
    fn test_element_state_upsert() {
        let (mut adapter, store, _) = installed();
        let element = ElementRef::new("shop", "orders", ElementKind::Table);

        store
            .set_element_state(&mut adapter, &element, ElementState::Upgrading, "")
            .unwrap();
        store
            .set_element_state(&mut adapter, &element, ElementState::Error, "1.00/0/00000000: boom")
            .unwrap();

        let row = adapter.element_status("shop", "orders").unwrap();
        assert_eq!(row.state, ElementState::Error);
        assert_eq!(row.kind, ElementKind::Table);
        assert!(row.message.ends_with("boom"));
    }

    #[test]
    fn test_set_state_of_unknown_grain() {
        let (mut adapter, store, _) = installed();
        assert!(matches!(
            store.set_grain_state(&mut adapter, "nope", GrainState::Error, "x"),
            Err(Error::InvalidStatus(_))
        ));
    }
}
