//! In-memory database adapter.
//!
//! Models a transactional database well enough to drive the migrator in
//! tests: schemas, tables with keys, indices, sequences, views, triggers
//! and the status store relations. Every mutating call is journaled, and
//! failures can be injected per operation and target.

use super::meta::{DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo, TriggerQuery};
use super::DbAdapter;
use crate::config::StatusTables;
use crate::error::Error;
use crate::score::{
    Aggregate, Column, ColumnType, ForeignKey, Index, MaterializedView, ParameterizedView,
    Sequence, Table, TriggerType, View,
};
use crate::status::{ElementStatusRow, GrainStatusRow, RegistryRow};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

type Key = (String, String);

fn key(schema: &str, name: &str) -> Key {
    (schema.to_string(), name.to_string())
}

/// Operations that touch the status store or transaction state rather than
/// the schema.
const NON_DDL_OPS: &[&str] = &[
    "commit",
    "rollback",
    "insert_grain_status",
    "update_grain_status",
    "insert_element_status",
    "update_element_status",
    "upsert_registry",
];

/// Name of the bookkeeping column of materialized view tables.
const SURROGATE_COUNT: &str = "surrogate_count";

/// A live table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveTable {
    /// Columns in creation order.
    pub columns: Vec<DbColumnInfo>,
    /// Primary key; empty when the table has none.
    pub pk: DbPkInfo,
    /// Foreign keys owned by this table.
    pub foreign_keys: Vec<DbFkInfo>,
}

impl LiveTable {
    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&DbColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get a foreign key by name.
    pub fn foreign_key(&self, name: &str) -> Option<&DbFkInfo> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }
}

#[derive(Debug, Clone, Default)]
struct Database {
    schemas: BTreeSet<String>,
    sys_objects: bool,
    tables: BTreeMap<Key, LiveTable>,
    sequences: BTreeMap<Key, DbSequenceInfo>,
    indices: BTreeMap<Key, DbIndexInfo>,
    views: BTreeMap<Key, String>,
    parameterized_views: BTreeMap<Key, String>,
    triggers: BTreeMap<(String, String, String), String>,
    versioning_triggers: BTreeSet<Key>,
    auto_increment: BTreeSet<Key>,
    grain_statuses: BTreeMap<String, GrainStatusRow>,
    element_statuses: BTreeMap<Key, ElementStatusRow>,
    registry: BTreeMap<Key, RegistryRow>,
}

impl Database {
    fn table(&self, schema: &str, name: &str) -> Result<&LiveTable, Error> {
        self.tables
            .get(&key(schema, name))
            .ok_or_else(|| Error::database(format!("table {}.{} does not exist", schema, name)))
    }

    fn table_mut(&mut self, schema: &str, name: &str) -> Result<&mut LiveTable, Error> {
        self.tables
            .get_mut(&key(schema, name))
            .ok_or_else(|| Error::database(format!("table {}.{} does not exist", schema, name)))
    }

    fn require_schema(&self, schema: &str) -> Result<(), Error> {
        if self.schemas.contains(schema) {
            Ok(())
        } else {
            Err(Error::database(format!("schema {} does not exist", schema)))
        }
    }

    fn require_relation(&self, schema: &str, name: &str) -> Result<(), Error> {
        self.table(schema, name).map(|_| ())
    }

    /// Foreign keys anywhere in the database pointing at `schema.table`.
    fn referencing_fks(&self, schema: &str, table: &str) -> Vec<&DbFkInfo> {
        self.tables
            .values()
            .flat_map(|t| t.foreign_keys.iter())
            .filter(|fk| fk.references(schema, table))
            .collect()
    }
}

/// One recorded mutating adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterCall {
    /// Adapter method name.
    pub op: &'static str,
    /// Object the call acted on.
    pub target: String,
}

impl AdapterCall {
    /// Whether the call changes the schema (as opposed to status rows or
    /// transaction state).
    pub fn is_ddl(&self) -> bool {
        !NON_DDL_OPS.contains(&self.op)
    }
}

#[derive(Debug, Clone)]
struct FailureRule {
    op: String,
    target: String,
    remaining: Option<usize>,
}

impl FailureRule {
    fn matches(&self, op: &str, target: &str) -> bool {
        self.op == op && (self.target == "*" || self.target == target)
    }
}

/// Shared handle arming failures on a [`MemoryAdapter`].
///
/// Clones share one rule list, so a test can keep a handle while the
/// adapter is owned by the migrator.
#[derive(Debug, Clone, Default)]
pub struct FailureInjector {
    rules: Arc<Mutex<Vec<FailureRule>>>,
}

impl FailureInjector {
    /// Fail every call of `op` on `target`. A target of `"*"` matches any.
    pub fn fail_on(&self, op: impl Into<String>, target: impl Into<String>) {
        self.rules.lock().push(FailureRule {
            op: op.into(),
            target: target.into(),
            remaining: None,
        });
    }

    /// Fail the next call of `op` on `target` only.
    pub fn fail_once(&self, op: impl Into<String>, target: impl Into<String>) {
        self.rules.lock().push(FailureRule {
            op: op.into(),
            target: target.into(),
            remaining: Some(1),
        });
    }

    /// Disarm all failures.
    pub fn clear(&self) {
        self.rules.lock().clear();
    }

    fn check(&self, op: &str, target: &str) -> Result<(), Error> {
        let mut rules = self.rules.lock();
        let Some(pos) = rules.iter().position(|r| r.matches(op, target)) else {
            return Ok(());
        };
        let exhausted = match rules[pos].remaining.as_mut() {
            Some(remaining) => {
                *remaining -= 1;
                *remaining == 0
            }
            None => false,
        };
        if exhausted {
            rules.remove(pos);
        }
        Err(Error::database(format!("injected failure: {} {}", op, target)))
    }
}

/// Transactional in-memory database.
///
/// Uncommitted changes live in a working copy that `rollback` discards.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    committed: Database,
    current: Database,
    journal: Vec<AdapterCall>,
    failures: FailureInjector,
}

impl MemoryAdapter {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for arming failures.
    pub fn failure_injector(&self) -> FailureInjector {
        self.failures.clone()
    }

    /// All mutating calls issued so far, including rolled-back ones.
    pub fn calls(&self) -> &[AdapterCall] {
        &self.journal
    }

    /// Schema-changing calls issued so far.
    pub fn ddl_calls(&self) -> Vec<&AdapterCall> {
        self.journal.iter().filter(|c| c.is_ddl()).collect()
    }

    /// Whether a call of `op` on `target` was issued.
    pub fn was_called(&self, op: &str, target: &str) -> bool {
        self.journal.iter().any(|c| c.op == op && c.target == target)
    }

    /// Forget the journal.
    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Create a committed table outside of any migration, as a database
    /// populated by other tooling would have.
    pub fn seed_table(&mut self, schema: &str, name: &str, table: LiveTable) {
        self.current.schemas.insert(schema.to_string());
        self.current.tables.insert(key(schema, name), table);
        self.committed = self.current.clone();
    }

    /// Live table, including uncommitted changes.
    pub fn table(&self, schema: &str, name: &str) -> Option<&LiveTable> {
        self.current.tables.get(&key(schema, name))
    }

    /// Live sequence.
    pub fn sequence(&self, schema: &str, name: &str) -> Option<&DbSequenceInfo> {
        self.current.sequences.get(&key(schema, name))
    }

    /// Live index.
    pub fn index(&self, grain: &str, name: &str) -> Option<&DbIndexInfo> {
        self.current.indices.get(&key(grain, name))
    }

    /// Whether a view exists.
    pub fn has_view(&self, schema: &str, name: &str) -> bool {
        self.current.views.contains_key(&key(schema, name))
    }

    /// Whether a parameterized view exists.
    pub fn has_parameterized_view(&self, schema: &str, name: &str) -> bool {
        self.current
            .parameterized_views
            .contains_key(&key(schema, name))
    }

    /// Body of a trigger.
    pub fn trigger_body(&self, schema: &str, table: &str, name: &str) -> Option<&str> {
        self.current
            .triggers
            .get(&(schema.to_string(), table.to_string(), name.to_string()))
            .map(String::as_str)
    }

    /// Whether the versioning trigger is installed on a table.
    pub fn has_versioning_trigger(&self, schema: &str, table: &str) -> bool {
        self.current.versioning_triggers.contains(&key(schema, table))
    }

    /// Whether system objects were created.
    pub fn has_sys_objects(&self) -> bool {
        self.current.sys_objects
    }

    /// Grain status row, ignoring where the store lives.
    pub fn grain_status(&self, grain_id: &str) -> Option<&GrainStatusRow> {
        self.current.grain_statuses.get(grain_id)
    }

    /// Element status row, ignoring where the store lives.
    pub fn element_status(&self, grain_id: &str, element_id: &str) -> Option<&ElementStatusRow> {
        self.current
            .element_statuses
            .get(&key(grain_id, element_id))
    }

    /// Registry rows of a grain.
    pub fn registry(&self, grain_id: &str) -> Vec<&RegistryRow> {
        self.current
            .registry
            .values()
            .filter(|r| r.grain_id == grain_id)
            .collect()
    }

    fn record(&mut self, op: &'static str, target: impl Into<String>) -> Result<(), Error> {
        let target = target.into();
        trace!(op, target = %target, "memory adapter call");
        self.failures.check(op, &target)?;
        self.journal.push(AdapterCall { op, target });
        Ok(())
    }

    fn column_infos(table: &Table) -> Vec<DbColumnInfo> {
        let mut columns: Vec<DbColumnInfo> =
            table.columns.iter().map(DbColumnInfo::from_column).collect();
        if table.versioned && table.column(crate::score::REC_VERSION).is_none() {
            columns.push(DbColumnInfo::from_column(&table.rec_version_column()));
        }
        columns
    }
}

impl DbAdapter for MemoryAdapter {
    fn commit(&mut self) -> Result<(), Error> {
        self.record("commit", "")?;
        self.committed = self.current.clone();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        self.record("rollback", "")?;
        self.current = self.committed.clone();
        Ok(())
    }

    fn schema_exists(&mut self, schema: &str) -> Result<bool, Error> {
        Ok(self.current.schemas.contains(schema))
    }

    fn create_schema_if_not_exists(&mut self, schema: &str) -> Result<(), Error> {
        self.record("create_schema_if_not_exists", schema)?;
        self.current.schemas.insert(schema.to_string());
        Ok(())
    }

    fn user_tables_exist(&mut self) -> Result<bool, Error> {
        Ok(!self.current.tables.is_empty())
    }

    fn create_sys_objects(&mut self) -> Result<(), Error> {
        self.record("create_sys_objects", "")?;
        self.current.sys_objects = true;
        Ok(())
    }

    fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, Error> {
        Ok(self.current.tables.contains_key(&key(schema, table)))
    }

    fn create_table(&mut self, table: &Table) -> Result<(), Error> {
        self.record("create_table", format!("{}.{}", table.grain, table.name))?;
        let db = &mut self.current;
        db.require_schema(&table.grain)?;
        if db.tables.contains_key(&key(&table.grain, &table.name)) {
            return Err(Error::database(format!(
                "table {}.{} already exists",
                table.grain, table.name
            )));
        }

        let columns = Self::column_infos(table);
        for pk_column in &table.primary_key {
            if !columns.iter().any(|c| &c.name == pk_column) {
                return Err(Error::database(format!(
                    "primary key column {} not found in {}.{}",
                    pk_column, table.grain, table.name
                )));
            }
        }
        let pk = if table.primary_key.is_empty() {
            DbPkInfo::default()
        } else {
            DbPkInfo {
                name: table.pk_constraint_name(),
                columns: table.primary_key.clone(),
            }
        };

        db.tables.insert(
            key(&table.grain, &table.name),
            LiveTable {
                columns,
                pk,
                foreign_keys: Vec::new(),
            },
        );
        Ok(())
    }

    fn drop_table(&mut self, schema: &str, table: &str) -> Result<(), Error> {
        self.record("drop_table", format!("{}.{}", schema, table))?;
        let db = &mut self.current;
        if db.tables.remove(&key(schema, table)).is_none() {
            return Err(Error::database(format!(
                "table {}.{} does not exist",
                schema, table
            )));
        }
        db.triggers
            .retain(|(s, t, _), _| !(s == schema && t == table));
        db.versioning_triggers.remove(&key(schema, table));
        db.auto_increment.remove(&key(schema, table));
        db.indices
            .retain(|(s, _), index| !(s == schema && index.table_name == table));
        Ok(())
    }

    fn get_columns(&mut self, table: &Table) -> Result<BTreeSet<String>, Error> {
        let live = self.current.table(&table.grain, &table.name)?;
        Ok(live.columns.iter().map(|c| c.name.clone()).collect())
    }

    fn get_column_info(
        &mut self,
        table: &Table,
        column: &str,
    ) -> Result<Option<DbColumnInfo>, Error> {
        let live = self.current.table(&table.grain, &table.name)?;
        Ok(live.column(column).cloned())
    }

    fn create_column(&mut self, table: &Table, column: &Column) -> Result<(), Error> {
        self.record(
            "create_column",
            format!("{}.{}.{}", table.grain, table.name, column.name),
        )?;
        let live = self.current.table_mut(&table.grain, &table.name)?;
        if live.column(&column.name).is_some() {
            return Err(Error::database(format!(
                "column {} already exists in {}.{}",
                column.name, table.grain, table.name
            )));
        }
        live.columns.push(DbColumnInfo::from_column(column));
        Ok(())
    }

    fn update_column(
        &mut self,
        table: &Table,
        column: &Column,
        _live: &DbColumnInfo,
    ) -> Result<(), Error> {
        self.record(
            "update_column",
            format!("{}.{}.{}", table.grain, table.name, column.name),
        )?;
        let db = &mut self.current;
        let indexed = db.indices.iter().any(|((schema, _), index)| {
            schema == &table.grain
                && index.table_name == table.name
                && index.columns.contains(&column.name)
        });
        if indexed {
            return Err(Error::database(format!(
                "column {}.{}.{} is used by an index",
                table.grain, table.name, column.name
            )));
        }

        let live = db.table_mut(&table.grain, &table.name)?;
        if live.pk.columns.contains(&column.name) {
            return Err(Error::database(format!(
                "column {}.{}.{} is part of the primary key",
                table.grain, table.name, column.name
            )));
        }
        let slot = live
            .columns
            .iter_mut()
            .find(|c| c.name == column.name)
            .ok_or_else(|| {
                Error::database(format!(
                    "column {} does not exist in {}.{}",
                    column.name, table.grain, table.name
                ))
            })?;
        *slot = DbColumnInfo::from_column(column);
        Ok(())
    }

    fn get_pk_info(&mut self, table: &Table) -> Result<DbPkInfo, Error> {
        Ok(self.current.table(&table.grain, &table.name)?.pk.clone())
    }

    fn create_pk(&mut self, table: &Table) -> Result<(), Error> {
        self.record("create_pk", format!("{}.{}", table.grain, table.name))?;
        let live = self.current.table_mut(&table.grain, &table.name)?;
        if !live.pk.is_empty() {
            return Err(Error::database(format!(
                "table {}.{} already has a primary key",
                table.grain, table.name
            )));
        }
        if let Some(missing) = table
            .primary_key
            .iter()
            .find(|c| live.column(c).is_none())
        {
            return Err(Error::database(format!(
                "primary key column {} not found in {}.{}",
                missing, table.grain, table.name
            )));
        }
        live.pk = DbPkInfo {
            name: table.pk_constraint_name(),
            columns: table.primary_key.clone(),
        };
        Ok(())
    }

    fn drop_pk(&mut self, table: &Table, pk_name: &str) -> Result<(), Error> {
        self.record("drop_pk", format!("{}.{}", table.grain, table.name))?;
        let db = &mut self.current;
        if let Some(fk) = db.referencing_fks(&table.grain, &table.name).first() {
            return Err(Error::database(format!(
                "primary key of {}.{} is referenced by {}",
                table.grain, table.name, fk.name
            )));
        }
        let live = db.table_mut(&table.grain, &table.name)?;
        if live.pk.is_empty() || live.pk.name != pk_name {
            return Err(Error::database(format!(
                "primary key {} does not exist on {}.{}",
                pk_name, table.grain, table.name
            )));
        }
        live.pk = DbPkInfo::default();
        Ok(())
    }

    fn get_fk_info(&mut self, grain: &str) -> Result<Vec<DbFkInfo>, Error> {
        Ok(self
            .current
            .tables
            .iter()
            .filter(|((schema, _), _)| schema == grain)
            .flat_map(|(_, t)| t.foreign_keys.iter().cloned())
            .collect())
    }

    fn create_fk(&mut self, table: &Table, fk: &ForeignKey) -> Result<(), Error> {
        self.record(
            "create_fk",
            format!("{}.{}.{}", table.grain, table.name, fk.constraint_name),
        )?;
        let db = &mut self.current;
        let target = db.table(&fk.ref_grain, &fk.ref_table)?;
        if target.pk.is_empty() {
            return Err(Error::database(format!(
                "referenced table {}.{} has no primary key",
                fk.ref_grain, fk.ref_table
            )));
        }

        let live = db.table_mut(&table.grain, &table.name)?;
        if live.foreign_key(&fk.constraint_name).is_some() {
            return Err(Error::database(format!(
                "constraint {} already exists",
                fk.constraint_name
            )));
        }
        if let Some(missing) = fk.columns.iter().find(|c| live.column(c).is_none()) {
            return Err(Error::database(format!(
                "column {} not found in {}.{}",
                missing, table.grain, table.name
            )));
        }
        live.foreign_keys
            .push(DbFkInfo::from_foreign_key(table, fk));
        Ok(())
    }

    fn drop_fk(&mut self, schema: &str, table: &str, fk_name: &str) -> Result<(), Error> {
        self.record("drop_fk", format!("{}.{}.{}", schema, table, fk_name))?;
        let live = self.current.table_mut(schema, table)?;
        let before = live.foreign_keys.len();
        live.foreign_keys.retain(|fk| fk.name != fk_name);
        if live.foreign_keys.len() == before {
            return Err(Error::database(format!(
                "constraint {} does not exist on {}.{}",
                fk_name, schema, table
            )));
        }
        Ok(())
    }

    fn get_indices(&mut self, grain: &str) -> Result<BTreeMap<String, DbIndexInfo>, Error> {
        Ok(self
            .current
            .indices
            .iter()
            .filter(|((schema, _), _)| schema == grain)
            .map(|((_, name), info)| (name.clone(), info.clone()))
            .collect())
    }

    fn create_index(&mut self, index: &Index) -> Result<(), Error> {
        self.record("create_index", format!("{}.{}", index.grain, index.name))?;
        let db = &mut self.current;
        let live = db.table(&index.grain, &index.table)?;
        if let Some(missing) = index.columns.iter().find(|c| live.column(c).is_none()) {
            return Err(Error::database(format!(
                "column {} not found in {}.{}",
                missing, index.grain, index.table
            )));
        }
        if db.indices.contains_key(&key(&index.grain, &index.name)) {
            return Err(Error::database(format!(
                "index {}.{} already exists",
                index.grain, index.name
            )));
        }
        db.indices
            .insert(key(&index.grain, &index.name), DbIndexInfo::from_index(index));
        Ok(())
    }

    fn drop_index(&mut self, grain: &str, index: &DbIndexInfo) -> Result<(), Error> {
        self.record("drop_index", format!("{}.{}", grain, index.index_name))?;
        if self
            .current
            .indices
            .remove(&key(grain, &index.index_name))
            .is_none()
        {
            return Err(Error::database(format!(
                "index {}.{} does not exist",
                grain, index.index_name
            )));
        }
        Ok(())
    }

    fn sequence_exists(&mut self, schema: &str, name: &str) -> Result<bool, Error> {
        Ok(self.current.sequences.contains_key(&key(schema, name)))
    }

    fn get_sequence_info(&mut self, sequence: &Sequence) -> Result<DbSequenceInfo, Error> {
        self.current
            .sequences
            .get(&key(&sequence.grain, &sequence.name))
            .cloned()
            .ok_or_else(|| {
                Error::database(format!(
                    "sequence {}.{} does not exist",
                    sequence.grain, sequence.name
                ))
            })
    }

    fn create_sequence(&mut self, sequence: &Sequence) -> Result<(), Error> {
        self.record(
            "create_sequence",
            format!("{}.{}", sequence.grain, sequence.name),
        )?;
        let db = &mut self.current;
        db.require_schema(&sequence.grain)?;
        let k = key(&sequence.grain, &sequence.name);
        if db.sequences.contains_key(&k) {
            return Err(Error::database(format!(
                "sequence {}.{} already exists",
                sequence.grain, sequence.name
            )));
        }
        db.sequences.insert(k, DbSequenceInfo::from_sequence(sequence));
        Ok(())
    }

    fn alter_sequence(&mut self, sequence: &Sequence) -> Result<(), Error> {
        self.record(
            "alter_sequence",
            format!("{}.{}", sequence.grain, sequence.name),
        )?;
        let slot = self
            .current
            .sequences
            .get_mut(&key(&sequence.grain, &sequence.name))
            .ok_or_else(|| {
                Error::database(format!(
                    "sequence {}.{} does not exist",
                    sequence.grain, sequence.name
                ))
            })?;
        *slot = DbSequenceInfo::from_sequence(sequence);
        Ok(())
    }

    fn get_view_list(&mut self, grain: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .current
            .views
            .keys()
            .filter(|(schema, _)| schema == grain)
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn create_view(&mut self, view: &View) -> Result<(), Error> {
        self.record("create_view", format!("{}.{}", view.grain, view.name))?;
        let db = &mut self.current;
        db.require_schema(&view.grain)?;
        let k = key(&view.grain, &view.name);
        if db.views.contains_key(&k) {
            return Err(Error::database(format!(
                "view {}.{} already exists",
                view.grain, view.name
            )));
        }
        db.views.insert(k, view.query.clone());
        Ok(())
    }

    fn drop_view(&mut self, schema: &str, name: &str) -> Result<(), Error> {
        self.record("drop_view", format!("{}.{}", schema, name))?;
        if self.current.views.remove(&key(schema, name)).is_none() {
            return Err(Error::database(format!(
                "view {}.{} does not exist",
                schema, name
            )));
        }
        Ok(())
    }

    fn get_parameterized_view_list(&mut self, grain: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .current
            .parameterized_views
            .keys()
            .filter(|(schema, _)| schema == grain)
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn create_parameterized_view(&mut self, view: &ParameterizedView) -> Result<(), Error> {
        self.record(
            "create_parameterized_view",
            format!("{}.{}", view.grain, view.name),
        )?;
        let db = &mut self.current;
        db.require_schema(&view.grain)?;
        let k = key(&view.grain, &view.name);
        if db.parameterized_views.contains_key(&k) {
            return Err(Error::database(format!(
                "function {}.{} already exists",
                view.grain, view.name
            )));
        }
        db.parameterized_views.insert(k, view.query.clone());
        Ok(())
    }

    fn drop_parameterized_view(&mut self, schema: &str, name: &str) -> Result<(), Error> {
        self.record("drop_parameterized_view", format!("{}.{}", schema, name))?;
        if self
            .current
            .parameterized_views
            .remove(&key(schema, name))
            .is_none()
        {
            return Err(Error::database(format!(
                "function {}.{} does not exist",
                schema, name
            )));
        }
        Ok(())
    }

    fn create_materialized_view_table(
        &mut self,
        view: &MaterializedView,
        source: &Table,
    ) -> Result<(), Error> {
        self.record(
            "create_materialized_view_table",
            format!("{}.{}", view.grain, view.name),
        )?;
        let db = &mut self.current;
        db.require_schema(&view.grain)?;
        let k = key(&view.grain, &view.name);
        if db.tables.contains_key(&k) {
            return Err(Error::database(format!(
                "table {}.{} already exists",
                view.grain, view.name
            )));
        }

        let mut columns = Vec::with_capacity(view.group_by.len() + view.aggregates.len() + 1);
        for name in &view.group_by {
            let column = source.column(name).ok_or_else(|| {
                Error::database(format!(
                    "column {} not found in {}.{}",
                    name, source.grain, source.name
                ))
            })?;
            columns.push(DbColumnInfo::from_column(&column.clone().not_null()));
        }
        for aggregate in &view.aggregates {
            let column_type = match (aggregate.aggregate, &aggregate.source_column) {
                (Aggregate::Sum, Some(src)) => source
                    .column(src)
                    .map(|c| c.column_type.clone())
                    .unwrap_or(ColumnType::Floating),
                _ => ColumnType::Integer,
            };
            columns.push(DbColumnInfo::from_column(&Column::new(
                &aggregate.name,
                column_type,
            )));
        }
        columns.push(DbColumnInfo::from_column(
            &Column::new(SURROGATE_COUNT, ColumnType::Integer).not_null(),
        ));

        db.tables.insert(
            k,
            LiveTable {
                columns,
                pk: DbPkInfo {
                    name: format!("pk_{}_{}", view.grain, view.name),
                    columns: view.group_by.clone(),
                },
                foreign_keys: Vec::new(),
            },
        );
        Ok(())
    }

    fn init_data_for_materialized_view(
        &mut self,
        view: &MaterializedView,
        source: &Table,
    ) -> Result<(), Error> {
        self.record(
            "init_data_for_materialized_view",
            format!("{}.{}", view.grain, view.name),
        )?;
        self.current.require_relation(&view.grain, &view.name)?;
        self.current.require_relation(&source.grain, &source.name)
    }

    fn get_trigger_body(&mut self, query: &TriggerQuery) -> Result<Option<String>, Error> {
        Ok(self
            .current
            .triggers
            .get(&(
                query.schema.clone(),
                query.table_name.clone(),
                query.name.clone(),
            ))
            .cloned())
    }

    fn create_materialized_view_triggers(
        &mut self,
        view: &MaterializedView,
        source: &Table,
    ) -> Result<(), Error> {
        self.record(
            "create_materialized_view_triggers",
            format!("{}.{}", view.grain, view.name),
        )?;
        let db = &mut self.current;
        db.require_relation(&source.grain, &source.name)?;

        for trigger in TriggerType::ALL {
            let name = view.trigger_name(trigger);
            let k = (source.grain.clone(), source.name.clone(), name.clone());
            if db.triggers.contains_key(&k) {
                return Err(Error::database(format!("trigger {} already exists", name)));
            }
            let body = match trigger {
                TriggerType::PostInsert => format!(
                    "{} merge into {}.{} from inserted",
                    view.checksum_marker(),
                    view.grain,
                    view.name
                ),
                TriggerType::PostUpdate => {
                    format!("merge into {}.{} from deleted, inserted", view.grain, view.name)
                }
                TriggerType::PostDelete => {
                    format!("merge into {}.{} from deleted", view.grain, view.name)
                }
            };
            db.triggers.insert(k, body);
        }
        Ok(())
    }

    fn drop_materialized_view_triggers(&mut self, view: &MaterializedView) -> Result<(), Error> {
        self.record(
            "drop_materialized_view_triggers",
            format!("{}.{}", view.grain, view.name),
        )?;
        for trigger in TriggerType::ALL {
            self.current.triggers.remove(&(
                view.grain.clone(),
                view.source_table.clone(),
                view.trigger_name(trigger),
            ));
        }
        Ok(())
    }

    fn manage_auto_increment(&mut self, table: &Table) -> Result<(), Error> {
        self.record(
            "manage_auto_increment",
            format!("{}.{}", table.grain, table.name),
        )?;
        self.current.require_relation(&table.grain, &table.name)?;
        self.current
            .auto_increment
            .insert(key(&table.grain, &table.name));
        Ok(())
    }

    fn update_versioning_trigger(&mut self, table: &Table) -> Result<(), Error> {
        self.record(
            "update_versioning_trigger",
            format!("{}.{}", table.grain, table.name),
        )?;
        self.current.require_relation(&table.grain, &table.name)?;
        let k = key(&table.grain, &table.name);
        if table.versioned {
            self.current.versioning_triggers.insert(k);
        } else {
            self.current.versioning_triggers.remove(&k);
        }
        Ok(())
    }

    fn select_grain_statuses(
        &mut self,
        tables: &StatusTables,
    ) -> Result<Vec<GrainStatusRow>, Error> {
        self.current.require_relation(&tables.schema, &tables.grains)?;
        Ok(self.current.grain_statuses.values().cloned().collect())
    }

    fn get_grain_status(
        &mut self,
        tables: &StatusTables,
        grain_id: &str,
    ) -> Result<Option<GrainStatusRow>, Error> {
        self.current.require_relation(&tables.schema, &tables.grains)?;
        Ok(self.current.grain_statuses.get(grain_id).cloned())
    }

    fn insert_grain_status(
        &mut self,
        tables: &StatusTables,
        row: &GrainStatusRow,
    ) -> Result<(), Error> {
        self.record("insert_grain_status", row.id.clone())?;
        self.current.require_relation(&tables.schema, &tables.grains)?;
        if self.current.grain_statuses.contains_key(&row.id) {
            return Err(Error::database(format!(
                "duplicate key in {}.{}: {}",
                tables.schema, tables.grains, row.id
            )));
        }
        self.current
            .grain_statuses
            .insert(row.id.clone(), row.clone());
        Ok(())
    }

    fn update_grain_status(
        &mut self,
        tables: &StatusTables,
        row: &GrainStatusRow,
    ) -> Result<(), Error> {
        self.record("update_grain_status", row.id.clone())?;
        self.current.require_relation(&tables.schema, &tables.grains)?;
        let slot = self.current.grain_statuses.get_mut(&row.id).ok_or_else(|| {
            Error::database(format!(
                "no row in {}.{} for {}",
                tables.schema, tables.grains, row.id
            ))
        })?;
        *slot = row.clone();
        Ok(())
    }

    fn get_element_status(
        &mut self,
        tables: &StatusTables,
        grain_id: &str,
        element_id: &str,
    ) -> Result<Option<ElementStatusRow>, Error> {
        self.current
            .require_relation(&tables.schema, &tables.elements)?;
        Ok(self
            .current
            .element_statuses
            .get(&key(grain_id, element_id))
            .cloned())
    }

    fn insert_element_status(
        &mut self,
        tables: &StatusTables,
        row: &ElementStatusRow,
    ) -> Result<(), Error> {
        self.record(
            "insert_element_status",
            format!("{}.{}", row.grain_id, row.id),
        )?;
        self.current
            .require_relation(&tables.schema, &tables.elements)?;
        let k = key(&row.grain_id, &row.id);
        if self.current.element_statuses.contains_key(&k) {
            return Err(Error::database(format!(
                "duplicate key in {}.{}: {}.{}",
                tables.schema, tables.elements, row.grain_id, row.id
            )));
        }
        self.current.element_statuses.insert(k, row.clone());
        Ok(())
    }

    fn update_element_status(
        &mut self,
        tables: &StatusTables,
        row: &ElementStatusRow,
    ) -> Result<(), Error> {
        self.record(
            "update_element_status",
            format!("{}.{}", row.grain_id, row.id),
        )?;
        self.current
            .require_relation(&tables.schema, &tables.elements)?;
        let slot = self
            .current
            .element_statuses
            .get_mut(&key(&row.grain_id, &row.id))
            .ok_or_else(|| {
                Error::database(format!(
                    "no row in {}.{} for {}.{}",
                    tables.schema, tables.elements, row.grain_id, row.id
                ))
            })?;
        *slot = row.clone();
        Ok(())
    }

    fn select_registry(
        &mut self,
        tables: &StatusTables,
        grain_id: &str,
    ) -> Result<Vec<RegistryRow>, Error> {
        self.current
            .require_relation(&tables.schema, &tables.registry)?;
        Ok(self
            .current
            .registry
            .values()
            .filter(|r| r.grain_id == grain_id)
            .cloned()
            .collect())
    }

    fn upsert_registry(&mut self, tables: &StatusTables, row: &RegistryRow) -> Result<(), Error> {
        self.record("upsert_registry", format!("{}.{}", row.grain_id, row.name))?;
        self.current
            .require_relation(&tables.schema, &tables.registry)?;
        self.current
            .registry
            .insert(key(&row.grain_id, &row.name), row.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{ColumnType, FkRule};

    fn customers() -> Table {
        Table::new("crm", "customers")
            .with_column(Column::new("id", ColumnType::Integer).not_null())
            .with_column(Column::new("name", ColumnType::String { length: Some(50) }))
            .with_primary_key(["id"])
    }

    fn orders() -> Table {
        Table::new("crm", "orders")
            .with_column(Column::new("id", ColumnType::Integer).not_null())
            .with_column(Column::new("customer", ColumnType::Integer))
            .with_primary_key(["id"])
            .with_foreign_key(ForeignKey::new("fk_orders_customer", ["customer"], "crm", "customers"))
    }

    fn adapter_with_tables() -> MemoryAdapter {
        let mut db = MemoryAdapter::new();
        db.create_schema_if_not_exists("crm").unwrap();
        db.create_table(&customers()).unwrap();
        db.create_table(&orders()).unwrap();
        db.commit().unwrap();
        db
    }

    #[test]
    fn test_rollback_discards_uncommitted() {
        let mut db = adapter_with_tables();
        db.drop_table("crm", "orders").unwrap();
        assert!(!db.table_exists("crm", "orders").unwrap());

        db.rollback().unwrap();
        assert!(db.table_exists("crm", "orders").unwrap());
        assert!(db.was_called("drop_table", "crm.orders"));
    }

    #[test]
    fn test_create_table_requires_schema() {
        let mut db = MemoryAdapter::new();
        assert!(matches!(db.create_table(&customers()), Err(Error::Database(_))));
    }

    #[test]
    fn test_versioned_table_gets_recversion() {
        let mut db = MemoryAdapter::new();
        db.create_schema_if_not_exists("crm").unwrap();
        db.create_table(&customers().versioned()).unwrap();
        let live = db.table("crm", "customers").unwrap();
        assert!(live.column("recversion").is_some());
    }

    #[test]
    fn test_drop_pk_refused_while_referenced() {
        let mut db = adapter_with_tables();
        db.create_fk(&orders(), &orders().foreign_keys[0]).unwrap();

        let err = db.drop_pk(&customers(), "pk_crm_customers").unwrap_err();
        assert!(err.to_string().contains("fk_orders_customer"));

        db.drop_fk("crm", "orders", "fk_orders_customer").unwrap();
        db.drop_pk(&customers(), "pk_crm_customers").unwrap();
        assert!(db.get_pk_info(&customers()).unwrap().is_empty());
    }

    #[test]
    fn test_fk_requires_target_pk() {
        let mut db = adapter_with_tables();
        db.drop_pk(&customers(), "pk_crm_customers").unwrap();
        assert!(db.create_fk(&orders(), &orders().foreign_keys[0]).is_err());
    }

    #[test]
    fn test_fk_info_by_grain() {
        let mut db = adapter_with_tables();
        let fk = orders().foreign_keys[0].clone().on_delete(FkRule::Cascade);
        db.create_fk(&orders(), &fk).unwrap();

        let fks = db.get_fk_info("crm").unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].table_name, "orders");
        assert!(fks[0].reflects(&fk));
        assert!(db.get_fk_info("other").unwrap().is_empty());
    }

    #[test]
    fn test_update_column_refused_on_pk_and_index() {
        let mut db = adapter_with_tables();
        let id = Column::new("id", ColumnType::Floating).not_null();
        let live = db.get_column_info(&customers(), "id").unwrap().unwrap();
        assert!(db.update_column(&customers(), &id, &live).is_err());

        let index = Index::new("crm", "ix_name", "customers", ["name"]);
        db.create_index(&index).unwrap();
        let name = Column::new("name", ColumnType::String { length: Some(80) });
        let live = db.get_column_info(&customers(), "name").unwrap().unwrap();
        assert!(db.update_column(&customers(), &name, &live).is_err());

        let info = db.get_indices("crm").unwrap().remove("ix_name").unwrap();
        db.drop_index("crm", &info).unwrap();
        db.update_column(&customers(), &name, &live).unwrap();
        let live = db.get_column_info(&customers(), "name").unwrap().unwrap();
        assert!(live.reflects(&name));
    }

    #[test]
    fn test_failure_injection() {
        let mut db = adapter_with_tables();
        let failures = db.failure_injector();
        failures.fail_once("create_index", "crm.ix_name");

        let index = Index::new("crm", "ix_name", "customers", ["name"]);
        assert!(db.create_index(&index).is_err());
        db.create_index(&index).unwrap();

        failures.fail_on("commit", "*");
        assert!(db.commit().is_err());
        assert!(db.commit().is_err());
        failures.clear();
        db.commit().unwrap();
    }

    #[test]
    fn test_materialized_view_triggers_carry_marker() {
        let mut db = adapter_with_tables();
        let mv = MaterializedView::new("crm", "order_counts", "orders")
            .group_by("customer")
            .count("cnt");
        db.create_materialized_view_table(&mv, &orders()).unwrap();
        db.create_materialized_view_triggers(&mv, &orders()).unwrap();

        let query = TriggerQuery::new()
            .with_schema("crm")
            .with_table_name("orders")
            .with_name(mv.trigger_name(TriggerType::PostInsert));
        let body = db.get_trigger_body(&query).unwrap().unwrap();
        assert!(body.contains(&mv.checksum_marker()));

        db.drop_materialized_view_triggers(&mv).unwrap();
        assert!(db.get_trigger_body(&query).unwrap().is_none());
        assert!(db.table("crm", "order_counts").unwrap().column(SURROGATE_COUNT).is_some());
    }

    #[test]
    fn test_journal_classifies_ddl() {
        let mut db = adapter_with_tables();
        db.clear_journal();
        db.create_view(&View::new("crm", "v", "select 1")).unwrap();
        db.commit().unwrap();

        assert_eq!(db.calls().len(), 2);
        let ddl = db.ddl_calls();
        assert_eq!(ddl.len(), 1);
        assert_eq!(ddl[0].op, "create_view");
    }

    #[test]
    fn test_status_rows_require_store() {
        let mut db = MemoryAdapter::new();
        let tables = crate::config::MigratorConfig::default().status_tables();
        assert!(db.select_grain_statuses(&tables).is_err());
    }
}
