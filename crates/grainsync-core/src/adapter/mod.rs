//! Database adapter boundary.
//!
//! The migrator never speaks SQL. Every introspection, DDL statement and
//! status-row write goes through [`DbAdapter`], one logical session with
//! explicit transaction boundaries.

mod memory;
mod meta;

pub use memory::{AdapterCall, FailureInjector, LiveTable, MemoryAdapter};
pub use meta::{DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo, TriggerQuery};

use crate::config::StatusTables;
use crate::error::Error;
use crate::score::{
    Column, ForeignKey, Index, MaterializedView, ParameterizedView, Sequence, Table, View,
};
use crate::status::{ElementStatusRow, GrainStatusRow, RegistryRow};
use std::collections::{BTreeMap, BTreeSet};

/// Dialect-specific access to the target database.
///
/// Implementations hold a single connection. Statements issued between two
/// calls to [`commit`](DbAdapter::commit) or [`rollback`](DbAdapter::rollback)
/// form one transaction.
pub trait DbAdapter {
    // Transactions

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<(), Error>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<(), Error>;

    // Schemas

    /// Whether a schema exists.
    fn schema_exists(&mut self, schema: &str) -> Result<bool, Error>;

    /// Create a schema unless it exists.
    fn create_schema_if_not_exists(&mut self, schema: &str) -> Result<(), Error>;

    /// Whether any table exists in the database.
    fn user_tables_exist(&mut self) -> Result<bool, Error>;

    /// Create dialect-specific helper objects of the system schema.
    fn create_sys_objects(&mut self) -> Result<(), Error>;

    // Tables

    /// Whether `schema.table` exists.
    fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, Error>;

    /// Create a table with its columns and primary key. Foreign keys are
    /// created separately.
    fn create_table(&mut self, table: &Table) -> Result<(), Error>;

    /// Drop `schema.table`.
    fn drop_table(&mut self, schema: &str, table: &str) -> Result<(), Error>;

    /// Names of the live columns of a table.
    fn get_columns(&mut self, table: &Table) -> Result<BTreeSet<String>, Error>;

    /// Live shape of one column, `None` if absent.
    fn get_column_info(
        &mut self,
        table: &Table,
        column: &str,
    ) -> Result<Option<DbColumnInfo>, Error>;

    /// Add a column.
    fn create_column(&mut self, table: &Table, column: &Column) -> Result<(), Error>;

    /// Alter a column so it matches its declaration.
    fn update_column(
        &mut self,
        table: &Table,
        column: &Column,
        live: &DbColumnInfo,
    ) -> Result<(), Error>;

    // Keys

    /// Live primary key of a table.
    fn get_pk_info(&mut self, table: &Table) -> Result<DbPkInfo, Error>;

    /// Create the declared primary key.
    fn create_pk(&mut self, table: &Table) -> Result<(), Error>;

    /// Drop the primary key named `pk_name`.
    fn drop_pk(&mut self, table: &Table, pk_name: &str) -> Result<(), Error>;

    /// Live foreign keys owned by tables of a grain.
    fn get_fk_info(&mut self, grain: &str) -> Result<Vec<DbFkInfo>, Error>;

    /// Create a foreign key on `table`.
    fn create_fk(&mut self, table: &Table, fk: &ForeignKey) -> Result<(), Error>;

    /// Drop a foreign key of `schema.table`.
    fn drop_fk(&mut self, schema: &str, table: &str, fk_name: &str) -> Result<(), Error>;

    // Indices

    /// Live indices of a grain by name.
    fn get_indices(&mut self, grain: &str) -> Result<BTreeMap<String, DbIndexInfo>, Error>;

    /// Create an index.
    fn create_index(&mut self, index: &Index) -> Result<(), Error>;

    /// Drop an index of a grain.
    fn drop_index(&mut self, grain: &str, index: &DbIndexInfo) -> Result<(), Error>;

    // Sequences

    /// Whether `schema.name` is a live sequence.
    fn sequence_exists(&mut self, schema: &str, name: &str) -> Result<bool, Error>;

    /// Live parameters of a sequence.
    fn get_sequence_info(&mut self, sequence: &Sequence) -> Result<DbSequenceInfo, Error>;

    /// Create a sequence.
    fn create_sequence(&mut self, sequence: &Sequence) -> Result<(), Error>;

    /// Alter a sequence so it matches its declaration.
    fn alter_sequence(&mut self, sequence: &Sequence) -> Result<(), Error>;

    // Views

    /// Names of the live views of a grain.
    fn get_view_list(&mut self, grain: &str) -> Result<Vec<String>, Error>;

    /// Create a view.
    fn create_view(&mut self, view: &View) -> Result<(), Error>;

    /// Drop `schema.name`.
    fn drop_view(&mut self, schema: &str, name: &str) -> Result<(), Error>;

    /// Names of the live parameterized views of a grain.
    fn get_parameterized_view_list(&mut self, grain: &str) -> Result<Vec<String>, Error>;

    /// Create a parameterized view.
    fn create_parameterized_view(&mut self, view: &ParameterizedView) -> Result<(), Error>;

    /// Drop a parameterized view.
    fn drop_parameterized_view(&mut self, schema: &str, name: &str) -> Result<(), Error>;

    // Materialized views

    /// Create the table backing a materialized view.
    fn create_materialized_view_table(
        &mut self,
        view: &MaterializedView,
        source: &Table,
    ) -> Result<(), Error>;

    /// Fill a freshly created materialized view from its source.
    fn init_data_for_materialized_view(
        &mut self,
        view: &MaterializedView,
        source: &Table,
    ) -> Result<(), Error>;

    /// Body of a live trigger, `None` if absent.
    fn get_trigger_body(&mut self, query: &TriggerQuery) -> Result<Option<String>, Error>;

    /// Install the triggers maintaining a materialized view. The insert
    /// trigger embeds the view's checksum marker.
    fn create_materialized_view_triggers(
        &mut self,
        view: &MaterializedView,
        source: &Table,
    ) -> Result<(), Error>;

    /// Drop the triggers maintaining a materialized view, if present.
    fn drop_materialized_view_triggers(&mut self, view: &MaterializedView) -> Result<(), Error>;

    // Table helpers

    /// Reconcile auto-increment machinery of a modified table.
    fn manage_auto_increment(&mut self, table: &Table) -> Result<(), Error>;

    /// Install or remove the `recversion` trigger according to the table's
    /// versioned flag.
    fn update_versioning_trigger(&mut self, table: &Table) -> Result<(), Error>;

    // Status store

    /// All grain status rows.
    fn select_grain_statuses(
        &mut self,
        tables: &StatusTables,
    ) -> Result<Vec<GrainStatusRow>, Error>;

    /// One grain status row.
    fn get_grain_status(
        &mut self,
        tables: &StatusTables,
        grain_id: &str,
    ) -> Result<Option<GrainStatusRow>, Error>;

    /// Insert a grain status row. Fails if the row exists.
    fn insert_grain_status(&mut self, tables: &StatusTables, row: &GrainStatusRow)
        -> Result<(), Error>;

    /// Overwrite an existing grain status row.
    fn update_grain_status(&mut self, tables: &StatusTables, row: &GrainStatusRow)
        -> Result<(), Error>;

    /// One element status row.
    fn get_element_status(
        &mut self,
        tables: &StatusTables,
        grain_id: &str,
        element_id: &str,
    ) -> Result<Option<ElementStatusRow>, Error>;

    /// Insert an element status row. Fails if the row exists.
    fn insert_element_status(
        &mut self,
        tables: &StatusTables,
        row: &ElementStatusRow,
    ) -> Result<(), Error>;

    /// Overwrite an existing element status row.
    fn update_element_status(
        &mut self,
        tables: &StatusTables,
        row: &ElementStatusRow,
    ) -> Result<(), Error>;

    /// Registry rows of a grain.
    fn select_registry(
        &mut self,
        tables: &StatusTables,
        grain_id: &str,
    ) -> Result<Vec<RegistryRow>, Error>;

    /// Insert or overwrite a registry row keyed by grain and name.
    fn upsert_registry(&mut self, tables: &StatusTables, row: &RegistryRow) -> Result<(), Error>;
}
