//! Live metadata introspected from the database.
//!
//! Each type mirrors one declared construct and answers `reflects`: whether
//! the live object already matches its declaration.

use crate::score::{
    Column, ColumnDefault, ColumnType, FkRule, ForeignKey, Index, Sequence, Table,
};
use serde::{Deserialize, Serialize};

/// Live shape of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbColumnInfo {
    /// Column name.
    pub name: String,
    /// Column type as normalized by the adapter.
    pub column_type: ColumnType,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Default as normalized by the adapter.
    pub default: Option<ColumnDefault>,
}

impl DbColumnInfo {
    /// Live info matching a declaration exactly.
    pub fn from_column(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            column_type: column.column_type.clone(),
            nullable: column.nullable,
            default: column.default.clone(),
        }
    }

    /// Whether the live column matches the declared one.
    pub fn reflects(&self, column: &Column) -> bool {
        self.column_type == column.column_type
            && self.nullable == column.nullable
            && self.default == column.default
    }
}

/// Live primary key. An empty column list means the table has no key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DbPkInfo {
    /// Constraint name.
    pub name: String,
    /// Key columns in key order.
    pub columns: Vec<String>,
}

impl DbPkInfo {
    /// Whether the table has no primary key.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether the live key covers exactly the declared key columns, in order.
    pub fn reflects(&self, table: &Table) -> bool {
        self.columns == table.primary_key
    }
}

/// Live foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbFkInfo {
    /// Constraint name.
    pub name: String,
    /// Owning (referencing) table.
    pub table_name: String,
    /// Grain of the referenced table.
    pub ref_grain: String,
    /// Referenced table.
    pub ref_table: String,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Update rule.
    pub update_rule: FkRule,
    /// Delete rule.
    pub delete_rule: FkRule,
}

impl DbFkInfo {
    /// Live info matching a declaration exactly.
    pub fn from_foreign_key(table: &Table, fk: &ForeignKey) -> Self {
        Self {
            name: fk.constraint_name.clone(),
            table_name: table.name.clone(),
            ref_grain: fk.ref_grain.clone(),
            ref_table: fk.ref_table.clone(),
            columns: fk.columns.clone(),
            update_rule: fk.update_rule,
            delete_rule: fk.delete_rule,
        }
    }

    /// Whether the live key matches the declared one.
    pub fn reflects(&self, fk: &ForeignKey) -> bool {
        self.ref_grain == fk.ref_grain
            && self.ref_table == fk.ref_table
            && self.columns == fk.columns
            && self.update_rule == fk.update_rule
            && self.delete_rule == fk.delete_rule
    }

    /// Whether this key points at `grain.table`.
    pub fn references(&self, grain: &str, table: &str) -> bool {
        self.ref_grain == grain && self.ref_table == table
    }
}

/// Live index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbIndexInfo {
    /// Indexed table.
    pub table_name: String,
    /// Index name.
    pub index_name: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
}

impl DbIndexInfo {
    /// Live info matching a declaration exactly.
    pub fn from_index(index: &Index) -> Self {
        Self {
            table_name: index.table.clone(),
            index_name: index.name.clone(),
            columns: index.columns.clone(),
        }
    }

    /// Whether the live index matches the declared one.
    pub fn reflects(&self, index: &Index) -> bool {
        self.table_name == index.table && self.columns == index.columns
    }
}

/// Live sequence parameters. The start value is not compared: it cannot be
/// observed once the sequence has been used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSequenceInfo {
    /// Step.
    pub increment_by: i64,
    /// Lower bound.
    pub min_value: i64,
    /// Upper bound.
    pub max_value: i64,
    /// Wraps around.
    pub cycle: bool,
}

impl DbSequenceInfo {
    /// Live info matching a declaration exactly.
    pub fn from_sequence(sequence: &Sequence) -> Self {
        Self {
            increment_by: sequence.increment_by,
            min_value: sequence.min_value,
            max_value: sequence.max_value,
            cycle: sequence.cycle,
        }
    }

    /// Whether the live sequence matches the declared one.
    pub fn reflects(&self, sequence: &Sequence) -> bool {
        self.increment_by == sequence.increment_by
            && self.min_value == sequence.min_value
            && self.max_value == sequence.max_value
            && self.cycle == sequence.cycle
    }
}

/// Identifies a trigger: schema, table and trigger name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TriggerQuery {
    /// Schema of the table.
    pub schema: String,
    /// Table carrying the trigger.
    pub table_name: String,
    /// Trigger name.
    pub name: String,
}

impl TriggerQuery {
    /// Create an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Set the table.
    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    /// Set the trigger name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_reflects() {
        let declared = Column::new("title", ColumnType::String { length: Some(50) });
        let mut live = DbColumnInfo::from_column(&declared);
        assert!(live.reflects(&declared));

        live.column_type = ColumnType::String { length: Some(40) };
        assert!(!live.reflects(&declared));

        let live = DbColumnInfo::from_column(&declared.clone().not_null());
        assert!(!live.reflects(&declared));
    }

    #[test]
    fn test_pk_reflects() {
        let table = Table::new("g", "t").with_primary_key(["a", "b"]);
        let pk = DbPkInfo {
            name: "pk_g_t".into(),
            columns: vec!["a".into(), "b".into()],
        };
        assert!(pk.reflects(&table));
        assert!(!DbPkInfo::default().reflects(&table));
        assert!(DbPkInfo::default().is_empty());

        let reordered = DbPkInfo {
            name: "pk_g_t".into(),
            columns: vec!["b".into(), "a".into()],
        };
        assert!(!reordered.reflects(&table));
    }

    #[test]
    fn test_fk_reflects() {
        let table = Table::new("g", "orders");
        let fk = ForeignKey::new("fk1", ["customer"], "crm", "customers");
        let mut live = DbFkInfo::from_foreign_key(&table, &fk);
        assert!(live.reflects(&fk));
        assert!(live.references("crm", "customers"));

        live.delete_rule = FkRule::Cascade;
        assert!(!live.reflects(&fk));
    }

    #[test]
    fn test_index_and_sequence_reflect() {
        let index = Index::new("g", "ix", "t", ["a"]);
        let mut live = DbIndexInfo::from_index(&index);
        assert!(live.reflects(&index));
        live.columns.push("b".into());
        assert!(!live.reflects(&index));

        let seq = Sequence::new("g", "s").start_with(100);
        let live = DbSequenceInfo::from_sequence(&Sequence::new("g", "s"));
        assert!(live.reflects(&seq));
        assert!(!live.reflects(&seq.clone().increment_by(2)));
    }
}
