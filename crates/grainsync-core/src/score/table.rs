//! Table declarations: columns, keys and table options.

use super::element::{ElementRef, Fingerprint};
use serde::{Deserialize, Serialize};

/// Name of the optimistic-concurrency counter column of versioned tables.
pub const REC_VERSION: &str = "recversion";

/// Column data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    /// 32-bit integer.
    Integer,
    /// Double precision floating point.
    Floating,
    /// Fixed-point decimal.
    Decimal {
        /// Total number of digits.
        precision: u32,
        /// Digits after the decimal point.
        scale: u32,
    },
    /// Boolean.
    Boolean,
    /// Variable-length string. `None` means unbounded (`MAX`).
    String {
        /// Maximum length in characters.
        length: Option<u32>,
    },
    /// Binary large object.
    Binary,
    /// Timestamp without time zone.
    DateTime,
    /// Timestamp with time zone.
    DateTimeWithTimeZone,
}

/// Column default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    /// Literal value, as written in the declaration.
    Literal(String),
    /// `NEXTVAL` of a sequence in the same grain.
    Sequence(String),
    /// Current timestamp at insert time (`GETDATE()`).
    CurrentTimestamp,
}

/// A column declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name (unique within the table).
    pub name: String,
    /// Column data type.
    pub column_type: ColumnType,
    /// Whether the column accepts NULL.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Default value.
    #[serde(default)]
    pub default: Option<ColumnDefault>,
}

fn default_true() -> bool {
    true
}

impl Column {
    /// Create a nullable column without default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    /// Make the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set a default.
    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// The sequence feeding this column's default, if any.
    pub fn sequence(&self) -> Option<&str> {
        match &self.default {
            Some(ColumnDefault::Sequence(name)) => Some(name),
            _ => None,
        }
    }
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FkRule {
    /// Reject the change.
    #[default]
    NoAction,
    /// Propagate the change.
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
}

/// A foreign key declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name, unique within the grain.
    pub constraint_name: String,
    /// Referencing columns on the owning table.
    pub columns: Vec<String>,
    /// Grain of the referenced table.
    pub ref_grain: String,
    /// Referenced table.
    pub ref_table: String,
    /// Referenced columns (the referenced table's primary key).
    #[serde(default)]
    pub ref_columns: Vec<String>,
    /// Action on update of the referenced key.
    #[serde(default)]
    pub update_rule: FkRule,
    /// Action on delete of the referenced row.
    #[serde(default)]
    pub delete_rule: FkRule,
}

impl ForeignKey {
    /// Create a foreign key with `NO ACTION` rules.
    pub fn new(
        constraint_name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
        ref_grain: impl Into<String>,
        ref_table: impl Into<String>,
    ) -> Self {
        Self {
            constraint_name: constraint_name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            ref_grain: ref_grain.into(),
            ref_table: ref_table.into(),
            ref_columns: Vec::new(),
            update_rule: FkRule::NoAction,
            delete_rule: FkRule::NoAction,
        }
    }

    /// Set the referenced columns.
    pub fn with_ref_columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ref_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the delete rule.
    pub fn on_delete(mut self, rule: FkRule) -> Self {
        self.delete_rule = rule;
        self
    }

    /// Set the update rule.
    pub fn on_update(mut self, rule: FkRule) -> Self {
        self.update_rule = rule;
        self
    }

    /// Reference to the table this key points at.
    pub fn target(&self) -> ElementRef {
        ElementRef::table(&self.ref_grain, &self.ref_table)
    }
}

/// A table declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Owning grain.
    #[serde(default)]
    pub grain: String,
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Primary key columns in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Foreign keys.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// `false` when the table is declared `WITH NO AUTOUPDATE`.
    #[serde(default = "default_true")]
    pub auto_update: bool,
    /// Whether the table carries the `recversion` counter column.
    #[serde(default)]
    pub versioned: bool,
    /// Fingerprint of the declaration.
    #[serde(default)]
    pub fingerprint: Fingerprint,
}

impl Table {
    /// Create an empty table.
    pub fn new(grain: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            grain: grain.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            auto_update: true,
            versioned: false,
            fingerprint: Fingerprint::default(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key.
    pub fn with_primary_key(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a foreign key.
    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Opt out of automatic DDL management.
    pub fn without_auto_update(mut self) -> Self {
        self.auto_update = false;
        self
    }

    /// Mark the table as versioned.
    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    /// Set the fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `column` is part of the primary key.
    pub fn is_pk_column(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    /// Name of the primary key constraint.
    pub fn pk_constraint_name(&self) -> String {
        format!("pk_{}_{}", self.grain, self.name)
    }

    /// The counter column of versioned tables.
    pub fn rec_version_column(&self) -> Column {
        Column::new(REC_VERSION, ColumnType::Integer)
            .not_null()
            .with_default(ColumnDefault::Literal("1".to_string()))
    }

    /// Outgoing references: referenced tables and sequences used by defaults.
    pub fn references(&self) -> Vec<ElementRef> {
        let mut refs: Vec<ElementRef> = Vec::new();
        for column in &self.columns {
            if let Some(seq) = column.sequence() {
                let r = ElementRef::sequence(&self.grain, seq);
                if !refs.contains(&r) {
                    refs.push(r);
                }
            }
        }
        for fk in &self.foreign_keys {
            let r = fk.target();
            // A self-referencing key is not a dependency.
            if r.grain == self.grain && r.name == self.name {
                continue;
            }
            if !refs.contains(&r) {
                refs.push(r);
            }
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Table {
        Table::new("shop", "orders")
            .with_column(
                Column::new("id", ColumnType::Integer)
                    .not_null()
                    .with_default(ColumnDefault::Sequence("orders_seq".into())),
            )
            .with_column(Column::new("customer", ColumnType::Integer).not_null())
            .with_column(Column::new("parent", ColumnType::Integer))
            .with_primary_key(["id"])
            .with_foreign_key(ForeignKey::new("fk_orders_customer", ["customer"], "crm", "customers"))
            .with_foreign_key(ForeignKey::new("fk_orders_parent", ["parent"], "shop", "orders"))
    }

    #[test]
    fn test_table_references() {
        let refs = orders().references();
        assert_eq!(
            refs,
            vec![
                ElementRef::sequence("shop", "orders_seq"),
                ElementRef::table("crm", "customers"),
            ]
        );
    }

    #[test]
    fn test_primary_key_helpers() {
        let t = orders();
        assert!(t.is_pk_column("id"));
        assert!(!t.is_pk_column("customer"));
        assert_eq!(t.pk_constraint_name(), "pk_shop_orders");
        assert!(t.column("parent").unwrap().nullable);
    }

    #[test]
    fn test_rec_version_column() {
        let col = Table::new("g", "t").versioned().rec_version_column();
        assert_eq!(col.name, REC_VERSION);
        assert!(!col.nullable);
        assert_eq!(col.default, Some(ColumnDefault::Literal("1".into())));
    }
}
