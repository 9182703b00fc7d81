//! Sequences, indices and views.

use super::element::{checksum_to_hex, ElementRef, Fingerprint};
use serde::{Deserialize, Serialize};

/// A sequence declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// Owning grain.
    #[serde(default)]
    pub grain: String,
    /// Sequence name.
    pub name: String,
    /// First value.
    #[serde(default = "one")]
    pub start_with: i64,
    /// Step.
    #[serde(default = "one")]
    pub increment_by: i64,
    /// Lower bound.
    #[serde(default = "one")]
    pub min_value: i64,
    /// Upper bound.
    #[serde(default = "max_value")]
    pub max_value: i64,
    /// Whether the sequence wraps around at the bound.
    #[serde(default)]
    pub cycle: bool,
    /// Fingerprint of the declaration.
    #[serde(default)]
    pub fingerprint: Fingerprint,
}

fn one() -> i64 {
    1
}

fn max_value() -> i64 {
    i64::MAX
}

impl Sequence {
    /// Create a sequence with default bounds.
    pub fn new(grain: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            grain: grain.into(),
            name: name.into(),
            start_with: 1,
            increment_by: 1,
            min_value: 1,
            max_value: i64::MAX,
            cycle: false,
            fingerprint: Fingerprint::default(),
        }
    }

    /// Set the start value.
    pub fn start_with(mut self, value: i64) -> Self {
        self.start_with = value;
        self
    }

    /// Set the increment.
    pub fn increment_by(mut self, value: i64) -> Self {
        self.increment_by = value;
        self
    }

    /// Set min/max bounds.
    pub fn bounds(mut self, min: i64, max: i64) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    /// Make the sequence cycle.
    pub fn cycling(mut self) -> Self {
        self.cycle = true;
        self
    }
}

/// An index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Owning grain.
    #[serde(default)]
    pub grain: String,
    /// Index name, unique within the grain.
    pub name: String,
    /// Indexed table (same grain).
    pub table: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
    /// Fingerprint of the declaration.
    #[serde(default)]
    pub fingerprint: Fingerprint,
}

impl Index {
    /// Create an index.
    pub fn new(
        grain: impl Into<String>,
        name: impl Into<String>,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            grain: grain.into(),
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            fingerprint: Fingerprint::default(),
        }
    }
}

/// A view declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    /// Owning grain.
    #[serde(default)]
    pub grain: String,
    /// View name.
    pub name: String,
    /// Query text of the view.
    pub query: String,
    /// Elements read by the query.
    #[serde(default)]
    pub references: Vec<ElementRef>,
    /// Fingerprint of the declaration.
    #[serde(default)]
    pub fingerprint: Fingerprint,
}

impl View {
    /// Create a view.
    pub fn new(grain: impl Into<String>, name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            grain: grain.into(),
            name: name.into(),
            query: query.into(),
            references: Vec::new(),
            fingerprint: Fingerprint::default(),
        }
    }

    /// Add a reference to an element read by the query.
    pub fn reading(mut self, reference: ElementRef) -> Self {
        self.references.push(reference);
        self
    }
}

/// A parameter of a parameterized view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// SQL type name of the parameter.
    pub sql_type: String,
}

/// A parameterized view declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterizedView {
    /// Owning grain.
    #[serde(default)]
    pub grain: String,
    /// Function name.
    pub name: String,
    /// Parameters in declaration order.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Query text of the function body.
    pub query: String,
    /// Elements read by the query.
    #[serde(default)]
    pub references: Vec<ElementRef>,
    /// Fingerprint of the declaration.
    #[serde(default)]
    pub fingerprint: Fingerprint,
}

impl ParameterizedView {
    /// Create a parameterized view.
    pub fn new(grain: impl Into<String>, name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            grain: grain.into(),
            name: name.into(),
            parameters: Vec::new(),
            query: query.into(),
            references: Vec::new(),
            fingerprint: Fingerprint::default(),
        }
    }

    /// Add a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            sql_type: sql_type.into(),
        });
        self
    }

    /// Add a reference to an element read by the query.
    pub fn reading(mut self, reference: ElementRef) -> Self {
        self.references.push(reference);
        self
    }
}

/// Aggregate function of a materialized view column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    /// `SUM(column)`.
    Sum,
    /// `COUNT(*)`.
    Count,
}

/// An aggregate column of a materialized view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateColumn {
    /// Column name in the materialized table.
    pub name: String,
    /// Aggregate function.
    pub aggregate: Aggregate,
    /// Source column (ignored for `COUNT`).
    #[serde(default)]
    pub source_column: Option<String>,
}

/// Trigger events maintained on the source table of a materialized view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerType {
    /// After insert.
    PostInsert,
    /// After update.
    PostUpdate,
    /// After delete.
    PostDelete,
}

impl TriggerType {
    /// All trigger events, in installation order.
    pub const ALL: [TriggerType; 3] = [
        TriggerType::PostInsert,
        TriggerType::PostUpdate,
        TriggerType::PostDelete,
    ];

    fn suffix(&self) -> &'static str {
        match self {
            TriggerType::PostInsert => "insert",
            TriggerType::PostUpdate => "update",
            TriggerType::PostDelete => "delete",
        }
    }
}

/// A materialized view declaration: an aggregation over a source table,
/// stored in its own table and maintained by triggers on the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedView {
    /// Owning grain.
    #[serde(default)]
    pub grain: String,
    /// Name of the materialized table.
    pub name: String,
    /// Source table (same grain).
    pub source_table: String,
    /// Group-by columns, which form the key of the materialized table.
    pub group_by: Vec<String>,
    /// Aggregate columns.
    pub aggregates: Vec<AggregateColumn>,
    /// Fingerprint of the declaration.
    #[serde(default)]
    pub fingerprint: Fingerprint,
}

impl MaterializedView {
    /// Create a materialized view.
    pub fn new(
        grain: impl Into<String>,
        name: impl Into<String>,
        source_table: impl Into<String>,
    ) -> Self {
        Self {
            grain: grain.into(),
            name: name.into(),
            source_table: source_table.into(),
            group_by: Vec::new(),
            aggregates: Vec::new(),
            fingerprint: Fingerprint::default(),
        }
    }

    /// Add a group-by column.
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Add a `SUM(source)` column.
    pub fn sum(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.aggregates.push(AggregateColumn {
            name: name.into(),
            aggregate: Aggregate::Sum,
            source_column: Some(source.into()),
        });
        self
    }

    /// Add a `COUNT(*)` column.
    pub fn count(mut self, name: impl Into<String>) -> Self {
        self.aggregates.push(AggregateColumn {
            name: name.into(),
            aggregate: Aggregate::Count,
            source_column: None,
        });
        self
    }

    /// Set the fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Name of the trigger maintaining this view for `trigger` events.
    pub fn trigger_name(&self, trigger: TriggerType) -> String {
        format!("mv_{}_{}_{}", self.grain, self.name, trigger.suffix())
    }

    /// Marker embedded in the insert trigger body, identifying the
    /// declaration the trigger was generated from.
    pub fn checksum_marker(&self) -> String {
        format!(
            "/*grainsync checksum={}*/",
            checksum_to_hex(self.fingerprint.checksum)
        )
    }
}
