//! Schema model ("score") consumed by the migrator.
//!
//! The score is produced by an external parser, or deserialized from JSON,
//! and is read-only for the rest of the crate.

mod element;
mod grain;
mod objects;
mod score;
mod table;
mod version;

pub use element::{checksum_from_hex, checksum_to_hex, Element, ElementKind, ElementRef, Fingerprint};
pub use grain::Grain;
pub use objects::{
    Aggregate, AggregateColumn, Index, MaterializedView, Parameter, ParameterizedView, Sequence,
    TriggerType, View,
};
pub use score::Score;
pub use table::{Column, ColumnDefault, ColumnType, FkRule, ForeignKey, Table, REC_VERSION};
pub use version::{VersionOrdering, VersionString};
