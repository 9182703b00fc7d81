//! Grainsync Core - schema model, status store and migration engine.
//!
//! This crate reconciles a relational database with a declarative schema
//! model made of versioned grains.

pub mod adapter;
pub mod config;
pub mod error;
pub mod migration;
pub mod score;
pub mod status;

pub use adapter::{AdapterCall, DbAdapter, FailureInjector, MemoryAdapter};
pub use config::{MigratorConfig, StatusTables};
pub use error::Error;
pub use migration::{
    system_grain, DbUpdater, DependencyOrderer, ElementFailure, GrainFailure, GrainHook,
    MigrationError, MigrationReport, RegistryHook, StatusStore,
};
pub use score::{
    Column, ColumnType, Element, ElementKind, ElementRef, Fingerprint, ForeignKey, Grain, Index,
    MaterializedView, ParameterizedView, Score, Sequence, Table, VersionOrdering, VersionString,
    View,
};
pub use status::{ElementState, GrainInfo, GrainState, RegistryKind, RegistryRow};
