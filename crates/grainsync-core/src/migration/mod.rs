//! Migration engine.
//!
//! Brings a live database in line with a [`Score`](crate::score::Score):
//! - Version-guarded grain selection (downgrades and diverged versions abort)
//! - Dependency ordering of elements across grains
//! - Per-grain pre-pass dropping views and stale keys and indices
//! - Per-element reconciliation, each element in its own transaction
//! - Status tracking in the database itself, so failed runs can be resumed
//!
//! # Grain states
//!
//! | State | Meaning | Next run |
//! |-------|---------|----------|
//! | **READY** | Matches the recorded version | Upgraded when the model changed |
//! | **UPGRADING** | A run is in progress, or crashed | Aborts |
//! | **ERROR** | Some element failed | Aborts until fixed by an operator |
//! | **RECOVER** | New, or released by an operator | Always upgraded |
//! | **LOCK** | Managed by hand | Never touched |
//!
//! # Example
//!
//! ```ignore
//! use grainsync_core::{DbUpdater, MemoryAdapter, MigratorConfig, Score};
//!
//! let config = MigratorConfig::default();
//! let score = Score::from_json_file("score.json")?;
//! let mut updater = DbUpdater::new(MemoryAdapter::new(), &score, config);
//!
//! let report = updater.update_all()?;
//! println!("upgraded: {:?}", report.upgraded_grains);
//! ```

pub mod error;
pub mod hooks;
pub mod ordering;
pub mod prepare;
pub mod reconcile;
pub mod store;
pub mod updater;

// Re-export main types

pub use error::{ElementFailure, GrainFailure, MigrationError};
pub use hooks::{GrainHook, RegistryHook};
pub use ordering::DependencyOrderer;
pub use prepare::prepare_grain;
pub use reconcile::{reconcile, Outcome, ReconcileContext};
pub use store::{system_grain, StatusStore};
pub use updater::{needs_upgrade, DbUpdater, MigrationReport};
