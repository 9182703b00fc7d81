//! Migration-specific error types.

use crate::score::{ElementRef, VersionOrdering};
use thiserror::Error;

/// An element (or grain-level step) that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementFailure {
    /// Element name, or a pseudo-element such as `<prepare>`.
    pub element: String,
    /// Failure cause.
    pub message: String,
}

/// Failures of one grain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrainFailure {
    /// Grain name.
    pub grain: String,
    /// Failed elements, in the order they failed.
    pub failures: Vec<ElementFailure>,
}

impl GrainFailure {
    /// Names of the failed elements.
    pub fn element_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.element.as_str()).collect()
    }
}

fn describe(failures: &[GrainFailure]) -> String {
    failures
        .iter()
        .map(|g| format!("{} [{}]", g.grain, g.element_names().join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Migration errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The database holds a newer or diverged version of a grain.
    #[error("grain '{grain}': declared version {declared} is {ordering} than installed version {installed}")]
    FatalVersion {
        /// Grain name.
        grain: String,
        /// Version in the schema model.
        declared: String,
        /// Version recorded in the database.
        installed: String,
        /// Outcome of the comparison.
        ordering: VersionOrdering,
    },

    /// A grain was left in a state that blocks automatic upgrades.
    #[error("cannot start update: grain '{grain}' is in state {state}; fix it and set it to ready or recover")]
    FatalStatus {
        /// Grain name.
        grain: String,
        /// Offending state.
        state: crate::status::GrainState,
    },

    /// The status store is missing but the database already has tables.
    #[error("database is not empty and has no status store; set force_initialize to adopt it")]
    UnmanagedDatabase,

    /// The schema model does not declare the bootstrap grain.
    #[error("bootstrap grain '{0}' is not declared")]
    MissingBootstrapGrain(String),

    /// Elements reference each other in a loop.
    #[error("reference cycle: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    ReferenceCycle(Vec<ElementRef>),

    /// The schema model is inconsistent.
    #[error("schema model error: {0}")]
    Model(String),

    /// Applying one element failed.
    #[error("{element}: {message}")]
    ElementReconciliation {
        /// Failed element.
        element: ElementRef,
        /// Failure cause.
        message: String,
    },

    /// The run finished with failures.
    #[error("update finished with errors: {}", describe(.0))]
    Aggregate(Vec<GrainFailure>),

    /// Storage or adapter error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::ElementKind;

    #[test]
    fn test_cycle_display() {
        let err = MigrationError::ReferenceCycle(vec![
            ElementRef::new("g", "a", ElementKind::View),
            ElementRef::new("g", "b", ElementKind::View),
            ElementRef::new("g", "a", ElementKind::View),
        ]);
        assert_eq!(
            err.to_string(),
            "reference cycle: VIEW g.a -> VIEW g.b -> VIEW g.a"
        );
    }

    #[test]
    fn test_aggregate_display() {
        let err = MigrationError::Aggregate(vec![GrainFailure {
            grain: "shop".into(),
            failures: vec![
                ElementFailure {
                    element: "orders".into(),
                    message: "boom".into(),
                },
                ElementFailure {
                    element: "<prepare>".into(),
                    message: "boom".into(),
                },
            ],
        }]);
        assert!(err.to_string().contains("shop [orders, <prepare>]"));
    }

    #[test]
    fn test_fatal_version_display() {
        let err = MigrationError::FatalVersion {
            grain: "g".into(),
            declared: "1.00".into(),
            installed: "1.01".into(),
            ordering: VersionOrdering::Lower,
        };
        assert!(err.to_string().contains("1.01"));
    }
}
