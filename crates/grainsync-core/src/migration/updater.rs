//! Migration orchestrator.
//!
//! Drives one run: bootstrap the status store if needed, decide which
//! grains to upgrade, prepare them, then apply every element of the
//! selected grains in dependency order, one transaction per element.

use super::error::{ElementFailure, GrainFailure, MigrationError};
use super::hooks::{GrainHook, RegistryHook};
use super::ordering::DependencyOrderer;
use super::prepare::prepare_grain;
use super::reconcile::{reconcile, Outcome, ReconcileContext};
use super::store::StatusStore;
use crate::adapter::DbAdapter;
use crate::config::MigratorConfig;
use crate::error::Error;
use crate::score::{checksum_to_hex, Element, ElementKind, ElementRef, Grain, Score, VersionOrdering};
use crate::status::{ElementState, GrainInfo, GrainState};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Summary of a run that finished without failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Grains brought to READY, in completion order.
    pub upgraded_grains: Vec<String>,
    /// Elements applied, in application order.
    pub applied_elements: Vec<ElementRef>,
    /// Materialized views found up to date and left alone.
    pub skipped_materialized_views: Vec<ElementRef>,
}

impl MigrationReport {
    /// Whether the run changed nothing.
    pub fn is_empty(&self) -> bool {
        self.upgraded_grains.is_empty()
            && self.applied_elements.is_empty()
            && self.skipped_materialized_views.is_empty()
    }

    fn absorb(&mut self, other: MigrationReport) {
        self.upgraded_grains.extend(other.upgraded_grains);
        self.applied_elements.extend(other.applied_elements);
        self.skipped_materialized_views
            .extend(other.skipped_materialized_views);
    }
}

/// Decide whether `grain` must be upgraded given its recorded status.
///
/// Unknown grains and grains in RECOVER are always upgraded, LOCKed grains
/// never. Otherwise the declared version must not be lower than, or
/// diverge from, the recorded one; an equal version is re-applied only
/// when the declaration's length or checksum changed.
pub fn needs_upgrade(grain: &Grain, info: Option<&GrainInfo>) -> Result<bool, MigrationError> {
    let Some(info) = info else {
        return Ok(true);
    };
    if info.lock {
        return Ok(false);
    }
    if info.recover {
        return Ok(true);
    }

    match grain.version.compare(&info.version) {
        ordering @ (VersionOrdering::Lower | VersionOrdering::Inconsistent) => {
            Err(MigrationError::FatalVersion {
                grain: grain.name.clone(),
                declared: grain.version.to_string(),
                installed: info.version.to_string(),
                ordering,
            })
        }
        VersionOrdering::Greater => Ok(true),
        VersionOrdering::Equal => {
            Ok(info.length != grain.length() || info.checksum != grain.checksum())
        }
    }
}

/// Message stored on a failed element row.
fn failure_message(grain: &Grain, cause: &str) -> String {
    format!(
        "{}/{}/{}: {}",
        grain.version,
        grain.length(),
        checksum_to_hex(grain.checksum()),
        cause
    )
}

type GrainFailures = HashMap<String, Vec<ElementFailure>>;

/// Brings a database in line with a score.
pub struct DbUpdater<'s, A: DbAdapter> {
    adapter: A,
    score: &'s Score,
    config: MigratorConfig,
    store: StatusStore,
    hooks: Vec<Box<dyn GrainHook>>,
}

impl<'s, A: DbAdapter> DbUpdater<'s, A> {
    /// Create an updater. The registry hook is installed by default.
    pub fn new(adapter: A, score: &'s Score, config: MigratorConfig) -> Self {
        let store = StatusStore::new(config.status_tables());
        Self {
            adapter,
            score,
            config,
            store,
            hooks: vec![Box::new(RegistryHook)],
        }
    }

    /// Add a completion hook, run after the ones already installed.
    pub fn with_hook(mut self, hook: impl GrainHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// The adapter.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// The adapter, mutably.
    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// Give the adapter back.
    pub fn into_adapter(self) -> A {
        self.adapter
    }

    /// The configuration.
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// The score.
    pub fn score(&self) -> &'s Score {
        self.score
    }

    /// Create the status store if the database has none, then apply the
    /// bootstrap grain.
    ///
    /// Returns `None` when the store was already installed.
    #[instrument(skip(self))]
    pub fn ensure_bootstrap(&mut self) -> Result<Option<MigrationReport>, MigrationError> {
        if self.store.is_installed(&mut self.adapter)? {
            return Ok(None);
        }

        let score = self.score;
        let system = score
            .grain(&self.config.system_schema)
            .ok_or_else(|| MigrationError::MissingBootstrapGrain(self.config.system_schema.clone()))?;

        if self.adapter.user_tables_exist()? {
            if !self.config.force_initialize {
                return Err(MigrationError::UnmanagedDatabase);
            }
            warn!("Initializing status store over a non-empty database");
        }

        info!(schema = %system.name, "Initializing status store");
        self.adapter.create_schema_if_not_exists(&system.name)?;
        for table in system.tables() {
            if !self.adapter.table_exists(&table.grain, &table.name)? {
                self.adapter.create_table(table)?;
            }
        }
        self.adapter.create_sys_objects()?;
        self.adapter.commit()?;
        self.store.insert_first_seen(&mut self.adapter, system)?;

        let (report, failures) = self.run(vec![system])?;
        if !failures.is_empty() {
            return Err(MigrationError::Aggregate(failures));
        }
        Ok(Some(report))
    }

    /// Upgrade every grain that needs it.
    ///
    /// Fatal conditions (version regressions, grains left in ERROR or
    /// UPGRADING, status store failures) abort the run. Element failures
    /// do not: the run continues, and they are returned together as
    /// [`MigrationError::Aggregate`] at the end.
    #[instrument(skip(self))]
    pub fn update_all(&mut self) -> Result<MigrationReport, MigrationError> {
        let started = Instant::now();
        let mut report = self.ensure_bootstrap()?.unwrap_or_default();

        let infos = self.store.load(&mut self.adapter)?;
        let score = self.score;

        let mut system = None;
        let mut selected = Vec::new();
        let mut first_seen = Vec::new();
        for grain in score.grains() {
            let info = infos.get(&grain.name);
            if !needs_upgrade(grain, info)? {
                debug!(grain = %grain.name, "Grain is up to date or locked");
                continue;
            }
            if info.is_none() {
                first_seen.push(grain);
            }
            if grain.name == self.config.system_schema {
                system = Some(grain);
            } else {
                selected.push(grain);
            }
        }

        for grain in first_seen {
            self.store.insert_first_seen(&mut self.adapter, grain)?;
        }

        let mut failures = Vec::new();
        if let Some(system) = system {
            let (sub, failed) = self.run(vec![system])?;
            report.absorb(sub);
            failures.extend(failed);
        }
        if !selected.is_empty() {
            let (sub, failed) = self.run(selected)?;
            report.absorb(sub);
            failures.extend(failed);
        }

        info!(
            upgraded = report.upgraded_grains.len(),
            applied = report.applied_elements.len(),
            failed_grains = failures.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Update completed"
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(MigrationError::Aggregate(failures))
        }
    }

    /// Apply `grains`. Element failures are collected, not returned.
    fn run(
        &mut self,
        grains: Vec<&'s Grain>,
    ) -> Result<(MigrationReport, Vec<GrainFailure>), MigrationError> {
        let score = self.score;
        let mut report = MigrationReport::default();
        let mut failures: GrainFailures = HashMap::new();

        let worklist: Vec<ElementRef> = grains
            .iter()
            .flat_map(|g| g.elements.iter().map(Element::to_ref))
            .collect();
        let order = DependencyOrderer::new(score).sort(worklist)?;

        let mut ctx = ReconcileContext::new(score);
        let mut active = Vec::with_capacity(grains.len());
        for &grain in &grains {
            match prepare_grain(&mut self.adapter, grain) {
                Ok(retained) => {
                    ctx.retained_fks.insert(grain.name.clone(), retained);
                    active.push(grain);
                }
                Err(e) => {
                    let cause = self.rollback_after(e);
                    warn!(grain = %grain.name, error = %cause, "Grain preparation failed");
                    failures.entry(grain.name.clone()).or_default().push(ElementFailure {
                        element: "<prepare>".to_string(),
                        message: cause,
                    });
                }
            }
        }

        let active_names: HashSet<&str> = active.iter().map(|g| g.name.as_str()).collect();
        let order: Vec<ElementRef> = order
            .into_iter()
            .filter(|e| active_names.contains(e.grain.as_str()))
            .collect();
        ctx.scheduled = order.iter().cloned().collect();

        let mut pending: HashMap<String, usize> = HashMap::new();
        for element in &order {
            *pending.entry(element.grain.clone()).or_default() += 1;
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut schemas_ensured: HashSet<String> = HashSet::new();
        for element_ref in &order {
            let grain = score
                .grain(&element_ref.grain)
                .ok_or_else(|| MigrationError::Model(format!("unknown grain {}", element_ref.grain)))?;
            let element = score
                .resolve(element_ref)
                .ok_or_else(|| MigrationError::Model(format!("unresolved reference to {}", element_ref)))?;

            if seen.insert(grain.name.clone()) {
                info!(grain = %grain.name, version = %grain.version, "Upgrading grain");
                self.store
                    .set_grain_state(&mut self.adapter, &grain.name, GrainState::Upgrading, "")?;
            }
            self.store
                .set_element_state(&mut self.adapter, element_ref, ElementState::Upgrading, "")?;

            let snapshot = ctx.retained_fks.clone();
            match self.apply(grain, element, &mut ctx, &schemas_ensured) {
                Ok(outcome) => {
                    self.store
                        .set_element_state(&mut self.adapter, element_ref, ElementState::Ready, "")?;
                    schemas_ensured.insert(grain.name.clone());
                    debug!(element = %element_ref, ?outcome, "Element applied");

                    match (element_ref.kind, outcome) {
                        (ElementKind::MaterializedView, Outcome::Unchanged) => {
                            report.skipped_materialized_views.push(element_ref.clone());
                        }
                        (ElementKind::Table, Outcome::Changed) => {
                            ctx.modified_tables.insert(element_ref.clone());
                            report.applied_elements.push(element_ref.clone());
                        }
                        _ => report.applied_elements.push(element_ref.clone()),
                    }
                }
                Err(e) => {
                    ctx.retained_fks = snapshot;
                    let cause = self.rollback_after(e);
                    let failure = MigrationError::ElementReconciliation {
                        element: element_ref.clone(),
                        message: cause.clone(),
                    };
                    error!(error = %failure, "Element update failed");
                    let message = failure_message(grain, &cause);
                    self.store.set_element_state(
                        &mut self.adapter,
                        element_ref,
                        ElementState::Error,
                        &message,
                    )?;
                    failures.entry(grain.name.clone()).or_default().push(ElementFailure {
                        element: element_ref.name.clone(),
                        message: cause,
                    });
                }
            }

            let left = pending.entry(grain.name.clone()).or_default();
            *left = left.saturating_sub(1);
            if *left == 0 && !failures.contains_key(&grain.name) {
                self.complete_grain(grain, &mut report, &mut failures)?;
            }
        }

        for &grain in &active {
            if !pending.contains_key(&grain.name) {
                self.complete_grain(grain, &mut report, &mut failures)?;
            }
        }

        let mut failed = Vec::new();
        for grain in &grains {
            let Some(list) = failures.remove(&grain.name) else {
                continue;
            };
            let names: Vec<&str> = list.iter().map(|f| f.element.as_str()).collect();
            let message = format!("failed elements: {}", names.join(", "));
            warn!(grain = %grain.name, %message, "Grain left in error");
            self.store
                .set_grain_state(&mut self.adapter, &grain.name, GrainState::Error, &message)?;
            failed.push(GrainFailure {
                grain: grain.name.clone(),
                failures: list,
            });
        }

        Ok((report, failed))
    }

    fn apply(
        &mut self,
        grain: &Grain,
        element: &Element,
        ctx: &mut ReconcileContext<'s>,
        schemas_ensured: &HashSet<String>,
    ) -> Result<Outcome, Error> {
        if !schemas_ensured.contains(&grain.name) {
            self.adapter.create_schema_if_not_exists(&grain.name)?;
        }
        reconcile(&mut self.adapter, ctx, element)
    }

    /// Run the completion hooks and mark the grain READY.
    fn complete_grain(
        &mut self,
        grain: &Grain,
        report: &mut MigrationReport,
        failures: &mut GrainFailures,
    ) -> Result<(), MigrationError> {
        let tables = self.store.tables().clone();
        for hook in &self.hooks {
            if let Err(e) = hook.on_grain_ready(&mut self.adapter, &tables, grain) {
                let cause = match self.adapter.rollback() {
                    Ok(()) => e.to_string(),
                    Err(rb) => format!("{}, rollback failed: {}", e, rb),
                };
                warn!(grain = %grain.name, hook = hook.name(), error = %cause, "Completion hook failed");
                failures.entry(grain.name.clone()).or_default().push(ElementFailure {
                    element: format!("<hook:{}>", hook.name()),
                    message: cause,
                });
                return Ok(());
            }
        }

        self.store.mark_grain_ready(&mut self.adapter, grain)?;
        info!(grain = %grain.name, version = %grain.version, "Grain upgraded");
        report.upgraded_grains.push(grain.name.clone());
        Ok(())
    }

    /// Roll back after a failure; the returned cause mentions a failed
    /// rollback too.
    fn rollback_after(&mut self, cause: Error) -> String {
        match self.adapter.rollback() {
            Ok(()) => cause.to_string(),
            Err(rb) => format!("{}, rollback failed: {}", cause, rb),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{Fingerprint, VersionString};

    fn grain(version: &str, checksum: u32) -> Grain {
        Grain::new("g", VersionString::parse(version).unwrap())
            .with_fingerprint(Fingerprint::new(100, checksum))
    }

    fn info(version: &str, checksum: u32) -> GrainInfo {
        GrainInfo {
            version: VersionString::parse(version).unwrap(),
            length: 100,
            checksum,
            recover: false,
            lock: false,
        }
    }

    #[test]
    fn test_new_grain_is_upgraded() {
        assert!(needs_upgrade(&grain("1.00", 1), None).unwrap());
    }

    #[test]
    fn test_equal_version_depends_on_fingerprint() {
        assert!(!needs_upgrade(&grain("1.00", 1), Some(&info("1.00", 1))).unwrap());
        assert!(needs_upgrade(&grain("1.00", 2), Some(&info("1.00", 1))).unwrap());

        let mut longer = info("1.00", 1);
        longer.length = 99;
        assert!(needs_upgrade(&grain("1.00", 1), Some(&longer)).unwrap());
    }

    #[test]
    fn test_greater_version_upgraded() {
        assert!(needs_upgrade(&grain("1.01", 1), Some(&info("1.00", 1))).unwrap());
    }

    #[test]
    fn test_lower_and_inconsistent_are_fatal() {
        let err = needs_upgrade(&grain("1.00", 1), Some(&info("1.01", 1))).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::FatalVersion {
                ordering: VersionOrdering::Lower,
                ..
            }
        ));

        let err = needs_upgrade(&grain("A1.02,B1.00", 1), Some(&info("A1.01,B1.01", 1))).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::FatalVersion {
                ordering: VersionOrdering::Inconsistent,
                ..
            }
        ));
    }

    #[test]
    fn test_lock_and_recover_override_versions() {
        let mut locked = info("2.00", 1);
        locked.lock = true;
        assert!(!needs_upgrade(&grain("1.00", 5), Some(&locked)).unwrap());

        let mut recover = info("1.00", 1);
        recover.recover = true;
        assert!(needs_upgrade(&grain("1.00", 1), Some(&recover)).unwrap());
    }

    #[test]
    fn test_failure_message_format() {
        let g = grain("1.02", 0xABCDEF);
        assert_eq!(failure_message(&g, "boom"), "1.02/100/00ABCDEF: boom");
    }

    #[test]
    fn test_report_absorb() {
        let mut report = MigrationReport::default();
        assert!(report.is_empty());
        report.absorb(MigrationReport {
            upgraded_grains: vec!["g".into()],
            ..Default::default()
        });
        assert_eq!(report.upgraded_grains, ["g"]);
    }
}
