//! Element reconcilers: bring one live object in line with its declaration.

use crate::adapter::{DbAdapter, DbFkInfo, TriggerQuery};
use crate::error::Error;
use crate::score::{
    Element, ElementRef, Index, MaterializedView, Score, Sequence, Table, TriggerType,
    REC_VERSION,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// What a reconciler did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// DDL was issued.
    Changed,
    /// Only foreign keys were replaced; the table's structure is intact.
    KeysChanged,
    /// The live object already matched.
    Unchanged,
}

/// State shared by the reconcilers over one run.
#[derive(Debug)]
pub struct ReconcileContext<'s> {
    /// The schema model.
    pub score: &'s Score,
    /// Every element scheduled in this run.
    pub scheduled: HashSet<ElementRef>,
    /// Live foreign keys per grain, as kept by the pre-pass and updated
    /// as keys are dropped and created.
    pub retained_fks: HashMap<String, Vec<DbFkInfo>>,
    /// Tables whose structure changed in this run.
    pub modified_tables: HashSet<ElementRef>,
}

impl<'s> ReconcileContext<'s> {
    /// Create an empty context.
    pub fn new(score: &'s Score) -> Self {
        Self {
            score,
            scheduled: HashSet::new(),
            retained_fks: HashMap::new(),
            modified_tables: HashSet::new(),
        }
    }

    /// Live foreign keys of a grain, loaded from the database if the
    /// pre-pass did not run for it.
    fn fks_of<A: DbAdapter + ?Sized>(
        &mut self,
        adapter: &mut A,
        grain: &str,
    ) -> Result<&mut Vec<DbFkInfo>, Error> {
        if !self.retained_fks.contains_key(grain) {
            let live = adapter.get_fk_info(grain)?;
            self.retained_fks.insert(grain.to_string(), live);
        }
        self.retained_fks
            .get_mut(grain)
            .ok_or_else(|| Error::database(format!("foreign keys of {} not loaded", grain)))
    }
}

/// Apply one element.
pub fn reconcile<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    ctx: &mut ReconcileContext<'_>,
    element: &Element,
) -> Result<Outcome, Error> {
    match element {
        Element::Sequence(s) => reconcile_sequence(adapter, s),
        Element::Table(t) => reconcile_table(adapter, ctx, t),
        Element::Index(i) => reconcile_index(adapter, i),
        Element::View(v) => {
            adapter.create_view(v)?;
            Ok(Outcome::Changed)
        }
        Element::ParameterizedView(v) => {
            adapter.create_parameterized_view(v)?;
            Ok(Outcome::Changed)
        }
        Element::MaterializedView(v) => reconcile_materialized_view(adapter, ctx, v),
    }
}

fn reconcile_sequence<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    sequence: &Sequence,
) -> Result<Outcome, Error> {
    if !adapter.sequence_exists(&sequence.grain, &sequence.name)? {
        adapter.create_sequence(sequence)?;
        return Ok(Outcome::Changed);
    }
    let live = adapter.get_sequence_info(sequence)?;
    if live.reflects(sequence) {
        return Ok(Outcome::Unchanged);
    }
    adapter.alter_sequence(sequence)?;
    Ok(Outcome::Changed)
}

fn reconcile_index<A: DbAdapter + ?Sized>(adapter: &mut A, index: &Index) -> Result<Outcome, Error> {
    let live = adapter.get_indices(&index.grain)?;
    match live.get(&index.name) {
        Some(info) if info.reflects(index) => Ok(Outcome::Unchanged),
        Some(info) => {
            adapter.drop_index(&index.grain, info)?;
            adapter.create_index(index)?;
            Ok(Outcome::Changed)
        }
        None => {
            adapter.create_index(index)?;
            Ok(Outcome::Changed)
        }
    }
}

fn reconcile_table<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    ctx: &mut ReconcileContext<'_>,
    table: &Table,
) -> Result<Outcome, Error> {
    if !table.auto_update {
        trace!(table = %table.name, "table is not managed");
        return Ok(Outcome::Unchanged);
    }

    let mut modified = false;
    if !adapter.table_exists(&table.grain, &table.name)? {
        adapter.create_table(table)?;
        modified = true;
    } else {
        modified |= update_table_structure(adapter, ctx, table)?;
    }

    if modified {
        adapter.manage_auto_increment(table)?;
    }
    adapter.update_versioning_trigger(table)?;
    let keys_changed = reconcile_foreign_keys(adapter, ctx, table)?;

    Ok(if modified {
        Outcome::Changed
    } else if keys_changed {
        Outcome::KeysChanged
    } else {
        Outcome::Unchanged
    })
}

/// Columns and primary key of an existing table. Returns whether anything
/// changed.
fn update_table_structure<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    ctx: &mut ReconcileContext<'_>,
    table: &Table,
) -> Result<bool, Error> {
    let mut modified = false;
    let mut dropped_refs = Vec::new();

    let pk = adapter.get_pk_info(table)?;
    let mut pk_present = !pk.is_empty();
    if pk_present && !pk.reflects(table) {
        dropped_refs.extend(drop_referencing_fks(adapter, ctx, table)?);
        adapter.drop_pk(table, &pk.name)?;
        pk_present = false;
        modified = true;
    }

    let live_columns = adapter.get_columns(table)?;
    for column in &table.columns {
        if !live_columns.contains(&column.name) {
            debug!(table = %table.name, column = %column.name, "adding column");
            adapter.create_column(table, column)?;
            modified = true;
            continue;
        }
        let Some(live) = adapter.get_column_info(table, &column.name)? else {
            continue;
        };
        if live.reflects(column) {
            continue;
        }
        if pk_present && pk.columns.contains(&column.name) {
            dropped_refs.extend(drop_referencing_fks(adapter, ctx, table)?);
            adapter.drop_pk(table, &pk.name)?;
            pk_present = false;
        }
        debug!(table = %table.name, column = %column.name, "altering column");
        adapter.update_column(table, column, &live)?;
        modified = true;
    }

    if table.versioned && table.column(REC_VERSION).is_none() {
        let declared = table.rec_version_column();
        match adapter.get_column_info(table, REC_VERSION)? {
            None => {
                adapter.create_column(table, &declared)?;
                modified = true;
            }
            Some(live) if !live.reflects(&declared) => {
                adapter.update_column(table, &declared, &live)?;
                modified = true;
            }
            Some(_) => {}
        }
    }

    if !pk_present && !table.primary_key.is_empty() {
        adapter.create_pk(table)?;
        modified = true;
        restore_referencing_fks(adapter, ctx, dropped_refs)?;
    }

    Ok(modified)
}

/// Drop every foreign key that points at `table`, removing it from the
/// retained sets. Returns the dropped keys with their owning grain.
fn drop_referencing_fks<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    ctx: &mut ReconcileContext<'_>,
    table: &Table,
) -> Result<Vec<(String, DbFkInfo)>, Error> {
    let mut grains: Vec<String> = ctx.retained_fks.keys().cloned().collect();
    for referencing in ctx.score.referenced_by(&ElementRef::table(&table.grain, &table.name)) {
        if !grains.contains(&referencing.grain) {
            grains.push(referencing.grain.clone());
        }
    }
    grains.sort();

    let mut dropped = Vec::new();
    for grain in grains {
        let fks = ctx.fks_of(adapter, &grain)?;
        let (referencing, kept): (Vec<DbFkInfo>, Vec<DbFkInfo>) = std::mem::take(fks)
            .into_iter()
            .partition(|fk| fk.references(&table.grain, &table.name));
        *fks = kept;

        for fk in referencing {
            debug!(grain = %grain, table = %fk.table_name, fk = %fk.name, "dropping referencing foreign key");
            adapter.drop_fk(&grain, &fk.table_name, &fk.name)?;
            dropped.push((grain.clone(), fk));
        }
    }
    Ok(dropped)
}

/// Recreate dropped foreign keys unless their owning table is scheduled in
/// this run and managed, in which case it recreates its own keys.
fn restore_referencing_fks<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    ctx: &mut ReconcileContext<'_>,
    dropped: Vec<(String, DbFkInfo)>,
) -> Result<(), Error> {
    let score = ctx.score;
    for (grain, fk) in dropped {
        let Some(owner) = score.grain(&grain).and_then(|g| g.table(&fk.table_name)) else {
            continue;
        };
        if owner.auto_update && ctx.scheduled.contains(&ElementRef::table(&grain, &owner.name)) {
            continue;
        }
        let Some(declared) = owner
            .foreign_keys
            .iter()
            .find(|d| d.constraint_name == fk.name)
        else {
            continue;
        };
        debug!(grain = %grain, table = %owner.name, fk = %fk.name, "restoring foreign key");
        adapter.create_fk(owner, declared)?;
        ctx.fks_of(adapter, &grain)?
            .push(DbFkInfo::from_foreign_key(owner, declared));
    }
    Ok(())
}

/// Create missing foreign keys of `table` and replace mismatched ones.
fn reconcile_foreign_keys<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    ctx: &mut ReconcileContext<'_>,
    table: &Table,
) -> Result<bool, Error> {
    let mut modified = false;
    for fk in &table.foreign_keys {
        let live = ctx
            .fks_of(adapter, &table.grain)?
            .iter()
            .position(|l| l.table_name == table.name && l.name == fk.constraint_name);

        if let Some(pos) = live {
            let fks = ctx.fks_of(adapter, &table.grain)?;
            if fks[pos].reflects(fk) {
                continue;
            }
            fks.remove(pos);
            adapter.drop_fk(&table.grain, &table.name, &fk.constraint_name)?;
        }

        adapter.create_fk(table, fk)?;
        ctx.fks_of(adapter, &table.grain)?
            .push(DbFkInfo::from_foreign_key(table, fk));
        modified = true;
    }
    Ok(modified)
}

fn reconcile_materialized_view<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    ctx: &mut ReconcileContext<'_>,
    view: &MaterializedView,
) -> Result<Outcome, Error> {
    let source = ctx
        .score
        .grain(&view.grain)
        .and_then(|g| g.table(&view.source_table))
        .ok_or_else(|| {
            Error::InvalidModel(format!(
                "materialized view {}.{} reads undeclared table {}",
                view.grain, view.name, view.source_table
            ))
        })?;

    let exists = adapter.table_exists(&view.grain, &view.name)?;
    let source_modified = ctx
        .modified_tables
        .contains(&ElementRef::table(&source.grain, &source.name));

    if exists && !source_modified {
        let query = TriggerQuery::new()
            .with_schema(&view.grain)
            .with_table_name(&source.name)
            .with_name(view.trigger_name(TriggerType::PostInsert));
        let body = adapter.get_trigger_body(&query)?;
        if body.is_some_and(|b| b.contains(&view.checksum_marker())) {
            debug!(view = %view.name, "materialized view is up to date");
            return Ok(Outcome::Unchanged);
        }
    }

    if exists {
        adapter.drop_table(&view.grain, &view.name)?;
    }
    adapter.create_materialized_view_table(view, source)?;
    adapter.init_data_for_materialized_view(view, source)?;
    adapter.drop_materialized_view_triggers(view)?;
    adapter.create_materialized_view_triggers(view, source)?;
    Ok(Outcome::Changed)
}
