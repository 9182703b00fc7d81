//! Per-grain pre-pass.
//!
//! Before any element of a grain is applied, objects that would block
//! column or key changes are removed: views and parameterized views are
//! always dropped (they are recreated from the model), and indices and
//! foreign keys that are orphaned or no longer match are dropped.

use crate::adapter::{DbAdapter, DbFkInfo};
use crate::error::Error;
use crate::score::Grain;
use tracing::debug;

/// Run the pre-pass for `grain` and commit.
///
/// Returns the live foreign keys of the grain that were kept.
pub fn prepare_grain<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    grain: &Grain,
) -> Result<Vec<DbFkInfo>, Error> {
    for view in adapter.get_view_list(&grain.name)? {
        debug!(grain = %grain.name, view = %view, "dropping view");
        adapter.drop_view(&grain.name, &view)?;
    }
    for view in adapter.get_parameterized_view_list(&grain.name)? {
        debug!(grain = %grain.name, view = %view, "dropping parameterized view");
        adapter.drop_parameterized_view(&grain.name, &view)?;
    }

    drop_stale_indices(adapter, grain)?;
    let retained = drop_stale_foreign_keys(adapter, grain)?;

    adapter.commit()?;
    Ok(retained)
}

fn drop_stale_indices<A: DbAdapter + ?Sized>(adapter: &mut A, grain: &Grain) -> Result<(), Error> {
    let live = adapter.get_indices(&grain.name)?;
    for (name, info) in live {
        let declared = grain.indices().find(|i| i.name == name);
        let mut stale = !declared.is_some_and(|d| info.reflects(d));

        // An index over a column about to be altered blocks the alteration.
        if !stale {
            if let Some(table) = grain.table(&info.table_name) {
                for column in &info.columns {
                    let live_column = adapter.get_column_info(table, column)?;
                    let matches = match (table.column(column), live_column) {
                        (Some(declared), Some(live)) => live.reflects(declared),
                        _ => false,
                    };
                    if !matches {
                        stale = true;
                        break;
                    }
                }
            }
        }

        if stale {
            debug!(grain = %grain.name, index = %name, "dropping index");
            adapter.drop_index(&grain.name, &info)?;
        }
    }
    Ok(())
}

fn drop_stale_foreign_keys<A: DbAdapter + ?Sized>(
    adapter: &mut A,
    grain: &Grain,
) -> Result<Vec<DbFkInfo>, Error> {
    let mut retained = Vec::new();
    for fk in adapter.get_fk_info(&grain.name)? {
        let keep = match grain.table(&fk.table_name) {
            // Unmanaged tables keep their keys as they are.
            Some(table) if !table.auto_update => true,
            Some(table) => table
                .foreign_keys
                .iter()
                .find(|declared| declared.constraint_name == fk.name)
                .is_some_and(|declared| fk.reflects(declared)),
            None => false,
        };

        if keep {
            retained.push(fk);
        } else {
            debug!(grain = %grain.name, table = %fk.table_name, fk = %fk.name, "dropping foreign key");
            adapter.drop_fk(&grain.name, &fk.table_name, &fk.name)?;
        }
    }
    Ok(retained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::score::{Column, ColumnType, ForeignKey, Index, Table, VersionString, View};

    fn customers(name_len: u32) -> Table {
        Table::new("crm", "customers")
            .with_column(Column::new("id", ColumnType::Integer).not_null())
            .with_column(Column::new("name", ColumnType::String { length: Some(name_len) }))
            .with_primary_key(["id"])
    }

    fn orders() -> Table {
        Table::new("crm", "orders")
            .with_column(Column::new("id", ColumnType::Integer).not_null())
            .with_column(Column::new("customer", ColumnType::Integer))
            .with_primary_key(["id"])
    }

    fn live_db() -> MemoryAdapter {
        let mut db = MemoryAdapter::new();
        db.create_schema_if_not_exists("crm").unwrap();
        db.create_table(&customers(50)).unwrap();
        db.create_table(&orders()).unwrap();
        db.create_fk(
            &orders(),
            &ForeignKey::new("fk_orders_customer", ["customer"], "crm", "customers"),
        )
        .unwrap();
        db.create_index(&Index::new("crm", "ix_name", "customers", ["name"])).unwrap();
        db.create_index(&Index::new("crm", "ix_gone", "orders", ["customer"])).unwrap();
        db.create_view(&View::new("crm", "v_customers", "select")).unwrap();
        db.commit().unwrap();
        db.clear_journal();
        db
    }

    #[test]
    fn test_prepare_drops_views_and_orphans() {
        let mut db = live_db();
        let grain = Grain::new("crm", VersionString::default())
            .with_element(customers(50))
            .with_element(orders())
            .with_element(Index::new("crm", "ix_name", "customers", ["name"]));

        let retained = prepare_grain(&mut db, &grain).unwrap();

        assert!(!db.has_view("crm", "v_customers"));
        assert!(db.index("crm", "ix_name").is_some());
        assert!(db.index("crm", "ix_gone").is_none());
        // The declaration no longer has the key.
        assert!(retained.is_empty());
        assert!(db.was_called("drop_fk", "crm.orders.fk_orders_customer"));
    }

    #[test]
    fn test_prepare_keeps_matching_fk() {
        let mut db = live_db();
        let grain = Grain::new("crm", VersionString::default())
            .with_element(customers(50))
            .with_element(orders().with_foreign_key(ForeignKey::new(
                "fk_orders_customer",
                ["customer"],
                "crm",
                "customers",
            )));

        let retained = prepare_grain(&mut db, &grain).unwrap();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].name, "fk_orders_customer");
        assert!(!db.was_called("drop_fk", "crm.orders.fk_orders_customer"));
    }

    #[test]
    fn test_prepare_drops_index_over_changed_column() {
        let mut db = live_db();
        let grain = Grain::new("crm", VersionString::default())
            .with_element(customers(80))
            .with_element(orders())
            .with_element(Index::new("crm", "ix_name", "customers", ["name"]));

        prepare_grain(&mut db, &grain).unwrap();
        assert!(db.index("crm", "ix_name").is_none());
    }

    #[test]
    fn test_prepare_keeps_fk_of_unmanaged_table() {
        let mut db = live_db();
        let grain = Grain::new("crm", VersionString::default())
            .with_element(customers(50))
            .with_element(orders().without_auto_update());

        let retained = prepare_grain(&mut db, &grain).unwrap();
        assert_eq!(retained.len(), 1);
    }
}
