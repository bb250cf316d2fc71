//! Tables configured for full transfer get every primary key on the source,
//! regardless of tenant relationships.

use anyhow::Result;
use futures_util::{StreamExt, TryStreamExt, stream};
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::CollectorContext;
use crate::schema::Table;

pub async fn collect(ctx: &CollectorContext) -> Result<()> {
    info!("start preparing full transfer tables..");

    let tables: Vec<&Table> = ctx
        .model
        .tables()
        .filter(|t| ctx.settings.full_transfer_tables.contains(&t.name))
        .collect();

    stream::iter(tables.iter().map(|table| prepare_table(ctx, table)))
        .buffer_unordered(ctx.parallelism())
        .try_collect::<Vec<_>>()
        .await?;

    for table in &tables {
        if table.is_checked() {
            table.set_ready_for_transferring();
        }
    }

    info!("finished preparing full transfer tables..");
    Ok(())
}

async fn prepare_table(ctx: &CollectorContext, table: &Table) -> Result<()> {
    info!("start preparing full transfer table \"{}\"", table.name);

    if table.is_ready_for_transferring() {
        return Ok(());
    }
    let Some(pk) = table.primary_key_column() else {
        warn!("full transfer table {:?} has no usable primary key", table.name);
        return Ok(());
    };

    let pks = ctx
        .fetch_table_column_values(table, pk, &BTreeSet::new(), &[], false)
        .await?;

    table.set_checked();
    if !pks.is_empty() {
        table.update_need_transfer_pks(pks);
    }

    info!("finished preparing full transfer table \"{}\"", table.name);
    Ok(())
}
