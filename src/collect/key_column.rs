//! Closure over the tables that carry the tenant key column: seed each one
//! under the tenant predicate, then walk outbound foreign keys (forward)
//! and inbound foreign keys (reverse) recursively.
//!
//! Termination: forward recursion stops when the difference of newly
//! discovered ids is empty (the sets only grow, bounded by the source's id
//! space); reverse recursion excludes already-visited tables. The visited
//! set is cloned down the recursion, never shared across sibling branches.

use anyhow::Result;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

use super::{CollectorContext, chunk_values};
use crate::schema::{Column, PkValue, Table, TableId};

pub async fn collect(ctx: &CollectorContext) -> Result<()> {
    info!("start preparing tables with key column and their siblings..");

    let results = join_all(
        ctx.model
            .tables_with_key_column()
            .into_iter()
            .map(|id| prepare_key_column_table(ctx, ctx.model.table(id))),
    )
    .await;
    for result in results {
        result?;
    }

    ctx.model.promote_checked();

    info!("finished preparing tables with key column and their siblings..");
    Ok(())
}

async fn prepare_key_column_table(ctx: &CollectorContext, table: &Table) -> Result<()> {
    info!("start preparing table with key column \"{}\"", table.name);

    if table.is_ready_for_transferring() {
        return Ok(());
    }
    let Some(pk) = table.primary_key_column() else {
        warn!("table {:?} has no usable primary key, skipping", table.name);
        return Ok(());
    };

    let pks = ctx
        .fetch_table_column_values(table, pk, &BTreeSet::new(), &[], false)
        .await?;

    table.set_checked();

    if !pks.is_empty() {
        table.update_need_transfer_pks(pks.iter().cloned());
        forward_table(ctx, table, pks, HashSet::new()).await?;
        reverse_table(ctx, table, HashSet::new()).await?;
    }

    info!("finished preparing table with key column \"{}\"", table.name);
    Ok(())
}

/// Follow every outbound FK of `table`, pulling the referenced rows for the
/// freshly discovered `delta` of primary keys.
fn forward_table<'a>(
    ctx: &'a CollectorContext,
    table: &'a Table,
    delta: BTreeSet<PkValue>,
    visited: HashSet<TableId>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let mut visited = visited;
        if !visited.insert(table.id) {
            return Ok(());
        }

        let mut cohort = Vec::new();
        for &ci in &table.not_self_fk_columns {
            let column = &table.columns[ci];
            let Some(foreign_id) = column.referenced_table else {
                continue;
            };
            let foreign = ctx.model.table(foreign_id);
            if foreign.with_key_column()
                || visited.contains(&foreign_id)
                || foreign.is_ready_for_transferring()
            {
                continue;
            }
            cohort.push(forward_column(ctx, table, column, delta.clone(), visited.clone()));
        }
        for result in join_all(cohort).await {
            result?;
        }

        // Self-references run after the plain columns, with the current
        // table dropped from the visited set so ancestor chains unwind.
        let mut hierarchy = Vec::new();
        for &ci in &table.self_fk_columns {
            if table.is_ready_for_transferring() {
                continue;
            }
            let column = &table.columns[ci];
            let mut relaxed = visited.clone();
            relaxed.remove(&table.id);
            hierarchy.push(forward_column(ctx, table, column, delta.clone(), relaxed));
        }
        for result in join_all(hierarchy).await {
            result?;
        }

        table.set_checked();
        Ok(())
    }
    .boxed()
}

fn forward_column<'a>(
    ctx: &'a CollectorContext,
    table: &'a Table,
    column: &'a Column,
    delta: BTreeSet<PkValue>,
    visited: HashSet<TableId>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let cohort: Vec<_> = chunk_values(&delta, ctx.builder.chunk_size())
            .into_iter()
            .map(|chunk| forward_column_chunk(ctx, table, column, chunk, visited.clone()))
            .collect();
        for result in join_all(cohort).await {
            result?;
        }
        Ok(())
    }
    .boxed()
}

fn forward_column_chunk<'a>(
    ctx: &'a CollectorContext,
    table: &'a Table,
    column: &'a Column,
    chunk: BTreeSet<PkValue>,
    visited: HashSet<TableId>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let Some(foreign_id) = column.referenced_table else {
            return Ok(());
        };
        let foreign = ctx.model.table(foreign_id);
        foreign.set_checked();

        // A key-column table selects under its tenant predicate; everyone
        // else narrows by the chunk of freshly added primary keys, unless
        // the whole table is in scope anyway.
        let foreign_pks = if table.with_key_column() {
            ctx.fetch_table_column_values(table, column, &BTreeSet::new(), &[], false)
                .await?
        } else {
            let restriction = if table.is_full_prepared() {
                BTreeSet::new()
            } else {
                chunk
            };
            ctx.fetch_table_column_values(table, column, &restriction, &[], false)
                .await?
        };

        if foreign_pks.is_empty() {
            return Ok(());
        }

        debug!(
            "table - {}, column - {} - collecting fk ids ----- {}",
            table.name, column.name, foreign.name
        );

        let difference = foreign.missing_from_need_transfer(&foreign_pks);
        if !difference.is_empty() {
            foreign.update_need_transfer_pks(difference.iter().cloned());
            forward_table(ctx, foreign, difference, visited).await?;
        }
        Ok(())
    }
    .boxed()
}

/// Pull in the rows of every table that references `table`, then close over
/// what those rows reference in turn.
fn reverse_table<'a>(
    ctx: &'a CollectorContext,
    table: &'a Table,
    visited: HashSet<TableId>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let mut visited = visited;
        if !visited.insert(table.id) {
            return Ok(());
        }

        let mut cohort = Vec::new();
        for (&revert_id, revert_columns) in &table.reverse_fk {
            let revert_table = ctx.model.table(revert_id);
            if revert_table.with_key_column()
                || revert_id == table.id
                || visited.contains(&revert_id)
                || revert_table.is_ready_for_transferring()
            {
                continue;
            }
            cohort.push(reverse_revert_table(
                ctx,
                table,
                revert_table,
                revert_columns,
                visited.clone(),
            ));
        }
        for result in join_all(cohort).await {
            result?;
        }

        table.set_checked();
        Ok(())
    }
    .boxed()
}

fn reverse_revert_table<'a>(
    ctx: &'a CollectorContext,
    table: &'a Table,
    revert_table: &'a Table,
    revert_columns: &'a BTreeSet<usize>,
    visited: HashSet<TableId>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let need_transfer = table.need_transfer_snapshot();
        if need_transfer.is_empty() {
            return Ok(());
        }
        if revert_table.primary_key_column().is_none() {
            warn!(
                "revert table {:?} has no usable primary key, skipping",
                revert_table.name
            );
            return Ok(());
        }

        let mut cohort = Vec::new();
        for &ci in revert_columns {
            // Only the highest-priority inbound columns anchor a reverse
            // pull; the rest would drag in unrelated tenants.
            if !revert_table.highest_priority_fk_columns.contains(&ci) {
                continue;
            }
            let revert_column = &revert_table.columns[ci];
            for chunk in chunk_values(&need_transfer, ctx.builder.chunk_size()) {
                cohort.push(reverse_column_chunk(ctx, revert_table, revert_column, chunk));
            }
        }
        for result in join_all(cohort).await {
            result?;
        }

        if revert_table.need_transfer_len() > 0 {
            // The forward pass restarts from the pre-reverse visited set so
            // sibling branches of this reverse visit don't prune each other.
            let forward_visited = visited.clone();
            reverse_table(ctx, revert_table, visited).await?;
            let snapshot = revert_table.need_transfer_snapshot();
            forward_table(ctx, revert_table, snapshot, forward_visited).await?;
        }
        Ok(())
    }
    .boxed()
}

fn reverse_column_chunk<'a>(
    ctx: &'a CollectorContext,
    revert_table: &'a Table,
    revert_column: &'a Column,
    chunk: BTreeSet<PkValue>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let Some(pk) = revert_table.primary_key_column() else {
            return Ok(());
        };
        let revert_pks = ctx
            .fetch_table_column_values(
                revert_table,
                pk,
                &BTreeSet::new(),
                &[(revert_column, &chunk)],
                true,
            )
            .await?;
        if !revert_pks.is_empty() {
            revert_table.update_need_transfer_pks(revert_pks);
        }
        Ok(())
    }
    .boxed()
}
