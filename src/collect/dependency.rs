//! Fills the tables the key-column closure never reached, in dependency
//! order. Parallelism is deliberately absent here: each table anchors its
//! selection on parents that earlier iterations have already finalised, so
//! the emission order is load-bearing.

use anyhow::Result;
use futures_util::future::join_all;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

use super::CollectorContext;
use crate::schema::{Column, PkValue, Table, TableId};

pub async fn collect(ctx: &CollectorContext) -> Result<()> {
    info!("start preparing tables sorted by dependency..");

    let model = &*ctx.model;

    let unready = model
        .tables_without_generics()
        .filter(|t| !t.is_ready_for_transferring())
        .count();
    debug!("tables not transferring {unready}");

    // Edge table -> referent for every plain FK, both endpoints non-generic.
    let mut dependency_pairs: Vec<(TableId, TableId)> = Vec::new();
    for table in model.tables_without_generics() {
        for &ci in &table.not_self_fk_columns {
            if let Some(referent) = table.columns[ci].referenced_table
                && !model.table(referent).is_generic
            {
                dependency_pairs.push((table.id, referent));
            }
        }
    }

    log_fk_cycles(ctx, &dependency_pairs);

    let outcome = topological_sort(&dependency_pairs);
    let mut order: Vec<TableId> = outcome.cyclic.into_iter().rev().collect();
    order.extend(outcome.sorted.into_iter().rev());

    // Tables with no FK relationships at all go first.
    let mentioned: HashSet<TableId> = order.iter().copied().collect();
    let mut full_order: Vec<TableId> = model
        .tables_without_generics()
        .filter(|t| !mentioned.contains(&t.id))
        .map(|t| t.id)
        .collect();
    full_order.extend(order);

    for id in full_order {
        let table = model.table(id);
        if !table.is_ready_for_transferring() {
            prepare_unready_table(ctx, table).await?;
        }
    }

    info!("preparing tables sorted by dependency finished.");
    Ok(())
}

async fn prepare_unready_table(ctx: &CollectorContext, table: &Table) -> Result<()> {
    info!("start preparing table \"{}\"", table.name);

    let model = &*ctx.model;
    let Some(pk) = table.primary_key_column() else {
        warn!("table {:?} has no usable primary key, skipping", table.name);
        return Ok(());
    };

    // Anchor the selection on every highest-priority parent that already
    // has rows in scope.
    let fk_columns = &table.highest_priority_fk_columns;
    let mut where_columns: Vec<(&Column, BTreeSet<PkValue>)> = Vec::new();
    let mut with_full_parent = false;

    for &ci in fk_columns {
        let column = &table.columns[ci];
        debug!("prepare column {}", column.name);
        let Some(parent_id) = column.referenced_table else {
            continue;
        };
        let parent = model.table(parent_id);
        if parent.need_transfer_len() > 0 {
            if parent.is_full_prepared() {
                with_full_parent = true;
            } else {
                where_columns.push((column, parent.need_transfer_snapshot()));
            }
        }
    }

    // Nothing to anchor on: leave the table untouched.
    if !fk_columns.is_empty() && where_columns.is_empty() && !with_full_parent {
        return Ok(());
    }

    let borrowed: Vec<(&Column, &BTreeSet<PkValue>)> =
        where_columns.iter().map(|(c, s)| (*c, s)).collect();
    let table_pks = ctx
        .fetch_table_column_values(table, pk, &BTreeSet::new(), &borrowed, false)
        .await?;

    // Parents are in scope but no row bridges them: leave the table alone.
    if !fk_columns.is_empty() && !where_columns.is_empty() && table_pks.is_empty() {
        return Ok(());
    }

    table.update_need_transfer_pks(table_pks);
    debug!(
        "table \"{}\" need transfer pks - {}",
        table.name,
        table.need_transfer_len()
    );

    debug!("prepare revert tables");
    let results = join_all(table.reverse_fk.iter().map(|(&revert_id, revert_columns)| {
        prepare_revert_table(ctx, table, model.table(revert_id), revert_columns)
    }))
    .await;
    for result in results {
        result?;
    }

    // Still nothing in scope: transfer the whole table.
    if table.need_transfer_len() == 0 {
        let all_records = ctx
            .fetch_table_column_values(table, pk, &BTreeSet::new(), &[], false)
            .await?;
        table.update_need_transfer_pks(all_records);
    }

    table.set_ready_for_transferring();

    info!("finished collecting records ids of table \"{}\"", table.name);
    Ok(())
}

async fn prepare_revert_table(
    ctx: &CollectorContext,
    table: &Table,
    revert_table: &Table,
    revert_columns: &BTreeSet<usize>,
) -> Result<()> {
    info!("prepare revert table {}", revert_table.name);

    // A referrer that points at a key-column table would pull other
    // tenants' rows in through a back edge; only a key-column table itself
    // may absorb those.
    if !revert_table.fk_columns_to_key_tables.is_empty() && !table.with_key_column() {
        return Ok(());
    }
    if revert_table.need_transfer_len() == 0 {
        return Ok(());
    }

    let revert_pks = if revert_table.is_full_prepared() {
        BTreeSet::new()
    } else {
        revert_table.need_transfer_snapshot()
    };

    let results = join_all(revert_columns.iter().map(|&ci| {
        let revert_column = &revert_table.columns[ci];
        let revert_pks = &revert_pks;
        async move {
            let values = ctx
                .fetch_table_column_values(revert_table, revert_column, revert_pks, &[], true)
                .await?;
            if !values.is_empty() {
                table.update_need_transfer_pks(values);
            }
            Ok::<_, anyhow::Error>(())
        }
    }))
    .await;
    for result in results {
        result?;
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub struct SortOutcome {
    pub sorted: Vec<TableId>,
    pub cyclic: Vec<TableId>,
}

/// Kahn's algorithm over dependency pairs `(dependent, referenced)`. Nodes
/// left with inbound edges after the drain are the cyclic remainder,
/// reported in first-seen order.
pub fn topological_sort(dependency_pairs: &[(TableId, TableId)]) -> SortOutcome {
    let mut num_heads: HashMap<TableId, usize> = HashMap::new();
    let mut tail_order: Vec<TableId> = Vec::new();
    let mut tails: HashMap<TableId, Vec<TableId>> = HashMap::new();
    let mut heads: Vec<TableId> = Vec::new();

    for &(head, tail) in dependency_pairs {
        if !num_heads.contains_key(&tail) {
            tail_order.push(tail);
        }
        *num_heads.entry(tail).or_insert(0) += 1;
        match tails.entry(head) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut().push(tail),
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(vec![tail]);
                heads.push(head);
            }
        }
    }

    let mut ordered: Vec<TableId> = heads
        .iter()
        .copied()
        .filter(|h| !num_heads.contains_key(h))
        .collect();
    let mut i = 0;
    while i < ordered.len() {
        let head = ordered[i];
        i += 1;
        if let Some(targets) = tails.get(&head) {
            for &target in targets {
                let remaining = num_heads.get_mut(&target).unwrap();
                *remaining -= 1;
                if *remaining == 0 {
                    ordered.push(target);
                }
            }
        }
    }

    let cyclic: Vec<TableId> = tail_order
        .into_iter()
        .filter(|t| num_heads[t] > 0)
        .collect();

    SortOutcome {
        sorted: ordered,
        cyclic,
    }
}

/// Report strongly connected FK components. Cycles aren't errors here; the
/// cyclic remainder just gets processed in its reversed emission order.
fn log_fk_cycles(ctx: &CollectorContext, dependency_pairs: &[(TableId, TableId)]) {
    let mut graph: DiGraph<TableId, ()> = DiGraph::new();
    let mut nodes = HashMap::new();
    for &(a, b) in dependency_pairs {
        let na = *nodes.entry(a).or_insert_with(|| graph.add_node(a));
        let nb = *nodes.entry(b).or_insert_with(|| graph.add_node(b));
        graph.add_edge(na, nb, ());
    }

    for component in tarjan_scc(&graph) {
        if component.len() > 1 {
            let names: Vec<&str> = component
                .iter()
                .map(|&idx| ctx.model.table(graph[idx]).name.as_str())
                .collect();
            debug!("foreign key cycle: {}", names.join(" -> "));
        }
    }
}
