//! The subset-closure collectors and their shared context. The stages run
//! in a fixed order; each one only ever grows the per-table transfer sets,
//! and every table a stage visited is promoted to ready once it finishes.

pub mod dependency;
pub mod full_transfer;
pub mod generic;
pub mod key_column;
pub mod key_table;

use anyhow::Result;
use itertools::Itertools;
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

use crate::config::Settings;
use crate::runner::QueryRunner;
use crate::schema::{Column, PkValue, SchemaModel, Table};
use crate::sql::SelectionBuilder;
use crate::stats::{Stage, StatisticManager};

/// Shared state for every collector: the frozen schema model, the source
/// query runner (which owns the per-run query deduplication set), the
/// destination pool, and the selection builder.
pub struct CollectorContext {
    pub model: Arc<SchemaModel>,
    pub runner: QueryRunner,
    pub src_pool: PgPool,
    pub dst_pool: PgPool,
    pub builder: SelectionBuilder,
    pub settings: Arc<Settings>,
}

impl CollectorContext {
    pub fn new(
        model: Arc<SchemaModel>,
        src_pool: PgPool,
        dst_pool: PgPool,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            runner: QueryRunner::new(src_pool.clone()),
            builder: SelectionBuilder::new(&settings),
            model,
            src_pool,
            dst_pool,
            settings,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.builder = self.builder.with_chunk_size(chunk_size);
        self
    }

    pub(crate) fn parallelism(&self) -> usize {
        self.settings.connection_pool_size.max(1) as usize
    }

    /// Fetch the distinct values of `column` over the given restrictions.
    /// A foreign key whose referent fell outside the model (excluded, a
    /// partition child, a filtered name) yields nothing: no relation may be
    /// followed through it.
    pub async fn fetch_table_column_values(
        &self,
        table: &Table,
        column: &Column,
        primary_key_values: &BTreeSet<PkValue>,
        where_columns: &[(&Column, &BTreeSet<PkValue>)],
        is_revert: bool,
    ) -> Result<BTreeSet<PkValue>> {
        if column.is_foreign_key() && column.referenced_table.is_none() {
            warn!(
                "foreign key {}.{} has no referent in the model",
                table.name, column.name
            );
            return Ok(BTreeSet::new());
        }

        let queries = self.builder.column_values_queries(
            table,
            column,
            primary_key_values,
            where_columns,
            is_revert,
        );

        let mut values = BTreeSet::new();
        for sql in &queries {
            values.extend(self.runner.fetch_values(sql, column).await?);
        }
        Ok(values)
    }
}

/// Split a value set into chunks bounded by `size`, preserving order.
pub(crate) fn chunk_values(values: &BTreeSet<PkValue>, size: usize) -> Vec<BTreeSet<PkValue>> {
    values
        .iter()
        .cloned()
        .chunks(size.max(1))
        .into_iter()
        .map(|chunk| chunk.collect())
        .collect()
}

/// Run the whole collection pipeline in its fixed order, sampling the
/// statistics at every stage boundary.
pub async fn run_stages(ctx: &CollectorContext, stats: &mut StatisticManager) -> Result<()> {
    stats.mark(Stage::SeedKeyTable);
    key_table::collect(ctx).await?;
    stats.mark(Stage::SeedKeyTable);
    ctx.model.promote_checked();

    stats.mark(Stage::CollectFullTransferTables);
    full_transfer::collect(ctx).await?;
    stats.mark(Stage::CollectFullTransferTables);
    ctx.model.promote_checked();

    stats.mark(Stage::CollectKeyColumnTables);
    key_column::collect(ctx).await?;
    stats.mark(Stage::CollectKeyColumnTables);
    ctx.model.promote_checked();

    stats.mark(Stage::CollectGenericTables);
    generic::collect(ctx).await?;
    stats.mark(Stage::CollectGenericTables);
    ctx.model.promote_checked();

    stats.mark(Stage::CollectDependencySortedTables);
    dependency::collect(ctx).await?;
    stats.mark(Stage::CollectDependencySortedTables);
    ctx.model.promote_checked();

    Ok(())
}
