//! Resolves polymorphic `(content_type_id, object_id)` references. The
//! content-type mapping is composed from both sides: the destination knows
//! which table each `(app_label, model)` pair lives in, the source knows
//! the content type id the rows actually carry.

use anyhow::{Context, Result};
use futures_util::future::join_all;
use sqlx::Row;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use super::CollectorContext;
use crate::schema::{Column, PkValue, Table};
use crate::sql;

pub async fn collect(ctx: &CollectorContext) -> Result<()> {
    info!("start preparing generic tables..");

    let content_type_table = prepare_content_type_mapping(ctx).await?;

    let generic_names: Vec<&String> = ctx
        .settings
        .tables_with_generic_foreign_key
        .iter()
        .filter(|name| !ctx.settings.excluded_tables.contains(*name))
        .collect();

    let results = join_all(generic_names.iter().filter_map(|name| {
        let table = ctx.model.get(name.as_str())?;
        Some(prepare_generic_table(ctx, table, &content_type_table))
    }))
    .await;
    for result in results {
        result?;
    }

    info!("finished preparing generic tables..");
    Ok(())
}

/// Compose `(app_label, model) -> table_name` (destination) with
/// `(app_label, model) -> content_type_id` (source) into
/// `table_name -> content_type_id`.
async fn prepare_content_type_mapping(ctx: &CollectorContext) -> Result<HashMap<String, i64>> {
    info!("prepare content type tables");

    let table_rows = sqlx::query(&sql::content_type_table_sql())
        .fetch_all(&ctx.dst_pool)
        .await
        .context("failed to load the content type table mapping")?;
    let id_rows = sqlx::query(&sql::content_type_sql())
        .fetch_all(&ctx.src_pool)
        .await
        .context("failed to load content type ids")?;

    let mut ids: HashMap<(String, String), i64> = HashMap::new();
    for row in &id_rows {
        let id: i64 = row.try_get(0)?;
        let app_label: String = row.try_get(1)?;
        let model: String = row.try_get(2)?;
        ids.insert((app_label, model), id);
    }

    let mut mapping = HashMap::new();
    for row in &table_rows {
        let table_name: String = row.try_get(0)?;
        let app_label: String = row.try_get(1)?;
        let model: String = row.try_get(2)?;
        match ids.get(&(app_label.clone(), model.clone())) {
            Some(&id) => {
                mapping.insert(table_name, id);
            }
            None => {
                debug!("content type ({app_label}, {model}) is unknown to the source");
            }
        }
    }
    Ok(mapping)
}

async fn prepare_generic_table(
    ctx: &CollectorContext,
    table: &Table,
    content_type_table: &HashMap<String, i64>,
) -> Result<()> {
    info!("prepare generic table data for table \"{}\"", table.name);

    let Some(pk) = table.primary_key_column() else {
        warn!("generic table {:?} has no usable primary key", table.name);
        return Ok(());
    };
    let Some(object_id) = table.column_by_name("object_id") else {
        warn!("generic table {:?} has no object_id column", table.name);
        return Ok(());
    };
    let Some(content_type_id) = table.column_by_name("content_type_id") else {
        warn!("generic table {:?} has no content_type_id column", table.name);
        return Ok(());
    };

    let results = join_all(content_type_table.iter().map(|(rel_table_name, &ct_id)| {
        prepare_referent(ctx, table, pk, object_id, content_type_id, rel_table_name, ct_id)
    }))
    .await;
    for result in results {
        result?;
    }
    Ok(())
}

async fn prepare_referent(
    ctx: &CollectorContext,
    table: &Table,
    pk: &Column,
    object_id: &Column,
    content_type_id: &Column,
    rel_table_name: &str,
    ct_id: i64,
) -> Result<()> {
    let Some(rel_table) = ctx.model.get(rel_table_name) else {
        debug!("table {rel_table_name} not found");
        return Ok(());
    };
    let Some(rel_pk) = rel_table.primary_key_column() else {
        debug!("table {rel_table_name} has no usable primary key");
        return Ok(());
    };
    // object_id can only hold this referent's keys when the types line up.
    if rel_pk.data_type != object_id.data_type {
        debug!("pk of table {rel_table_name} has an incompatible data type");
        return Ok(());
    }

    let rel_pks = rel_table.need_transfer_snapshot();
    if rel_pks.is_empty() {
        return Ok(());
    }

    let ct_values: BTreeSet<PkValue> = [PkValue::Int(ct_id)].into_iter().collect();
    let where_columns = [(object_id, &rel_pks), (content_type_id, &ct_values)];

    let need_transfer_pks = ctx
        .fetch_table_column_values(table, pk, &BTreeSet::new(), &where_columns, false)
        .await?;

    info!(
        "{} need transfer pks {}",
        table.name,
        need_transfer_pks.len()
    );
    table.update_need_transfer_pks(need_transfer_pks);
    Ok(())
}
