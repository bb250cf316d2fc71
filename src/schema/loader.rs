//! Builds the schema model from catalog metadata on the destination (the
//! two databases are structurally identical) and fills per-table row counts
//! from the source.

use anyhow::{Context, Result};
use futures_util::future::join_all;
use futures_util::{StreamExt, stream};
use itertools::Itertools;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::config::Settings;
use crate::schema::{ConstraintKind, SchemaModel, TableId};
use crate::sql::{count_table_records_sql, quote_literal};

/// Load table and column metadata for every non-excluded base table in the
/// public schema and freeze the derived properties.
pub async fn load_structure(pool: &PgPool, settings: &Settings) -> Result<SchemaModel> {
    info!("prepare tables structure for transferring process");

    let partition_names = fetch_partition_names(pool).await?;
    let table_names: Vec<String> = fetch_table_names(pool, settings)
        .await?
        .into_iter()
        .filter(|name| !partition_names.contains(name))
        .collect();

    let mut model = SchemaModel::new();
    for name in &table_names {
        model.insert_table(name);
    }

    let batches: Vec<Vec<String>> = table_names
        .iter()
        .cloned()
        .chunks(settings.tables_limit_per_transaction.max(1))
        .into_iter()
        .map(|chunk| chunk.collect())
        .collect();

    let fetches = batches.iter().map(|batch| {
        let sql = table_columns_sql(batch);
        async move { sqlx::query(&sql).fetch_all(pool).await }
    });

    for batch_result in join_all(fetches).await {
        let rows = batch_result.context("failed to load table columns")?;
        for row in rows {
            let table_name: String = row.try_get(0)?;
            let column_name: String = row.try_get(1)?;
            let data_type: String = row.try_get(2)?;
            let ordinal_position: i32 = row.try_get(3)?;
            let constraint_table: Option<String> = row.try_get(4)?;
            let constraint_type: Option<String> = row.try_get(5)?;

            // Constraints into excluded tables are never recorded, so no
            // relation through them can ever be followed.
            if let Some(referent) = &constraint_table
                && settings.excluded_tables.contains(referent)
            {
                continue;
            }
            let Some(table_id) = model.id_of(&table_name) else {
                continue;
            };
            let referenced_table = constraint_table.as_deref().and_then(|n| model.id_of(n));
            let kind = constraint_type.as_deref().and_then(ConstraintKind::parse);

            model.append_column(
                table_id,
                &column_name,
                &data_type,
                ordinal_position,
                referenced_table,
                kind,
            );
        }
    }

    model.finalize(settings);

    info!("destination database tables count - {}", model.len());

    Ok(model)
}

/// Fill `full_count` and `max_pk` for every table that has a usable primary
/// key, querying the source concurrently.
pub async fn fill_row_counts(model: &mut SchemaModel, pool: &PgPool, parallelism: u32) -> Result<()> {
    info!("filling tables rows counts");

    let jobs: Vec<(TableId, String)> = model
        .tables()
        .filter_map(|t| count_table_records_sql(t).map(|sql| (t.id, sql)))
        .collect();

    let results: Vec<(TableId, Result<sqlx::postgres::PgRow, sqlx::Error>)> =
        stream::iter(jobs.into_iter().map(|(id, sql)| {
            let pool = pool.clone();
            async move {
                let row = sqlx::query(&sql).fetch_one(&pool).await;
                (id, row)
            }
        }))
        .buffer_unordered(parallelism.max(1) as usize)
        .collect()
        .await;

    for (id, result) in results {
        let row = result
            .with_context(|| format!("row count failed for table {:?}", model.table(id).name))?;
        let count: i64 = row.try_get(0)?;
        let max_pk: Option<i64> = row.try_get(1)?;
        let numeric_pk = model
            .table(id)
            .primary_key_column()
            .is_some_and(|pk| pk.is_numeric());
        let table = model.table_mut(id);
        table.full_count = count.max(0) as u64;
        // max(pk) is only meaningful for numeric keys; the builder emits a
        // second count(*) for the others to keep the row shape fixed.
        if numeric_pk {
            table.max_pk = max_pk;
        }
    }

    Ok(())
}

async fn fetch_partition_names(pool: &PgPool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT pt.relname::text \
         FROM pg_class base_tb \
             JOIN pg_inherits i ON i.inhparent = base_tb.oid \
             JOIN pg_class pt ON pt.oid = i.inhrelid \
         WHERE pt.relpartbound IS NOT NULL",
    )
    .fetch_all(pool)
    .await
    .context("failed to list partitions")?;

    rows.iter()
        .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
        .collect()
}

async fn fetch_table_names(pool: &PgPool, settings: &Settings) -> Result<Vec<String>> {
    let sql = table_names_sql(settings);
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .context("failed to list tables")?;

    rows.iter()
        .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
        .collect()
}

fn table_names_sql(settings: &Settings) -> String {
    let mut sql = "SELECT t.table_name::text \
                   FROM information_schema.tables t \
                   WHERE t.table_schema = 'public' \
                     AND t.table_type = 'BASE TABLE' \
                     AND t.table_name NOT LIKE '\\_%'"
        .to_string();
    if !settings.excluded_tables.is_empty() {
        let excluded = settings
            .excluded_tables
            .iter()
            .sorted()
            .map(|name| quote_literal(name))
            .join(", ");
        sql.push_str(&format!(" AND t.table_name NOT IN ({excluded})"));
    }
    sql
}

/// One row per (column, constraint): a column carrying several constraints
/// arrives several times and accumulates its constraint kinds.
fn table_columns_sql(table_names: &[String]) -> String {
    let names = table_names.iter().map(|name| quote_literal(name)).join(", ");
    format!(
        "SELECT \
             col.table_name::text, \
             col.column_name::text, \
             col.data_type::text, \
             col.ordinal_position::int, \
             COALESCE(constr_col_usage.table_name, constr_col_usage_fk.table_name)::text \
                 AS constraint_table_name, \
             constr.constraint_type::text \
         FROM information_schema.columns col \
             LEFT JOIN information_schema.key_column_usage key_col_usage \
                 ON key_col_usage.table_catalog = col.table_catalog \
                 AND key_col_usage.table_schema = col.table_schema \
                 AND key_col_usage.table_name = col.table_name \
                 AND key_col_usage.column_name = col.column_name \
             LEFT JOIN information_schema.table_constraints constr \
                 ON constr.table_catalog = key_col_usage.table_catalog \
                 AND constr.table_schema = key_col_usage.table_schema \
                 AND constr.table_name = key_col_usage.table_name \
                 AND constr.constraint_catalog = key_col_usage.constraint_catalog \
                 AND constr.constraint_schema = key_col_usage.constraint_schema \
                 AND constr.constraint_name = key_col_usage.constraint_name \
                 AND constr.constraint_type IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY') \
             LEFT JOIN information_schema.constraint_column_usage constr_col_usage \
                 ON constr_col_usage.constraint_catalog = key_col_usage.constraint_catalog \
                 AND constr_col_usage.constraint_schema = key_col_usage.constraint_schema \
                 AND constr_col_usage.constraint_name = key_col_usage.constraint_name \
                 AND constr_col_usage.column_name = key_col_usage.column_name \
                 AND constr.constraint_type IN ('PRIMARY KEY', 'UNIQUE') \
             LEFT JOIN information_schema.constraint_column_usage constr_col_usage_fk \
                 ON constr_col_usage_fk.constraint_catalog = key_col_usage.constraint_catalog \
                 AND constr_col_usage_fk.constraint_schema = key_col_usage.constraint_schema \
                 AND constr_col_usage_fk.constraint_name = key_col_usage.constraint_name \
                 AND constr.constraint_type IN ('FOREIGN KEY') \
         WHERE \
             col.table_schema = 'public' \
             AND col.table_name IN ({names})"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_sql_omits_empty_exclusion_list() {
        let sql = table_names_sql(&Settings::default());
        assert!(!sql.contains("NOT IN"));

        let settings = Settings {
            excluded_tables: ["audit".to_string()].into_iter().collect(),
            ..Settings::default()
        };
        let sql = table_names_sql(&settings);
        assert!(sql.contains("NOT IN ('audit')"));
    }

    #[test]
    fn test_table_columns_sql_quotes_names() {
        let sql = table_columns_sql(&["org".to_string(), "it's".to_string()]);
        assert!(sql.contains("col.table_name IN ('org', 'it''s')"));
        assert!(sql.contains("constraint_type IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY')"));
    }
}
