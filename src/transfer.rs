//! Destination-side operations around the physical copy: truncation,
//! trigger toggling, the chunked `INSERT ... SELECT` through the staging
//! schema, and the final sequence adjustment.

use anyhow::{Context, Result};
use futures_util::{StreamExt, TryStreamExt, stream};
use sqlx::{PgPool, Row};
use tracing::{error, info, warn};

use crate::collect::CollectorContext;
use crate::config::Settings;
use crate::constants::{CHUNK_SIZE, SEQUENCE_HEADROOM};
use crate::schema::{SchemaModel, Table};
use crate::sql;

/// Truncate the destination tables, honouring the include/exclude lists.
/// Generic-FK tables stay untouched unless explicitly included.
pub async fn truncate_tables(dst_pool: &PgPool, settings: &Settings, model: &SchemaModel) -> Result<()> {
    if !settings.is_truncate_tables {
        return Ok(());
    }
    info!("start truncating tables..");

    let table_names = truncate_table_names(settings, model);
    for batch in table_names.chunks(settings.tables_limit_per_transaction.max(1)) {
        let statement = sql::truncate_sql(batch);
        sqlx::query(&statement)
            .execute(dst_pool)
            .await
            .with_context(|| format!("truncate failed: {statement}"))?;
    }

    info!("truncating tables finished.");
    Ok(())
}

fn truncate_table_names(settings: &Settings, model: &SchemaModel) -> Vec<String> {
    let mut table_names: Vec<String> = if settings.tables_truncate_included.is_empty() {
        model
            .tables()
            .map(|t| t.name.clone())
            .filter(|name| {
                !settings
                    .tables_with_generic_foreign_key
                    .iter()
                    .any(|g| g == name)
            })
            .collect()
    } else {
        settings.tables_truncate_included.clone()
    };
    table_names.retain(|name| !settings.tables_truncate_excluded.contains(name));
    table_names
}

pub async fn disable_triggers(dst_pool: &PgPool) -> Result<()> {
    sqlx::query(&sql::disable_triggers_sql())
        .execute(dst_pool)
        .await
        .context("failed to disable triggers")?;
    info!("triggers disabled.");
    Ok(())
}

pub async fn enable_triggers(dst_pool: &PgPool) -> Result<()> {
    sqlx::query(&sql::enable_triggers_sql())
        .execute(dst_pool)
        .await
        .context("failed to enable triggers")?;
    info!("triggers enabled.");
    Ok(())
}

/// Copy every collected table through the staging schema into the
/// destination's public schema. Tables run concurrently; the chunks of one
/// table run in order.
pub async fn transfer_collected(ctx: &CollectorContext) -> Result<()> {
    info!("start transferring collected data..");

    let tables: Vec<&Table> = ctx
        .model
        .tables()
        .filter(|t| t.is_ready_for_transferring() && t.need_transfer_len() > 0)
        .collect();

    stream::iter(tables.into_iter().map(|table| transfer_table(ctx, table)))
        .buffer_unordered(ctx.parallelism())
        .try_collect::<Vec<_>>()
        .await?;

    info!("finished transferring collected data.");
    Ok(())
}

async fn transfer_table(ctx: &CollectorContext, table: &Table) -> Result<()> {
    let snapshot = table.need_transfer_snapshot();
    let pk_values: Vec<_> = snapshot.iter().collect();

    for chunk in pk_values.chunks(CHUNK_SIZE) {
        let Some(statement) = sql::transfer_records_sql(table, chunk.iter().copied()) else {
            warn!("table {:?} has no usable primary key, skipping", table.name);
            return Ok(());
        };
        let result = sqlx::query(&statement)
            .execute(&ctx.dst_pool)
            .await
            .with_context(|| format!("transfer failed for table {:?}", table.name))?;
        table.add_transferred(result.rows_affected());
    }

    info!(
        "table {} transferred {} of {} records",
        table.name,
        table.transferred_count(),
        snapshot.len()
    );
    Ok(())
}

/// Bump every serial sequence past the highest transferred key. Tables with
/// non-numeric keys have no meaningful maximum and are skipped, as are
/// sequences the destination cannot resolve.
pub async fn set_max_sequences(dst_pool: &PgPool, model: &SchemaModel, parallelism: u32) -> Result<()> {
    info!("update sequences");

    let jobs: Vec<&Table> = model
        .tables()
        .filter(|t| {
            t.max_pk.is_some()
                && t.primary_key_column()
                    .is_some_and(|pk| pk.is_numeric())
        })
        .collect();

    stream::iter(jobs.into_iter().map(|table| set_table_sequence(dst_pool, table)))
        .buffer_unordered(parallelism.max(1) as usize)
        .collect::<Vec<_>>()
        .await;

    Ok(())
}

async fn set_table_sequence(dst_pool: &PgPool, table: &Table) {
    let Some(pk) = table.primary_key_column() else {
        return;
    };
    let Some(max_pk) = table.max_pk else {
        return;
    };

    let lookup = sql::serial_sequence_sql(&table.name, &pk.name);
    let sequence_name: Option<String> = match sqlx::query(&lookup).fetch_one(dst_pool).await {
        Ok(row) => row.try_get(0).ok().flatten(),
        Err(e) => {
            error!("{e} --- {} --- set_max_sequence", table.name);
            return;
        }
    };
    let Some(sequence_name) = sequence_name else {
        return;
    };

    let statement = sql::set_sequence_value_sql(&sequence_name, max_pk + SEQUENCE_HEADROOM);
    if let Err(e) = sqlx::query(&statement).execute(dst_pool).await {
        error!("{e} --- {} --- set_max_sequence", table.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::schema::SchemaModel;

    fn model_with(names: &[&str]) -> SchemaModel {
        let mut model = SchemaModel::new();
        for name in names {
            model.insert_table(name);
        }
        model.finalize(&Settings::default());
        model
    }

    #[test]
    fn test_truncate_selection_defaults_to_non_generic_tables() {
        let settings = Settings {
            is_truncate_tables: true,
            tables_with_generic_foreign_key: vec!["comment".to_string()],
            ..Settings::default()
        };
        let model = model_with(&["org", "comment", "task"]);
        assert_eq!(
            truncate_table_names(&settings, &model),
            vec!["org".to_string(), "task".to_string()]
        );
    }

    #[test]
    fn test_truncate_include_list_wins_and_excludes_apply() {
        let settings = Settings {
            is_truncate_tables: true,
            tables_truncate_included: vec!["org".to_string(), "task".to_string()],
            tables_truncate_excluded: ["task".to_string()].into_iter().collect(),
            ..Settings::default()
        };
        let model = model_with(&["org", "task", "misc"]);
        assert_eq!(truncate_table_names(&settings, &model), vec!["org".to_string()]);
    }
}
