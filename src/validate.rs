//! Post-transfer validation: every key-column value that landed on the
//! destination must belong to the requested tenant set (NULLs are allowed,
//! the selection deliberately carries them along).

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::{error, info};

use crate::config::Settings;
use crate::schema::SchemaModel;
use crate::sql::quote_ident;

pub async fn run_validators(
    dst_pool: &PgPool,
    model: &SchemaModel,
    settings: &Settings,
) -> Result<bool> {
    let is_valid = validate_key_column_tables(dst_pool, model, settings).await?;
    if is_valid {
        info!("validation --- TablesWithKeyColumnValidator --- ok --- Validation was successful.");
    }
    Ok(is_valid)
}

async fn validate_key_column_tables(
    dst_pool: &PgPool,
    model: &SchemaModel,
    settings: &Settings,
) -> Result<bool> {
    let allowed: HashSet<String> = settings
        .key_column_values
        .iter()
        .map(|v| v.to_string())
        .collect();

    let mut failures: Vec<String> = Vec::new();

    for id in model.tables_with_key_column() {
        let table = model.table(id);
        let Some(key_column) = table.key_column_ref() else {
            continue;
        };

        let sql = format!(
            "SELECT DISTINCT {}::text FROM {}",
            quote_ident(&key_column.name),
            quote_ident(&table.name),
        );
        let rows = sqlx::query(&sql)
            .fetch_all(dst_pool)
            .await
            .with_context(|| format!("validation query failed for table {:?}", table.name))?;

        let mut wrong: Vec<String> = Vec::new();
        for row in &rows {
            let value: Option<String> = row.try_get(0)?;
            if let Some(value) = value
                && !allowed.contains(&value)
            {
                wrong.push(value);
            }
        }

        if !wrong.is_empty() {
            wrong.sort();
            failures.push(format!(
                "Wrong key column \"{}\" ids found in table \"{}\" - {}!",
                key_column.name,
                table.name,
                wrong.join(", "),
            ));
        }
    }

    for failure in &failures {
        error!("validation --- TablesWithKeyColumnValidator --- {failure}");
    }
    Ok(failures.is_empty())
}
