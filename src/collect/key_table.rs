//! Seeds the key table's transfer set straight from the configured tenant
//! values. No SQL runs here.

use anyhow::{Context, Result};
use tracing::info;

use super::CollectorContext;
use crate::schema::PkValue;

pub async fn collect(ctx: &CollectorContext) -> Result<()> {
    info!("prepare key table values...");

    let table = ctx
        .model
        .get(&ctx.settings.key_table_name)
        .with_context(|| {
            format!(
                "key table {:?} is not present in the destination schema",
                ctx.settings.key_table_name
            )
        })?;
    let pk = table
        .primary_key_column()
        .with_context(|| format!("key table {:?} has no usable primary key", table.name))?;

    let numeric = pk.is_numeric();
    table.update_need_transfer_pks(ctx.settings.key_column_values.iter().map(|&v| {
        if numeric {
            PkValue::Int(v)
        } else {
            PkValue::Text(v.to_string())
        }
    }));
    table.set_ready_for_transferring();

    info!("preparing key table values finished!");
    Ok(())
}
