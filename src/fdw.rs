//! Sets up and tears down the `postgres_fdw` staging path on the
//! destination: extension, foreign server, user mapping, and the imported
//! copy of the source's public schema.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::config::Settings;
use crate::sql;

pub struct FdwStaging<'a> {
    settings: &'a Settings,
    dst_pool: &'a PgPool,
}

impl<'a> FdwStaging<'a> {
    pub fn new(settings: &'a Settings, dst_pool: &'a PgPool) -> Self {
        Self { settings, dst_pool }
    }

    /// Create the whole staging path and import the listed tables.
    pub async fn enable(&self, table_names: &[String]) -> Result<()> {
        info!("enable postgres_fdw staging schema");

        let statements = [
            sql::create_fdw_extension_sql(),
            sql::create_server_sql(
                &self.settings.src.host,
                self.settings.src.port,
                &self.settings.src.dbname,
            ),
            sql::create_user_mapping_sql(
                &self.settings.dst.user,
                &self.settings.src.user,
                &self.settings.src.password,
            ),
            sql::create_staging_schema_sql(&self.settings.dst.user),
            sql::import_foreign_schema_sql("public", table_names),
        ];
        self.run(&statements).await
    }

    /// Drop the staging schema, the user mapping, and the extension.
    pub async fn disable(&self) -> Result<()> {
        info!("disable postgres_fdw staging schema");

        let statements = [
            sql::drop_staging_schema_sql(),
            sql::drop_user_mapping_sql(&self.settings.dst.user),
            sql::drop_fdw_extension_sql(),
        ];
        self.run(&statements).await
    }

    async fn run(&self, statements: &[String]) -> Result<()> {
        for statement in statements {
            sqlx::query(statement)
                .execute(self.dst_pool)
                .await
                .with_context(|| format!("fdw statement failed: {statement}"))?;
        }
        Ok(())
    }
}
