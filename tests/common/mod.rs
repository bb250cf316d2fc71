//! Test harness: one isolated scratch database per test, created from
//! DATABASE_URL. Tests skip quietly when no server is configured, so the
//! suite passes on machines without PostgreSQL.

use anyhow::Result;
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use pgsubset::collect::{self, CollectorContext};
use pgsubset::config::Settings;
use pgsubset::schema::{PkValue, SchemaModel, loader};
use pgsubset::stats::StatisticManager;

pub struct TestDb {
    pub pool: PgPool,
    base_url: String,
    name: String,
}

/// Create an isolated scratch database, or `None` when DATABASE_URL is not
/// set.
pub async fn try_scratch_db() -> Option<TestDb> {
    dotenv::dotenv().ok();
    let Ok(base_url) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping: DATABASE_URL is not set");
        return None;
    };

    let name = format!("pgsubset_test_{}", Uuid::new_v4().simple());
    let admin = PgPool::connect(&base_url)
        .await
        .expect("failed to connect to DATABASE_URL");
    sqlx::query(&format!("CREATE DATABASE \"{name}\""))
        .execute(&admin)
        .await
        .expect("failed to create scratch database");
    admin.close().await;

    let db_url = match base_url.rfind('/') {
        Some(i) => format!("{}/{}", &base_url[..i], name),
        None => format!("{base_url}/{name}"),
    };
    let pool = PgPool::connect(&db_url)
        .await
        .expect("failed to connect to scratch database");

    Some(TestDb {
        pool,
        base_url,
        name,
    })
}

impl TestDb {
    pub async fn execute(&self, sql: &str) {
        use sqlx::Executor;
        self.pool
            .execute(sql)
            .await
            .unwrap_or_else(|e| panic!("failed to execute SQL: {sql}\nerror: {e}"));
    }

    /// Drop the scratch database, best effort.
    pub async fn cleanup(self) {
        self.pool.close().await;
        if let Ok(admin) = PgPool::connect(&self.base_url).await {
            let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name);
            let _ = sqlx::query(&drop_sql).execute(&admin).await;
            admin.close().await;
        }
    }
}

/// Settings for closure tests. The row-count slack is zeroed: fixtures are
/// tiny, and the production slack would make every table look fully
/// collected.
pub fn test_settings(key_table: &str, key_columns: &[&str], tenants: &[i64]) -> Settings {
    Settings {
        key_table_name: key_table.to_string(),
        key_column_names: key_columns.iter().map(|s| s.to_string()).collect(),
        key_column_values: tenants.to_vec(),
        row_count_slack: 0,
        ..Settings::default()
    }
}

/// Load the scratch database's schema and run the whole collection
/// pipeline against it (the scratch database acts as both source and
/// destination).
pub async fn collect_subset(
    db: &TestDb,
    settings: &Settings,
    chunk_size: Option<usize>,
) -> Result<Arc<SchemaModel>> {
    let mut model = loader::load_structure(&db.pool, settings).await?;
    loader::fill_row_counts(&mut model, &db.pool, 4).await?;

    let model = Arc::new(model);
    let mut ctx = CollectorContext::new(
        model.clone(),
        db.pool.clone(),
        db.pool.clone(),
        Arc::new(settings.clone()),
    );
    if let Some(size) = chunk_size {
        ctx = ctx.with_chunk_size(size);
    }

    let mut stats = StatisticManager::new();
    collect::run_stages(&ctx, &mut stats).await?;
    Ok(model)
}

/// The integer transfer set of a table, empty when the table is absent.
pub fn int_pks(model: &SchemaModel, table: &str) -> BTreeSet<i64> {
    model
        .get(table)
        .map(|t| {
            t.need_transfer_snapshot()
                .into_iter()
                .map(|v| match v {
                    PkValue::Int(i) => i,
                    PkValue::Text(s) => panic!("unexpected text pk {s}"),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn ints(values: &[i64]) -> BTreeSet<i64> {
    values.iter().copied().collect()
}
