use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::infrastructure::config::DatabaseConfig;

/// PostgreSQL 接続プールを作成する。DATABASE_URL が設定されていれば優先する。
pub async fn create_pool(cfg: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.connection_url());
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
        .connect(&url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../../database/query-builder-db/migrations")
        .run(pool)
        .await?;
    Ok(())
}
