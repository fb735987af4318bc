use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, TypeInfo};

use crate::domain::repository::{QueryRunner, Row};
use crate::domain::service::sql_builder::{BuiltQuery, SqlParam};

/// 保存済みクエリの実行に使う文のタイムアウト
const STATEMENT_TIMEOUT: &str = "SET LOCAL statement_timeout = '30s'";

/// 組み立て済み SQL を読み取り専用トランザクションで実行する。
pub struct PostgresQueryRunner {
    pool: PgPool,
}

impl PostgresQueryRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.as_str()),
            SqlParam::Number(v) => query.bind(*v),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::TextList(v) => query.bind(v.as_slice()),
            SqlParam::NumberList(v) => query.bind(v.as_slice()),
        };
    }
    query
}

/// PgRow を JSON オブジェクトに変換する。
fn row_to_json(row: &PgRow) -> Row {
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name().to_string();
        let idx = col.ordinal();
        let value = match col.type_info().name() {
            "BOOL" => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::Bool),
            "INT2" => row
                .try_get::<Option<i16>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::from),
            "INT4" => row
                .try_get::<Option<i32>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::from),
            "INT8" => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::from),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, |v| Value::from(f64::from(v))),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::from),
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, |v| Value::String(v.to_string())),
            "JSON" | "JSONB" => row
                .try_get::<Option<Value>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(Value::Null),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, |v| Value::String(v.to_string())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, |v| Value::String(v.to_string())),
            _ => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::String),
        };
        map.insert(name, value);
    }
    map
}

#[async_trait]
impl QueryRunner for PostgresQueryRunner {
    async fn count(&self, query: &BuiltQuery) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        sqlx::query(STATEMENT_TIMEOUT).execute(&mut *tx).await?;

        let row = bind_params(sqlx::query(&query.count_sql), &query.params)
            .fetch_one(&mut *tx)
            .await?;
        let total: i64 = row.try_get(0)?;
        tx.commit().await?;
        Ok(total)
    }

    async fn fetch(&self, query: &BuiltQuery) -> anyhow::Result<Vec<Row>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        sqlx::query(STATEMENT_TIMEOUT).execute(&mut *tx).await?;

        let rows = bind_params(sqlx::query(&query.data_sql), &query.params)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}
