use async_trait::async_trait;

use crate::domain::service::sql_builder::BuiltQuery;

pub type Row = serde_json::Map<String, serde_json::Value>;

/// 組み立て済みのパラメータ化クエリをテナント DB 上で実行する。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn count(&self, query: &BuiltQuery) -> anyhow::Result<i64>;
    async fn fetch(&self, query: &BuiltQuery) -> anyhow::Result<Vec<Row>>;
}
