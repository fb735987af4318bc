use async_trait::async_trait;

use crate::domain::entity::{ColumnInfo, RelationInfo, TableInfo};

/// ライブデータベースのカタログ情報を読み取る。キャッシュは持たない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn list_tables(&self, schema: &str) -> anyhow::Result<Vec<TableInfo>>;
    /// 存在しないテーブルに対しては空の Vec を返す。
    async fn list_columns(&self, schema: &str, table: &str) -> anyhow::Result<Vec<ColumnInfo>>;
    async fn list_relations(&self, schema: &str, table: &str)
        -> anyhow::Result<Vec<RelationInfo>>;
    async fn list_databases(&self) -> anyhow::Result<Vec<String>>;
    async fn list_schemas(&self) -> anyhow::Result<Vec<String>>;
}
