use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entity::{QueryBuilder, UpdateQueryBuilder};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryBuilderRepository: Send + Sync {
    /// updated_at の降順で全定義を返す。
    async fn find_all(&self) -> anyhow::Result<Vec<QueryBuilder>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<QueryBuilder>>;
    async fn create(&self, query_builder: &QueryBuilder) -> anyhow::Result<()>;
    /// スカラー項目の更新と、指定されたサブコレクションの置き換えを 1 トランザクションで行う。
    /// 対象が存在しない場合は false を返す。
    async fn update(&self, id: Uuid, input: &UpdateQueryBuilder) -> anyhow::Result<bool>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_find_by_id_none() {
        let mut mock = MockQueryBuilderRepository::new();
        mock.expect_find_by_id().returning(|_| Ok(None));

        let result = mock.find_by_id(Uuid::new_v4()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_mock_delete() {
        let mut mock = MockQueryBuilderRepository::new();
        mock.expect_delete().returning(|_| Ok(true));

        assert!(mock.delete(Uuid::new_v4()).await.unwrap());
    }
}
