use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entity::{PermissionType, QueryBuilderPermission};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryBuilderPermissionRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<QueryBuilderPermission>>;
    async fn find_by_query_builder(
        &self,
        query_builder_id: Uuid,
    ) -> anyhow::Result<Vec<QueryBuilderPermission>>;
    async fn find_for_user(
        &self,
        query_builder_id: Uuid,
        user_id: Uuid,
        permission_type: PermissionType,
    ) -> anyhow::Result<Option<QueryBuilderPermission>>;
    async fn find_for_roles(
        &self,
        query_builder_id: Uuid,
        roles: &[String],
        permission_type: PermissionType,
    ) -> anyhow::Result<Vec<QueryBuilderPermission>>;
    /// (定義, 主体, 種別) が一致するレコードがあれば is_allowed を上書きし、なければ挿入する。
    async fn upsert(
        &self,
        permission: &QueryBuilderPermission,
    ) -> anyhow::Result<QueryBuilderPermission>;
    async fn update_allowed(
        &self,
        id: Uuid,
        is_allowed: bool,
    ) -> anyhow::Result<Option<QueryBuilderPermission>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}
