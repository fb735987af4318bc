use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::{PermissionType, QueryBuilderPermission};
use crate::domain::repository::QueryBuilderPermissionRepository;

pub struct QueryBuilderPermissionPostgresRepository {
    pool: PgPool,
}

impl QueryBuilderPermissionPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PermissionRow {
    id: Uuid,
    query_builder_id: Uuid,
    user_id: Option<Uuid>,
    role_id: Option<String>,
    permission_type: String,
    is_allowed: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<PermissionRow> for QueryBuilderPermission {
    type Error = anyhow::Error;

    fn try_from(r: PermissionRow) -> Result<Self, Self::Error> {
        Ok(QueryBuilderPermission {
            id: r.id,
            query_builder_id: r.query_builder_id,
            user_id: r.user_id,
            role_id: r.role_id,
            permission_type: r.permission_type.parse()?,
            is_allowed: r.is_allowed,
            created_at: r.created_at,
        })
    }
}

fn into_permissions(rows: Vec<PermissionRow>) -> anyhow::Result<Vec<QueryBuilderPermission>> {
    rows.into_iter().map(QueryBuilderPermission::try_from).collect()
}

const SELECT_PERMISSION: &str = "SELECT id, query_builder_id, user_id, role_id, permission_type, \
     is_allowed, created_at FROM query_builder.query_builder_permissions";

const RETURNING_PERMISSION: &str =
    "RETURNING id, query_builder_id, user_id, role_id, permission_type, is_allowed, created_at";

#[async_trait]
impl QueryBuilderPermissionRepository for QueryBuilderPermissionPostgresRepository {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<QueryBuilderPermission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!("{SELECT_PERMISSION} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueryBuilderPermission::try_from).transpose()
    }

    async fn find_by_query_builder(
        &self,
        query_builder_id: Uuid,
    ) -> anyhow::Result<Vec<QueryBuilderPermission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(&format!(
            "{SELECT_PERMISSION} WHERE query_builder_id = $1 ORDER BY created_at, id"
        ))
        .bind(query_builder_id)
        .fetch_all(&self.pool)
        .await?;
        into_permissions(rows)
    }

    async fn find_for_user(
        &self,
        query_builder_id: Uuid,
        user_id: Uuid,
        permission_type: PermissionType,
    ) -> anyhow::Result<Option<QueryBuilderPermission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "{SELECT_PERMISSION} WHERE query_builder_id = $1 AND user_id = $2 AND permission_type = $3"
        ))
        .bind(query_builder_id)
        .bind(user_id)
        .bind(permission_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueryBuilderPermission::try_from).transpose()
    }

    async fn find_for_roles(
        &self,
        query_builder_id: Uuid,
        roles: &[String],
        permission_type: PermissionType,
    ) -> anyhow::Result<Vec<QueryBuilderPermission>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, PermissionRow>(&format!(
            "{SELECT_PERMISSION} WHERE query_builder_id = $1 AND role_id = ANY($2) AND permission_type = $3 \
             ORDER BY role_id"
        ))
        .bind(query_builder_id)
        .bind(roles)
        .bind(permission_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        into_permissions(rows)
    }

    async fn upsert(
        &self,
        permission: &QueryBuilderPermission,
    ) -> anyhow::Result<QueryBuilderPermission> {
        // 部分ユニークインデックスに合わせて対象を切り替える
        let conflict_target = if permission.user_id.is_some() {
            "(query_builder_id, user_id, permission_type) WHERE user_id IS NOT NULL"
        } else {
            "(query_builder_id, role_id, permission_type) WHERE role_id IS NOT NULL"
        };
        let sql = format!(
            "INSERT INTO query_builder.query_builder_permissions \
             (id, query_builder_id, user_id, role_id, permission_type, is_allowed, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT {conflict_target} DO UPDATE SET is_allowed = EXCLUDED.is_allowed \
             {RETURNING_PERMISSION}"
        );
        let row = sqlx::query_as::<_, PermissionRow>(&sql)
            .bind(permission.id)
            .bind(permission.query_builder_id)
            .bind(permission.user_id)
            .bind(&permission.role_id)
            .bind(permission.permission_type.as_str())
            .bind(permission.is_allowed)
            .bind(permission.created_at)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn update_allowed(
        &self,
        id: Uuid,
        is_allowed: bool,
    ) -> anyhow::Result<Option<QueryBuilderPermission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "UPDATE query_builder.query_builder_permissions SET is_allowed = $2 WHERE id = $1 \
             {RETURNING_PERMISSION}"
        ))
        .bind(id)
        .bind(is_allowed)
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueryBuilderPermission::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM query_builder.query_builder_permissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
