//! テスト用インメモリリポジトリとヘルパー。
//! 統合テスト（tests/integration_test.rs）から利用する。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::adapter::handler::AppState;
use crate::domain::entity::{
    ColumnInfo, PermissionType, QueryBuilder, QueryBuilderPermission, RelationInfo, TableInfo,
    UpdateQueryBuilder, SERVICE_SCHEMA,
};
use crate::domain::repository::{
    QueryBuilderPermissionRepository, QueryBuilderRepository, QueryRunner, Row,
    SchemaIntrospector,
};
use crate::domain::service::column_policy::ColumnPolicy;
use crate::domain::service::sql_builder::BuiltQuery;
use crate::infrastructure::metrics::Metrics;
use crate::usecase::{
    ExecuteQueryUseCase, GetAvailableColumnsUseCase, IntrospectSchemaUseCase,
    ManageQueryBuildersUseCase, QueryBuilderPermissionUseCase, QueryLimits,
};

pub const TEST_SCHEMA: &str = "public";

/// テスト用 AppState のテナント分離カラム。
pub const TEST_TENANT_COLUMN: &str = "company_id";

// ---------------------------------------------------------------------------
// InMemoryQueryBuilderRepository
// ---------------------------------------------------------------------------

/// テスト用インメモリ QueryBuilderRepository 実装。
#[derive(Default)]
pub struct InMemoryQueryBuilderRepository {
    query_builders: RwLock<Vec<QueryBuilder>>,
}

impl InMemoryQueryBuilderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryBuilderRepository for InMemoryQueryBuilderRepository {
    async fn find_all(&self) -> anyhow::Result<Vec<QueryBuilder>> {
        let mut all = self.query_builders.read().await.clone();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<QueryBuilder>> {
        let all = self.query_builders.read().await;
        Ok(all.iter().find(|q| q.id == id).cloned())
    }

    async fn create(&self, query_builder: &QueryBuilder) -> anyhow::Result<()> {
        self.query_builders.write().await.push(query_builder.clone());
        Ok(())
    }

    async fn update(&self, id: Uuid, input: &UpdateQueryBuilder) -> anyhow::Result<bool> {
        let mut all = self.query_builders.write().await;
        let Some(qb) = all.iter_mut().find(|q| q.id == id) else {
            return Ok(false);
        };
        if let Some(ref v) = input.name {
            qb.name.clone_from(v);
        }
        if let Some(ref v) = input.description {
            qb.description.clone_from(v);
        }
        if let Some(ref v) = input.database {
            qb.database.clone_from(v);
        }
        if let Some(ref v) = input.main_table {
            qb.main_table.clone_from(v);
        }
        if let Some(v) = input.is_public {
            qb.is_public = v;
        }
        if let Some(v) = input.max_rows {
            qb.max_rows = v;
        }
        if let Some(ref v) = input.settings {
            qb.settings = v.clone();
        }
        if let Some(ref v) = input.layout {
            qb.layout = v.clone();
        }
        if let Some(ref columns) = input.columns {
            qb.columns = columns.iter().cloned().map(|c| c.into_column(id)).collect();
        }
        if let Some(ref joins) = input.joins {
            qb.joins = joins.iter().cloned().map(|j| j.into_join(id)).collect();
        }
        if let Some(ref fields) = input.calculated_fields {
            qb.calculated_fields = fields
                .iter()
                .cloned()
                .map(|f| f.into_calculated_field(id))
                .collect();
        }
        qb.updated_at = chrono::Utc::now();
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut all = self.query_builders.write().await;
        let before = all.len();
        all.retain(|q| q.id != id);
        Ok(all.len() < before)
    }
}

// ---------------------------------------------------------------------------
// InMemoryPermissionRepository
// ---------------------------------------------------------------------------

/// テスト用インメモリ QueryBuilderPermissionRepository 実装。
#[derive(Default)]
pub struct InMemoryPermissionRepository {
    permissions: RwLock<Vec<QueryBuilderPermission>>,
}

impl InMemoryPermissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.permissions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.permissions.read().await.is_empty()
    }
}

#[async_trait]
impl QueryBuilderPermissionRepository for InMemoryPermissionRepository {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<QueryBuilderPermission>> {
        let all = self.permissions.read().await;
        Ok(all.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_query_builder(
        &self,
        query_builder_id: Uuid,
    ) -> anyhow::Result<Vec<QueryBuilderPermission>> {
        let all = self.permissions.read().await;
        Ok(all
            .iter()
            .filter(|p| p.query_builder_id == query_builder_id)
            .cloned()
            .collect())
    }

    async fn find_for_user(
        &self,
        query_builder_id: Uuid,
        user_id: Uuid,
        permission_type: PermissionType,
    ) -> anyhow::Result<Option<QueryBuilderPermission>> {
        let all = self.permissions.read().await;
        Ok(all
            .iter()
            .find(|p| {
                p.query_builder_id == query_builder_id
                    && p.user_id == Some(user_id)
                    && p.permission_type == permission_type
            })
            .cloned())
    }

    async fn find_for_roles(
        &self,
        query_builder_id: Uuid,
        roles: &[String],
        permission_type: PermissionType,
    ) -> anyhow::Result<Vec<QueryBuilderPermission>> {
        let all = self.permissions.read().await;
        Ok(all
            .iter()
            .filter(|p| {
                p.query_builder_id == query_builder_id
                    && p.permission_type == permission_type
                    && p.role_id.as_ref().is_some_and(|r| roles.contains(r))
            })
            .cloned()
            .collect())
    }

    async fn upsert(
        &self,
        permission: &QueryBuilderPermission,
    ) -> anyhow::Result<QueryBuilderPermission> {
        let mut all = self.permissions.write().await;
        if let Some(existing) = all.iter_mut().find(|p| {
            p.query_builder_id == permission.query_builder_id
                && p.permission_type == permission.permission_type
                && p.same_subject(permission)
        }) {
            existing.is_allowed = permission.is_allowed;
            return Ok(existing.clone());
        }
        all.push(permission.clone());
        Ok(permission.clone())
    }

    async fn update_allowed(
        &self,
        id: Uuid,
        is_allowed: bool,
    ) -> anyhow::Result<Option<QueryBuilderPermission>> {
        let mut all = self.permissions.write().await;
        Ok(all.iter_mut().find(|p| p.id == id).map(|p| {
            p.is_allowed = is_allowed;
            p.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut all = self.permissions.write().await;
        let before = all.len();
        all.retain(|p| p.id != id);
        Ok(all.len() < before)
    }
}

// ---------------------------------------------------------------------------
// StaticSchemaIntrospector
// ---------------------------------------------------------------------------

/// 固定のカタログを返す SchemaIntrospector。
#[derive(Default)]
pub struct StaticSchemaIntrospector {
    tables: Vec<TableInfo>,
    columns: HashMap<String, Vec<ColumnInfo>>,
    relations: Vec<RelationInfo>,
    databases: Vec<String>,
    schemas: Vec<String>,
}

impl StaticSchemaIntrospector {
    pub fn new() -> Self {
        Self {
            databases: vec!["query_builder_db".to_string()],
            schemas: vec![TEST_SCHEMA.to_string(), SERVICE_SCHEMA.to_string()],
            ..Self::default()
        }
    }

    pub fn with_table(mut self, name: &str, columns: Vec<ColumnInfo>) -> Self {
        self.tables.push(TableInfo {
            table_name: name.to_string(),
            schema_name: TEST_SCHEMA.to_string(),
            comment: None,
        });
        self.columns.insert(name.to_string(), columns);
        self
    }

    pub fn with_relation(mut self, source: (&str, &str), target: (&str, &str)) -> Self {
        self.relations.push(RelationInfo {
            constraint_name: format!("fk_{}_{}", source.0, source.1),
            source_table: source.0.to_string(),
            source_column: source.1.to_string(),
            target_table: target.0.to_string(),
            target_column: target.1.to_string(),
        });
        self
    }
}

#[async_trait]
impl SchemaIntrospector for StaticSchemaIntrospector {
    async fn list_tables(&self, schema: &str) -> anyhow::Result<Vec<TableInfo>> {
        Ok(self
            .tables
            .iter()
            .filter(|t| t.schema_name == schema)
            .cloned()
            .collect())
    }

    async fn list_columns(&self, schema: &str, table: &str) -> anyhow::Result<Vec<ColumnInfo>> {
        if schema != TEST_SCHEMA {
            return Ok(Vec::new());
        }
        Ok(self.columns.get(table).cloned().unwrap_or_default())
    }

    async fn list_relations(
        &self,
        schema: &str,
        table: &str,
    ) -> anyhow::Result<Vec<RelationInfo>> {
        if schema != TEST_SCHEMA {
            return Ok(Vec::new());
        }
        Ok(self
            .relations
            .iter()
            .filter(|r| r.source_table == table || r.target_table == table)
            .cloned()
            .collect())
    }

    async fn list_databases(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.databases.clone())
    }

    async fn list_schemas(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.schemas.clone())
    }
}

/// カタログ用のカラム情報を作る。
pub fn column_info(name: &str, data_type: &str) -> ColumnInfo {
    ColumnInfo {
        column_name: name.to_string(),
        data_type: data_type.to_string(),
        is_nullable: true,
        default_value: None,
        max_length: None,
        numeric_precision: None,
        numeric_scale: None,
        is_primary_key: name == "id",
        is_foreign_key: false,
        referenced_table: None,
        referenced_column: None,
        comment: None,
    }
}

/// orders / customers、テナント分離された invoices、機密カラムを持つ users と
/// 内部テーブルからなるカタログ。
pub fn sample_introspector() -> StaticSchemaIntrospector {
    StaticSchemaIntrospector::new()
        .with_table(
            "orders",
            vec![
                column_info("id", "integer"),
                column_info("customer_id", "integer"),
                column_info("amount", "numeric"),
                column_info("quantity", "integer"),
                column_info("status", "character varying"),
                column_info("created_at", "timestamp with time zone"),
            ],
        )
        .with_table(
            "customers",
            vec![column_info("id", "integer"), column_info("name", "text")],
        )
        .with_table(
            "invoices",
            vec![
                column_info("id", "integer"),
                column_info(TEST_TENANT_COLUMN, "character varying"),
                column_info("total", "numeric"),
            ],
        )
        .with_table(
            "users",
            vec![
                column_info("id", "uuid"),
                column_info("email", "text"),
                column_info("password_hash", "text"),
            ],
        )
        .with_table("_sqlx_migrations", vec![column_info("version", "bigint")])
        .with_relation(("orders", "customer_id"), ("customers", "id"))
}

// ---------------------------------------------------------------------------
// RecordingQueryRunner
// ---------------------------------------------------------------------------

/// 固定の行を返し、受け取ったクエリを記録する QueryRunner。
#[derive(Default)]
pub struct RecordingQueryRunner {
    rows: Vec<Row>,
    total: i64,
    executed: RwLock<Vec<BuiltQuery>>,
}

impl RecordingQueryRunner {
    pub fn new(rows: Vec<Row>, total: i64) -> Self {
        Self {
            rows,
            total,
            executed: RwLock::new(Vec::new()),
        }
    }

    pub async fn executed(&self) -> Vec<BuiltQuery> {
        self.executed.read().await.clone()
    }
}

#[async_trait]
impl QueryRunner for RecordingQueryRunner {
    async fn count(&self, _query: &BuiltQuery) -> anyhow::Result<i64> {
        Ok(self.total)
    }

    async fn fetch(&self, query: &BuiltQuery) -> anyhow::Result<Vec<Row>> {
        self.executed.write().await.push(query.clone());
        let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
        Ok(self.rows.iter().take(limit).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// make_test_app_state
// ---------------------------------------------------------------------------

/// テスト用のカラムポリシー。password_hash を機密とし、company_id でテナントを分離する。
pub fn test_column_policy() -> ColumnPolicy {
    ColumnPolicy::new(["password_hash"], Some(TEST_TENANT_COLUMN.to_string()))
}

/// テスト用 AppState を構築するヘルパー。認証なし（開発用ヘッダー）で動作する。
pub fn make_test_app_state(
    query_builder_repo: Arc<dyn QueryBuilderRepository>,
    permission_repo: Arc<dyn QueryBuilderPermissionRepository>,
    introspector: Arc<dyn SchemaIntrospector>,
    runner: Arc<dyn QueryRunner>,
) -> anyhow::Result<AppState> {
    let permission_uc = Arc::new(QueryBuilderPermissionUseCase::new(
        query_builder_repo.clone(),
        permission_repo,
    ));
    let manage_uc = Arc::new(ManageQueryBuildersUseCase::new(
        query_builder_repo.clone(),
        permission_uc.clone(),
    ));
    let execute_uc = Arc::new(ExecuteQueryUseCase::new(
        query_builder_repo,
        permission_uc.clone(),
        introspector.clone(),
        runner,
        TEST_SCHEMA,
        QueryLimits::default(),
    )
    .with_column_policy(test_column_policy()));
    let available_columns_uc = Arc::new(
        GetAvailableColumnsUseCase::new(manage_uc.clone(), introspector.clone(), TEST_SCHEMA)
            .with_column_policy(test_column_policy()),
    );
    let schema_uc = Arc::new(
        IntrospectSchemaUseCase::new(introspector, TEST_SCHEMA)
            .with_column_policy(test_column_policy()),
    );

    Ok(AppState {
        manage_uc,
        permission_uc,
        execute_uc,
        available_columns_uc,
        schema_uc,
        metrics: Arc::new(Metrics::new("query_builder_test")?),
        auth_state: None,
        db_pool: None,
        default_max_rows: 1000,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_permission_upsert_replaces_same_subject() {
        let repo = InMemoryPermissionRepository::new();
        let qb_id = Uuid::new_v4();
        let user = Uuid::new_v4();

        tokio_test::block_on(async {
            let first = repo
                .upsert(&QueryBuilderPermission::for_user(
                    qb_id,
                    user,
                    PermissionType::Execute,
                    true,
                ))
                .await
                .unwrap();
            let second = repo
                .upsert(&QueryBuilderPermission::for_user(
                    qb_id,
                    user,
                    PermissionType::Execute,
                    false,
                ))
                .await
                .unwrap();
            assert_eq!(first.id, second.id);
            assert!(!second.is_allowed);
            assert_eq!(repo.len().await, 1);
        });
    }

    #[test]
    fn test_sample_introspector_relations() {
        let introspector = sample_introspector();
        let relations =
            tokio_test::block_on(introspector.list_relations(TEST_SCHEMA, "customers")).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].source_column, "customer_id");
    }
}
