use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entity::{
    is_internal_table, PermissionType, QueryBuilder, QueryExecutionParams, QueryExecutionResult,
    Requester, ResultColumn,
};
use crate::domain::repository::{QueryBuilderRepository, QueryRunner, SchemaIntrospector};
use crate::domain::service::column_policy::ColumnPolicy;
use crate::domain::service::expression::evaluate_to_json;
use crate::domain::service::identifier::is_valid_identifier;
use crate::domain::service::sql_builder::{Catalog, SqlBuildError, SqlBuilder};
use crate::usecase::query_builder_permission::QueryBuilderPermissionUseCase;

/// 実行時の行数上限。
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    pub default_page_size: i64,
    pub hard_max_rows: i64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            hard_max_rows: 10_000,
        }
    }
}

impl QueryLimits {
    /// 1 ページの取得件数。要求値・定義の max_rows・全体上限の最小値。
    pub fn effective_limit(&self, requested: Option<i64>, max_rows: i32) -> i64 {
        requested
            .unwrap_or(self.default_page_size)
            .min(i64::from(max_rows))
            .min(self.hard_max_rows)
            .max(1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteQueryError {
    #[error("query builder not found: {0}")]
    NotFound(Uuid),
    #[error("You do not have permission to execute this query")]
    Forbidden,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("query execution failed: {0}")]
    Internal(String),
}

pub struct ExecuteQueryUseCase {
    repo: Arc<dyn QueryBuilderRepository>,
    permission_uc: Arc<QueryBuilderPermissionUseCase>,
    introspector: Arc<dyn SchemaIntrospector>,
    runner: Arc<dyn QueryRunner>,
    schema: String,
    limits: QueryLimits,
    policy: ColumnPolicy,
}

impl ExecuteQueryUseCase {
    pub fn new(
        repo: Arc<dyn QueryBuilderRepository>,
        permission_uc: Arc<QueryBuilderPermissionUseCase>,
        introspector: Arc<dyn SchemaIntrospector>,
        runner: Arc<dyn QueryRunner>,
        schema: impl Into<String>,
        limits: QueryLimits,
    ) -> Self {
        Self {
            repo,
            permission_uc,
            introspector,
            runner,
            schema: schema.into(),
            limits,
            policy: ColumnPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_column_policy(mut self, policy: ColumnPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 定義が参照するテーブルのカラム情報をカタログから取得する。
    async fn load_catalog(&self, definition: &QueryBuilder) -> Result<Catalog, ExecuteQueryError> {
        let mut tables = vec![definition.main_table.as_str()];
        tables.extend(definition.joins.iter().map(|j| j.to_table.as_str()));

        let mut seen = HashSet::new();
        let mut catalog = Catalog::new();
        for table in tables {
            if !seen.insert(table) || !is_valid_identifier(table) {
                continue;
            }
            if is_internal_table(table) {
                return Err(ExecuteQueryError::Validation(format!(
                    "table '{}' is not accessible",
                    table
                )));
            }
            let columns = self
                .introspector
                .list_columns(&self.schema, table)
                .await
                .map_err(|e| ExecuteQueryError::Internal(e.to_string()))?;
            catalog.insert(table.to_string(), columns);
        }
        Ok(catalog)
    }

    pub async fn execute(
        &self,
        id: Uuid,
        params: QueryExecutionParams,
        requester: &Requester,
    ) -> Result<QueryExecutionResult, ExecuteQueryError> {
        let definition = self
            .repo
            .find_by_id(id)
            .await
            .map_err(|e| ExecuteQueryError::Internal(e.to_string()))?
            .ok_or(ExecuteQueryError::NotFound(id))?;

        let allowed = definition.is_public
            || definition.is_owned_by(requester.user_id)
            || self
                .permission_uc
                .check_permission(id, requester, PermissionType::Execute)
                .await
                .map_err(|e| ExecuteQueryError::Internal(e.to_string()))?;
        if !allowed {
            tracing::warn!(query_builder_id = %id, user_id = %requester.user_id, "execution denied");
            return Err(ExecuteQueryError::Forbidden);
        }

        let catalog = self.load_catalog(&definition).await?;

        let page = params.page.unwrap_or(1).max(1);
        let limit = self
            .limits
            .effective_limit(params.page_size, definition.max_rows);
        let offset = (page - 1).saturating_mul(limit);

        let built = SqlBuilder::new(&self.schema, &catalog)
            .with_policy(&self.policy, requester.tenant_id.as_deref())
            .build(&definition, &params, limit, offset)
            .map_err(|e| match e {
                SqlBuildError::MissingTenant(table) => {
                    tracing::warn!(
                        query_builder_id = %id,
                        user_id = %requester.user_id,
                        table = %table,
                        "tenant required for execution"
                    );
                    ExecuteQueryError::Forbidden
                }
                e => ExecuteQueryError::Validation(e.to_string()),
            })?;

        let total = self.runner.count(&built).await.map_err(|e| {
            tracing::error!(query_builder_id = %id, error = %e, "count query failed");
            ExecuteQueryError::Internal(e.to_string())
        })?;
        let mut rows = self.runner.fetch(&built).await.map_err(|e| {
            tracing::error!(query_builder_id = %id, error = %e, "data query failed");
            ExecuteQueryError::Internal(e.to_string())
        })?;

        let mut calculated: Vec<_> = definition.calculated_fields.iter().collect();
        calculated.sort_by_key(|f| f.display_order);

        let hidden: Vec<&str> = built
            .columns
            .iter()
            .filter(|c| !c.is_visible)
            .map(|c| c.name.as_str())
            .chain(
                calculated
                    .iter()
                    .filter(|f| !f.is_visible)
                    .map(|f| f.name.as_str()),
            )
            .collect();

        for row in &mut rows {
            // 後続の計算フィールドから先行の結果を参照できるよう順に挿入する
            for field in &calculated {
                let value = evaluate_to_json(&field.expression, row);
                row.insert(field.name.clone(), value);
            }
            for name in &hidden {
                row.remove(*name);
            }
        }

        let mut columns: Vec<ResultColumn> = built
            .columns
            .iter()
            .filter(|c| c.is_visible)
            .map(|c| ResultColumn {
                name: c.name.clone(),
                label: c.label.clone(),
                data_type: c.data_type.clone(),
                is_calculated: false,
            })
            .collect();
        columns.extend(calculated.iter().filter(|f| f.is_visible).map(|f| ResultColumn {
            name: f.name.clone(),
            label: f.label.clone(),
            data_type: f.data_type.clone(),
            is_calculated: true,
        }));

        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        tracing::info!(
            query_builder_id = %id,
            user_id = %requester.user_id,
            total,
            returned = rows.len(),
            "query executed"
        );

        Ok(QueryExecutionResult {
            data: rows,
            columns,
            total,
            page,
            page_size: limit,
            total_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{
        CalculatedFieldInput, ColumnInfo, ColumnInput, CreateQueryBuilder, QueryBuilderPermission,
    };
    use crate::domain::repository::permission_repository::MockQueryBuilderPermissionRepository;
    use crate::domain::repository::query_builder_repository::MockQueryBuilderRepository;
    use crate::domain::repository::query_runner::MockQueryRunner;
    use crate::domain::repository::schema_introspector::MockSchemaIntrospector;
    use crate::domain::repository::Row;
    use crate::domain::service::sql_builder::SqlParam;
    use serde_json::json;

    fn info(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            column_name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: false,
            default_value: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            is_primary_key: false,
            is_foreign_key: false,
            referenced_table: None,
            referenced_column: None,
            comment: None,
        }
    }

    fn column(name: &str, visible: bool) -> ColumnInput {
        ColumnInput {
            table_name: "orders".to_string(),
            column_name: name.to_string(),
            alias: name.to_string(),
            label: name.to_uppercase(),
            description: None,
            data_type: String::new(),
            is_primary_key: false,
            is_foreign_key: false,
            is_visible: visible,
            is_filterable: true,
            is_sortable: true,
            display_order: 0,
            format: None,
            aggregation: None,
        }
    }

    fn definition(owner: Uuid, is_public: bool, max_rows: i32) -> QueryBuilder {
        QueryBuilder::new(
            CreateQueryBuilder {
                name: "Orders".to_string(),
                description: None,
                database: "default".to_string(),
                main_table: "orders".to_string(),
                is_public,
                max_rows,
                settings: json!({}),
                layout: json!({}),
                columns: vec![column("id", true), column("total", false)],
                joins: vec![],
                calculated_fields: vec![
                    CalculatedFieldInput {
                        name: "tax_amount".to_string(),
                        label: "Tax".to_string(),
                        description: None,
                        expression: "total * 0.2".to_string(),
                        data_type: "number".to_string(),
                        is_visible: true,
                        display_order: 0,
                        format: None,
                        dependencies: vec!["total".to_string()],
                    },
                    CalculatedFieldInput {
                        name: "broken".to_string(),
                        label: "Broken".to_string(),
                        description: None,
                        expression: "missing / 2".to_string(),
                        data_type: "number".to_string(),
                        is_visible: true,
                        display_order: 1,
                        format: None,
                        dependencies: vec![],
                    },
                ],
            },
            owner,
        )
    }

    fn introspector() -> MockSchemaIntrospector {
        let mut mock = MockSchemaIntrospector::new();
        mock.expect_list_columns()
            .withf(|schema, table| schema == "public" && table == "orders")
            .returning(|_, _| Ok(vec![info("id", "integer"), info("total", "numeric")]));
        mock
    }

    fn rows() -> Vec<Row> {
        vec![
            json!({"id": 1, "total": 250.0}),
            json!({"id": 2, "total": 350.0}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
    }

    fn make_uc(
        def: QueryBuilder,
        perm: MockQueryBuilderPermissionRepository,
        runner: MockQueryRunner,
    ) -> ExecuteQueryUseCase {
        let mut repo = MockQueryBuilderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(def.clone())));
        let repo: Arc<dyn QueryBuilderRepository> = Arc::new(repo);
        let permission_uc = Arc::new(QueryBuilderPermissionUseCase::new(
            repo.clone(),
            Arc::new(perm),
        ));
        ExecuteQueryUseCase::new(
            repo,
            permission_uc,
            Arc::new(introspector()),
            Arc::new(runner),
            "public",
            QueryLimits::default(),
        )
    }

    fn no_permissions() -> MockQueryBuilderPermissionRepository {
        let mut perm = MockQueryBuilderPermissionRepository::new();
        perm.expect_find_for_user().returning(|_, _, _| Ok(None));
        perm
    }

    #[test]
    fn test_effective_limit() {
        let limits = QueryLimits::default();
        assert_eq!(limits.effective_limit(Some(20), 5), 5);
        assert_eq!(limits.effective_limit(None, 1000), 50);
        assert_eq!(limits.effective_limit(Some(50_000), 100_000), 10_000);
        assert_eq!(limits.effective_limit(Some(0), 100), 1);
    }

    #[tokio::test]
    async fn test_execute_private_without_grant_forbidden() {
        let mut runner = MockQueryRunner::new();
        runner.expect_count().never();
        let uc = make_uc(definition(Uuid::new_v4(), false, 100), no_permissions(), runner);

        let result = uc
            .execute(Uuid::new_v4(), QueryExecutionParams::default(), &Requester::user(Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(ExecuteQueryError::Forbidden)));
    }

    #[tokio::test]
    async fn test_execute_with_grant_evaluates_calculated_fields() {
        let mut perm = MockQueryBuilderPermissionRepository::new();
        perm.expect_find_for_user()
            .withf(|_, _, t| *t == PermissionType::Execute)
            .returning(|qb, user, t| Ok(Some(QueryBuilderPermission::for_user(qb, user, t, true))));
        let mut runner = MockQueryRunner::new();
        runner.expect_count().returning(|_| Ok(25));
        runner.expect_fetch()
            .withf(|q| q.limit == 10 && q.offset == 0 && q.params.is_empty())
            .returning(|_| Ok(rows()));

        let uc = make_uc(definition(Uuid::new_v4(), false, 100), perm, runner);
        let result = uc
            .execute(
                Uuid::new_v4(),
                QueryExecutionParams {
                    page: Some(1),
                    page_size: Some(10),
                    ..Default::default()
                },
                &Requester::user(Uuid::new_v4()),
            )
            .await
            .unwrap();

        assert_eq!(result.total, 25);
        assert_eq!(result.total_pages, 3);
        assert_eq!(result.page_size, 10);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].get("tax_amount"), Some(&json!(50.0)));
        assert_eq!(result.data[1].get("tax_amount"), Some(&json!(70.0)));
        assert_eq!(result.data[0].get("broken"), Some(&serde_json::Value::Null));
        // 非表示カラムは結果から除外される
        assert!(result.data[0].get("total").is_none());

        let names: Vec<_> = result.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "tax_amount", "broken"]);
        assert!(result.columns[1].is_calculated);
    }

    #[tokio::test]
    async fn test_public_query_runs_without_grant_and_caps_rows() {
        let mut runner = MockQueryRunner::new();
        runner.expect_count().returning(|_| Ok(12));
        runner.expect_fetch()
            .withf(|q| q.limit == 5 && q.offset == 10)
            .returning(|_| Ok(vec![]));

        let uc = make_uc(definition(Uuid::new_v4(), true, 5), no_permissions(), runner);
        let result = uc
            .execute(
                Uuid::new_v4(),
                QueryExecutionParams {
                    page: Some(3),
                    page_size: Some(20),
                    ..Default::default()
                },
                &Requester::user(Uuid::new_v4()),
            )
            .await
            .unwrap();
        assert_eq!(result.page, 3);
        assert_eq!(result.page_size, 5);
        assert_eq!(result.total_pages, 3);
    }

    #[tokio::test]
    async fn test_owner_can_execute() {
        let owner = Uuid::new_v4();
        let mut runner = MockQueryRunner::new();
        runner.expect_count().returning(|_| Ok(0));
        runner.expect_fetch().returning(|_| Ok(vec![]));

        let uc = make_uc(definition(owner, false, 100), MockQueryBuilderPermissionRepository::new(), runner);
        let result = uc
            .execute(Uuid::new_v4(), QueryExecutionParams::default(), &Requester::user(owner))
            .await
            .unwrap();
        assert_eq!(result.total_pages, 0);
    }

    #[tokio::test]
    async fn test_database_error_is_internal() {
        let mut runner = MockQueryRunner::new();
        runner.expect_count()
            .returning(|_| Err(anyhow::anyhow!("Database connection failed")));

        let uc = make_uc(definition(Uuid::new_v4(), true, 100), no_permissions(), runner);
        let err = uc
            .execute(Uuid::new_v4(), QueryExecutionParams::default(), &Requester::user(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "query execution failed: Database connection failed");
    }

    #[tokio::test]
    async fn test_unknown_sort_column_is_validation_error() {
        let mut runner = MockQueryRunner::new();
        runner.expect_count().never();

        let uc = make_uc(definition(Uuid::new_v4(), true, 100), no_permissions(), runner);
        let result = uc
            .execute(
                Uuid::new_v4(),
                QueryExecutionParams {
                    sort_by: Some("password".to_string()),
                    ..Default::default()
                },
                &Requester::user(Uuid::new_v4()),
            )
            .await;
        assert!(matches!(result, Err(ExecuteQueryError::Validation(_))));
    }

    fn tenant_uc(def: QueryBuilder, runner: MockQueryRunner) -> ExecuteQueryUseCase {
        let mut repo = MockQueryBuilderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(def.clone())));
        let repo: Arc<dyn QueryBuilderRepository> = Arc::new(repo);
        let permission_uc = Arc::new(QueryBuilderPermissionUseCase::new(
            repo.clone(),
            Arc::new(no_permissions()),
        ));
        let mut introspector = MockSchemaIntrospector::new();
        introspector.expect_list_columns().returning(|_, _| {
            Ok(vec![
                info("id", "integer"),
                info("total", "numeric"),
                info("company_id", "text"),
            ])
        });
        ExecuteQueryUseCase::new(
            repo,
            permission_uc,
            Arc::new(introspector),
            Arc::new(runner),
            "public",
            QueryLimits::default(),
        )
        .with_column_policy(ColumnPolicy::new(
            ["password_hash"],
            Some("company_id".to_string()),
        ))
    }

    #[tokio::test]
    async fn test_tenant_is_bound_as_parameter() {
        let mut runner = MockQueryRunner::new();
        runner.expect_count()
            .withf(|q| {
                q.count_sql.ends_with("WHERE \"t0\".\"company_id\"::text = $1")
                    && q.params == vec![SqlParam::Text("acme".to_string())]
            })
            .returning(|_| Ok(2));
        runner.expect_fetch().returning(|_| Ok(rows()));

        let uc = tenant_uc(definition(Uuid::new_v4(), true, 100), runner);
        let requester = Requester::user(Uuid::new_v4()).with_tenant(Some("acme".to_string()));
        let result = uc
            .execute(Uuid::new_v4(), QueryExecutionParams::default(), &requester)
            .await
            .unwrap();
        assert_eq!(result.total, 2);
    }

    #[tokio::test]
    async fn test_tenant_scoped_query_without_tenant_forbidden() {
        let mut runner = MockQueryRunner::new();
        runner.expect_count().never();

        let uc = tenant_uc(definition(Uuid::new_v4(), true, 100), runner);
        let result = uc
            .execute(Uuid::new_v4(), QueryExecutionParams::default(), &Requester::user(Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(ExecuteQueryError::Forbidden)));
    }

    #[tokio::test]
    async fn test_internal_table_rejected() {
        let mut def = definition(Uuid::new_v4(), true, 100);
        def.main_table = "_sqlx_migrations".to_string();
        def.columns.clear();
        def.calculated_fields.clear();

        let mut repo = MockQueryBuilderRepository::new();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(def.clone())));
        let repo: Arc<dyn QueryBuilderRepository> = Arc::new(repo);
        let permission_uc = Arc::new(QueryBuilderPermissionUseCase::new(
            repo.clone(),
            Arc::new(no_permissions()),
        ));
        let mut introspector = MockSchemaIntrospector::new();
        introspector.expect_list_columns().never();
        let mut runner = MockQueryRunner::new();
        runner.expect_count().never();
        let uc = ExecuteQueryUseCase::new(
            repo,
            permission_uc,
            Arc::new(introspector),
            Arc::new(runner),
            "public",
            QueryLimits::default(),
        );

        let result = uc
            .execute(Uuid::new_v4(), QueryExecutionParams::default(), &Requester::user(Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(ExecuteQueryError::Validation(msg)) if msg.contains("_sqlx_migrations")));
    }
}
