use std::sync::Arc;

use crate::domain::entity::{
    is_internal_schema, is_internal_table, ColumnInfo, RelationInfo, TableInfo,
};
use crate::domain::repository::SchemaIntrospector;
use crate::domain::service::column_policy::ColumnPolicy;
use crate::domain::service::identifier::is_valid_identifier;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("schema '{0}' is not accessible")]
    RestrictedSchema(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub struct IntrospectSchemaUseCase {
    introspector: Arc<dyn SchemaIntrospector>,
    default_schema: String,
    policy: ColumnPolicy,
}

impl IntrospectSchemaUseCase {
    pub fn new(introspector: Arc<dyn SchemaIntrospector>, default_schema: impl Into<String>) -> Self {
        Self {
            introspector,
            default_schema: default_schema.into(),
            policy: ColumnPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_column_policy(mut self, policy: ColumnPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn resolve_schema<'a>(&'a self, schema: Option<&'a str>) -> Result<&'a str, SchemaError> {
        let schema = schema.unwrap_or(self.default_schema.as_str());
        if !is_valid_identifier(schema) {
            return Err(SchemaError::InvalidIdentifier(schema.to_string()));
        }
        if is_internal_schema(schema) {
            return Err(SchemaError::RestrictedSchema(schema.to_string()));
        }
        Ok(schema)
    }

    fn check_table(table: &str) -> Result<(), SchemaError> {
        if is_valid_identifier(table) {
            Ok(())
        } else {
            Err(SchemaError::InvalidIdentifier(table.to_string()))
        }
    }

    /// マイグレーション管理用の内部テーブルは除外する。
    pub async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>, SchemaError> {
        let schema = self.resolve_schema(schema)?;
        let tables = self
            .introspector
            .list_tables(schema)
            .await
            .map_err(|e| SchemaError::Internal(e.to_string()))?;
        Ok(tables
            .into_iter()
            .filter(|t| !is_internal_table(&t.table_name))
            .collect())
    }

    pub async fn get_columns(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnInfo>, SchemaError> {
        let schema = self.resolve_schema(schema)?;
        Self::check_table(table)?;
        if is_internal_table(table) {
            return Ok(Vec::new());
        }
        let columns = self
            .introspector
            .list_columns(schema, table)
            .await
            .map_err(|e| SchemaError::Internal(e.to_string()))?;
        Ok(columns
            .into_iter()
            .filter(|c| !self.policy.is_restricted(&c.column_name))
            .collect())
    }

    /// 指定テーブルが参照元・参照先いずれかとなる外部キーを返す。
    pub async fn get_relations(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<RelationInfo>, SchemaError> {
        let schema = self.resolve_schema(schema)?;
        Self::check_table(table)?;
        let relations = self
            .introspector
            .list_relations(schema, table)
            .await
            .map_err(|e| SchemaError::Internal(e.to_string()))?;
        Ok(relations
            .into_iter()
            .filter(|r| {
                !is_internal_table(&r.source_table)
                    && !is_internal_table(&r.target_table)
                    && !self.policy.is_restricted(&r.source_column)
                    && !self.policy.is_restricted(&r.target_column)
            })
            .collect())
    }

    pub async fn get_databases(&self) -> Result<Vec<String>, SchemaError> {
        self.introspector
            .list_databases()
            .await
            .map_err(|e| SchemaError::Internal(e.to_string()))
    }

    pub async fn get_schemas(&self) -> Result<Vec<String>, SchemaError> {
        let schemas = self
            .introspector
            .list_schemas()
            .await
            .map_err(|e| SchemaError::Internal(e.to_string()))?;
        Ok(schemas
            .into_iter()
            .filter(|s| !is_internal_schema(s))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::schema_introspector::MockSchemaIntrospector;

    fn table(name: &str) -> TableInfo {
        TableInfo {
            table_name: name.to_string(),
            schema_name: "public".to_string(),
            comment: None,
        }
    }

    #[tokio::test]
    async fn test_get_tables_excludes_internal() {
        let mut mock = MockSchemaIntrospector::new();
        mock.expect_list_tables()
            .withf(|schema| schema == "public")
            .returning(|_| {
                Ok(vec![
                    table("_sqlx_migrations"),
                    table("clients"),
                    table("migrations"),
                    table("orders"),
                    table("typeorm_metadata"),
                ])
            });

        let uc = IntrospectSchemaUseCase::new(Arc::new(mock), "public");
        let tables = uc.get_tables(None).await.unwrap();
        let names: Vec<_> = tables.iter().map(|t| t.table_name.as_str()).collect();
        assert_eq!(names, vec!["clients", "orders"]);
    }

    #[tokio::test]
    async fn test_invalid_schema_rejected() {
        let mut mock = MockSchemaIntrospector::new();
        mock.expect_list_tables().never();
        let uc = IntrospectSchemaUseCase::new(Arc::new(mock), "public");
        assert!(matches!(
            uc.get_tables(Some("public; DROP SCHEMA x")).await,
            Err(SchemaError::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_get_columns_uses_explicit_schema() {
        let mut mock = MockSchemaIntrospector::new();
        mock.expect_list_columns()
            .withf(|schema, table| schema == "sales" && table == "orders")
            .returning(|_, _| Ok(vec![]));
        let uc = IntrospectSchemaUseCase::new(Arc::new(mock), "public");
        assert!(uc.get_columns("orders", Some("sales")).await.unwrap().is_empty());
        assert!(uc.get_columns("bad-name", None).await.is_err());
    }

    #[tokio::test]
    async fn test_introspection_failure_propagates() {
        let mut mock = MockSchemaIntrospector::new();
        mock.expect_list_databases()
            .returning(|| Err(anyhow::anyhow!("connection refused")));
        let uc = IntrospectSchemaUseCase::new(Arc::new(mock), "public");
        assert!(matches!(uc.get_databases().await, Err(SchemaError::Internal(_))));
    }

    #[tokio::test]
    async fn test_service_schema_is_hidden_and_rejected() {
        let mut mock = MockSchemaIntrospector::new();
        mock.expect_list_schemas().returning(|| {
            Ok(vec![
                "public".to_string(),
                "query_builder".to_string(),
                "sales".to_string(),
            ])
        });
        mock.expect_list_tables().never();
        mock.expect_list_columns().never();
        let uc = IntrospectSchemaUseCase::new(Arc::new(mock), "public");

        assert_eq!(uc.get_schemas().await.unwrap(), vec!["public", "sales"]);
        assert!(matches!(
            uc.get_tables(Some("query_builder")).await,
            Err(SchemaError::RestrictedSchema(_))
        ));
        assert!(matches!(
            uc.get_columns("query_builders", Some("query_builder")).await,
            Err(SchemaError::RestrictedSchema(_))
        ));
        assert!(matches!(
            uc.get_tables(Some("pg_catalog")).await,
            Err(SchemaError::RestrictedSchema(_))
        ));
    }

    #[tokio::test]
    async fn test_restricted_columns_are_hidden() {
        let mut mock = MockSchemaIntrospector::new();
        mock.expect_list_columns().returning(|_, _| {
            let column = |name: &str| ColumnInfo {
                column_name: name.to_string(),
                data_type: "text".to_string(),
                is_nullable: true,
                default_value: None,
                max_length: None,
                numeric_precision: None,
                numeric_scale: None,
                is_primary_key: false,
                is_foreign_key: false,
                referenced_table: None,
                referenced_column: None,
                comment: None,
            };
            Ok(vec![column("id"), column("email"), column("password_hash"), column("company_id")])
        });
        mock.expect_list_relations().returning(|_, _| {
            let relation = |column: &str, target: &str| RelationInfo {
                constraint_name: format!("fk_{column}"),
                source_table: "users".to_string(),
                source_column: column.to_string(),
                target_table: target.to_string(),
                target_column: "id".to_string(),
            };
            Ok(vec![relation("company_id", "companies"), relation("team_id", "teams")])
        });
        let uc = IntrospectSchemaUseCase::new(Arc::new(mock), "public").with_column_policy(
            ColumnPolicy::new(["password_hash"], Some("company_id".to_string())),
        );

        let columns = uc.get_columns("users", None).await.unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.column_name.as_str()).collect();
        assert_eq!(names, vec!["id", "email"]);

        let relations = uc.get_relations("users", None).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].source_column, "team_id");
    }
}
