use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entity::{is_internal_table, AvailableColumn, Requester};
use crate::domain::repository::SchemaIntrospector;
use crate::domain::service::column_policy::ColumnPolicy;
use crate::domain::service::identifier::is_valid_identifier;
use crate::usecase::manage_query_builders::{ManageQueryBuildersUseCase, QueryBuilderError};

/// 定義のメインテーブルと結合先テーブルのカラムを列挙する。
/// 機密カラムとテナントカラムは含めない。
pub struct GetAvailableColumnsUseCase {
    manage_uc: Arc<ManageQueryBuildersUseCase>,
    introspector: Arc<dyn SchemaIntrospector>,
    schema: String,
    policy: ColumnPolicy,
}

impl GetAvailableColumnsUseCase {
    pub fn new(
        manage_uc: Arc<ManageQueryBuildersUseCase>,
        introspector: Arc<dyn SchemaIntrospector>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            manage_uc,
            introspector,
            schema: schema.into(),
            policy: ColumnPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_column_policy(mut self, policy: ColumnPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn execute(
        &self,
        id: Uuid,
        requester: &Requester,
    ) -> Result<Vec<AvailableColumn>, QueryBuilderError> {
        let definition = self.manage_uc.find_one(id, requester).await?;

        let mut tables: Vec<String> = vec![definition.main_table.clone()];
        for join in &definition.joins {
            if !tables.contains(&join.to_table) {
                tables.push(join.to_table.clone());
            }
        }

        let mut available = Vec::new();
        for table in tables {
            if !is_valid_identifier(&table) || is_internal_table(&table) {
                return Err(QueryBuilderError::Validation(format!(
                    "invalid table name: {table}"
                )));
            }
            let columns = self
                .introspector
                .list_columns(&self.schema, &table)
                .await
                .map_err(|e| QueryBuilderError::Internal(e.to_string()))?;
            available.extend(
                columns
                    .into_iter()
                    .filter(|c| !self.policy.is_restricted(&c.column_name))
                    .map(|column| AvailableColumn {
                        table_name: table.clone(),
                        column,
                    }),
            );
        }
        Ok(available)
    }
}
