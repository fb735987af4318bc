use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entity::{
    CreateQueryBuilder, PermissionType, QueryBuilder, Requester, UpdateQueryBuilder, MAX_NAME_LEN,
};
use crate::domain::repository::QueryBuilderRepository;
use crate::usecase::query_builder_permission::{
    AddPermissionInput, PermissionError, QueryBuilderPermissionUseCase,
};

#[derive(Debug, thiserror::Error)]
pub enum QueryBuilderError {
    #[error("query builder not found: {0}")]
    NotFound(Uuid),
    #[error("permission denied")]
    Forbidden,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PermissionError> for QueryBuilderError {
    fn from(err: PermissionError) -> Self {
        match err {
            PermissionError::QueryBuilderNotFound(id) => QueryBuilderError::NotFound(id),
            PermissionError::Validation(msg) => QueryBuilderError::Validation(msg),
            other => QueryBuilderError::Internal(other.to_string()),
        }
    }
}

fn validate_scalars(
    name: Option<&str>,
    main_table: Option<&str>,
    max_rows: Option<i32>,
) -> Result<(), QueryBuilderError> {
    if name.is_some_and(|n| n.trim().is_empty()) {
        return Err(QueryBuilderError::Validation("name must not be empty".to_string()));
    }
    if name.is_some_and(|n| n.chars().count() > MAX_NAME_LEN) {
        return Err(QueryBuilderError::Validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if main_table.is_some_and(|t| t.trim().is_empty()) {
        return Err(QueryBuilderError::Validation(
            "main_table must not be empty".to_string(),
        ));
    }
    if max_rows.is_some_and(|m| m <= 0) {
        return Err(QueryBuilderError::Validation(
            "max_rows must be positive".to_string(),
        ));
    }
    Ok(())
}

pub struct ManageQueryBuildersUseCase {
    repo: Arc<dyn QueryBuilderRepository>,
    permission_uc: Arc<QueryBuilderPermissionUseCase>,
}

impl ManageQueryBuildersUseCase {
    pub fn new(
        repo: Arc<dyn QueryBuilderRepository>,
        permission_uc: Arc<QueryBuilderPermissionUseCase>,
    ) -> Self {
        Self {
            repo,
            permission_uc,
        }
    }

    async fn can(
        &self,
        id: Uuid,
        requester: &Requester,
        permission_type: PermissionType,
    ) -> Result<bool, QueryBuilderError> {
        self.permission_uc
            .check_permission(id, requester, permission_type)
            .await
            .map_err(|e| QueryBuilderError::Internal(e.to_string()))
    }

    /// 定義を保存し、作成者に edit 権限を付与する。
    /// 付与に失敗した場合は保存した定義を削除してエラーを返す。
    pub async fn create(
        &self,
        input: CreateQueryBuilder,
        requester: &Requester,
    ) -> Result<QueryBuilder, QueryBuilderError> {
        validate_scalars(
            Some(&input.name),
            Some(&input.main_table),
            Some(input.max_rows),
        )?;

        let query_builder = QueryBuilder::new(input, requester.user_id);
        self.repo
            .create(&query_builder)
            .await
            .map_err(|e| QueryBuilderError::Internal(e.to_string()))?;

        let granted = self
            .permission_uc
            .add_permission(AddPermissionInput {
                query_builder_id: query_builder.id,
                user_id: Some(requester.user_id),
                role_id: None,
                permission_type: PermissionType::Edit,
                is_allowed: true,
            })
            .await;
        if let Err(err) = granted {
            tracing::error!(
                query_builder_id = %query_builder.id,
                error = %err,
                "failed to grant edit to creator; removing definition"
            );
            if let Err(cleanup) = self.repo.delete(query_builder.id).await {
                tracing::error!(
                    query_builder_id = %query_builder.id,
                    error = %cleanup,
                    "failed to remove definition after grant failure"
                );
            }
            return Err(err.into());
        }

        tracing::info!(
            query_builder_id = %query_builder.id,
            created_by = %requester.user_id,
            main_table = %query_builder.main_table,
            "query builder created"
        );
        Ok(query_builder)
    }

    /// 閲覧可能な定義を updated_at の降順で返す。
    pub async fn find_all(
        &self,
        requester: &Requester,
    ) -> Result<Vec<QueryBuilder>, QueryBuilderError> {
        let all = self
            .repo
            .find_all()
            .await
            .map_err(|e| QueryBuilderError::Internal(e.to_string()))?;

        let mut visible = Vec::with_capacity(all.len());
        for query_builder in all {
            if query_builder.is_public
                || self
                    .can(query_builder.id, requester, PermissionType::View)
                    .await?
            {
                visible.push(query_builder);
            }
        }
        Ok(visible)
    }

    /// 存在確認を権限確認より先に行う。
    pub async fn find_one(
        &self,
        id: Uuid,
        requester: &Requester,
    ) -> Result<QueryBuilder, QueryBuilderError> {
        let query_builder = self
            .repo
            .find_by_id(id)
            .await
            .map_err(|e| QueryBuilderError::Internal(e.to_string()))?
            .ok_or(QueryBuilderError::NotFound(id))?;

        if !query_builder.is_public && !self.can(id, requester, PermissionType::View).await? {
            return Err(QueryBuilderError::Forbidden);
        }
        Ok(query_builder)
    }

    /// 指定されたサブコレクションは既存分を破棄して丸ごと置き換える。
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateQueryBuilder,
        requester: &Requester,
    ) -> Result<QueryBuilder, QueryBuilderError> {
        self.find_one(id, requester).await?;
        if !self.can(id, requester, PermissionType::Edit).await? {
            return Err(QueryBuilderError::Forbidden);
        }
        validate_scalars(
            input.name.as_deref(),
            input.main_table.as_deref(),
            input.max_rows,
        )?;

        let updated = self
            .repo
            .update(id, &input)
            .await
            .map_err(|e| QueryBuilderError::Internal(e.to_string()))?;
        if !updated {
            return Err(QueryBuilderError::NotFound(id));
        }

        tracing::info!(
            query_builder_id = %id,
            updated_by = %requester.user_id,
            replaced_columns = input.columns.is_some(),
            replaced_joins = input.joins.is_some(),
            replaced_calculated_fields = input.calculated_fields.is_some(),
            "query builder updated"
        );

        self.repo
            .find_by_id(id)
            .await
            .map_err(|e| QueryBuilderError::Internal(e.to_string()))?
            .ok_or(QueryBuilderError::NotFound(id))
    }

    /// delete 権限を持つか作成者であれば削除できる。
    pub async fn remove(&self, id: Uuid, requester: &Requester) -> Result<(), QueryBuilderError> {
        let query_builder = self.find_one(id, requester).await?;
        if !query_builder.is_owned_by(requester.user_id)
            && !self.can(id, requester, PermissionType::Delete).await?
        {
            return Err(QueryBuilderError::Forbidden);
        }

        let deleted = self
            .repo
            .delete(id)
            .await
            .map_err(|e| QueryBuilderError::Internal(e.to_string()))?;
        if !deleted {
            return Err(QueryBuilderError::NotFound(id));
        }
        tracing::info!(query_builder_id = %id, deleted_by = %requester.user_id, "query builder removed");
        Ok(())
    }

    /// 複製は非公開で作成され、要求者が作成者となる。
    pub async fn duplicate(
        &self,
        id: Uuid,
        requester: &Requester,
    ) -> Result<QueryBuilder, QueryBuilderError> {
        let source = self.find_one(id, requester).await?;
        let copy = self.create(source.to_duplicate_input(), requester).await?;
        tracing::info!(source_id = %id, query_builder_id = %copy.id, "query builder duplicated");
        self.find_one(copy.id, requester).await
    }

    /// 権限レコードの管理は作成者か edit 権限保持者に限る。
    pub async fn authorize_permission_management(
        &self,
        id: Uuid,
        requester: &Requester,
    ) -> Result<QueryBuilder, QueryBuilderError> {
        let query_builder = self.find_one(id, requester).await?;
        if query_builder.is_owned_by(requester.user_id)
            || self.can(id, requester, PermissionType::Edit).await?
        {
            Ok(query_builder)
        } else {
            Err(QueryBuilderError::Forbidden)
        }
    }
}
