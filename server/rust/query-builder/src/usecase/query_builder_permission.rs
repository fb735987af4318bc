use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entity::{PermissionType, QueryBuilderPermission, Requester};
use crate::domain::repository::{QueryBuilderPermissionRepository, QueryBuilderRepository};
use crate::domain::service::permission_resolver::resolve_explicit;

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("query builder not found: {0}")]
    QueryBuilderNotFound(Uuid),
    #[error("permission not found: {0}")]
    NotFound(Uuid),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone)]
pub struct AddPermissionInput {
    pub query_builder_id: Uuid,
    pub user_id: Option<Uuid>,
    pub role_id: Option<String>,
    pub permission_type: PermissionType,
    pub is_allowed: bool,
}

/// 定義ごとの権限レコードの管理と判定を行う。
/// 公開フラグと所有者の扱いは呼び出し側のユースケースで適用する。
pub struct QueryBuilderPermissionUseCase {
    query_builder_repo: Arc<dyn QueryBuilderRepository>,
    permission_repo: Arc<dyn QueryBuilderPermissionRepository>,
}

impl QueryBuilderPermissionUseCase {
    pub fn new(
        query_builder_repo: Arc<dyn QueryBuilderRepository>,
        permission_repo: Arc<dyn QueryBuilderPermissionRepository>,
    ) -> Self {
        Self {
            query_builder_repo,
            permission_repo,
        }
    }

    /// ユーザー個別レコード > ロールレコード > 既定値 (view のみ許可) の順で判定する。
    pub async fn check_permission(
        &self,
        query_builder_id: Uuid,
        requester: &Requester,
        permission_type: PermissionType,
    ) -> anyhow::Result<bool> {
        let user_record = self
            .permission_repo
            .find_for_user(query_builder_id, requester.user_id, permission_type)
            .await?;
        let role_records = if user_record.is_none() && !requester.roles.is_empty() {
            self.permission_repo
                .find_for_roles(query_builder_id, &requester.roles, permission_type)
                .await?
        } else {
            Vec::new()
        };

        let allowed = resolve_explicit(user_record.as_ref(), &role_records)
            .unwrap_or_else(|| permission_type.default_allowed());
        tracing::debug!(
            query_builder_id = %query_builder_id,
            user_id = %requester.user_id,
            permission_type = %permission_type,
            allowed,
            "permission resolved"
        );
        Ok(allowed)
    }

    /// 同じ (定義, 主体, 種別) のレコードがあれば許可フラグを上書きする。
    pub async fn add_permission(
        &self,
        input: AddPermissionInput,
    ) -> Result<QueryBuilderPermission, PermissionError> {
        let permission = match (input.user_id, input.role_id) {
            (Some(user_id), None) => QueryBuilderPermission::for_user(
                input.query_builder_id,
                user_id,
                input.permission_type,
                input.is_allowed,
            ),
            (None, Some(role_id)) if !role_id.trim().is_empty() => QueryBuilderPermission::for_role(
                input.query_builder_id,
                role_id,
                input.permission_type,
                input.is_allowed,
            ),
            _ => {
                return Err(PermissionError::Validation(
                    "exactly one of user_id or role_id must be specified".to_string(),
                ))
            }
        };

        self.ensure_query_builder_exists(input.query_builder_id)
            .await?;

        let saved = self
            .permission_repo
            .upsert(&permission)
            .await
            .map_err(|e| PermissionError::Internal(e.to_string()))?;
        tracing::info!(
            query_builder_id = %saved.query_builder_id,
            permission_id = %saved.id,
            permission_type = %saved.permission_type,
            is_allowed = saved.is_allowed,
            "permission saved"
        );
        Ok(saved)
    }

    pub async fn remove_permission(&self, id: Uuid) -> Result<(), PermissionError> {
        let deleted = self
            .permission_repo
            .delete(id)
            .await
            .map_err(|e| PermissionError::Internal(e.to_string()))?;
        if !deleted {
            return Err(PermissionError::NotFound(id));
        }
        tracing::info!(permission_id = %id, "permission removed");
        Ok(())
    }

    pub async fn get_permissions(
        &self,
        query_builder_id: Uuid,
    ) -> Result<Vec<QueryBuilderPermission>, PermissionError> {
        self.ensure_query_builder_exists(query_builder_id).await?;
        self.permission_repo
            .find_by_query_builder(query_builder_id)
            .await
            .map_err(|e| PermissionError::Internal(e.to_string()))
    }

    pub async fn get_permission(&self, id: Uuid) -> Result<QueryBuilderPermission, PermissionError> {
        self.permission_repo
            .find_by_id(id)
            .await
            .map_err(|e| PermissionError::Internal(e.to_string()))?
            .ok_or(PermissionError::NotFound(id))
    }

    pub async fn update_permission(
        &self,
        id: Uuid,
        is_allowed: bool,
    ) -> Result<QueryBuilderPermission, PermissionError> {
        self.permission_repo
            .update_allowed(id, is_allowed)
            .await
            .map_err(|e| PermissionError::Internal(e.to_string()))?
            .ok_or(PermissionError::NotFound(id))
    }

    async fn ensure_query_builder_exists(&self, id: Uuid) -> Result<(), PermissionError> {
        self.query_builder_repo
            .find_by_id(id)
            .await
            .map_err(|e| PermissionError::Internal(e.to_string()))?
            .ok_or(PermissionError::QueryBuilderNotFound(id))
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{CreateQueryBuilder, QueryBuilder};
    use crate::domain::repository::permission_repository::MockQueryBuilderPermissionRepository;
    use crate::domain::repository::query_builder_repository::MockQueryBuilderRepository;

    fn sample_query_builder(id: Uuid) -> QueryBuilder {
        let mut qb = QueryBuilder::new(
            CreateQueryBuilder {
                name: "Orders".to_string(),
                description: None,
                database: "default".to_string(),
                main_table: "orders".to_string(),
                is_public: false,
                max_rows: 1000,
                settings: serde_json::json!({}),
                layout: serde_json::json!({}),
                columns: vec![],
                joins: vec![],
                calculated_fields: vec![],
            },
            Uuid::new_v4(),
        );
        qb.id = id;
        qb
    }

    fn make_uc(
        qb_repo: MockQueryBuilderRepository,
        perm_repo: MockQueryBuilderPermissionRepository,
    ) -> QueryBuilderPermissionUseCase {
        QueryBuilderPermissionUseCase::new(Arc::new(qb_repo), Arc::new(perm_repo))
    }

    #[tokio::test]
    async fn test_default_view_granted_edit_denied() {
        let mut perm = MockQueryBuilderPermissionRepository::new();
        perm.expect_find_for_user().returning(|_, _, _| Ok(None));
        perm.expect_find_for_roles().never();

        let uc = make_uc(MockQueryBuilderRepository::new(), perm);
        let requester = Requester::user(Uuid::new_v4());
        let qb = Uuid::new_v4();
        assert!(uc.check_permission(qb, &requester, PermissionType::View).await.unwrap());
        assert!(!uc.check_permission(qb, &requester, PermissionType::Edit).await.unwrap());
        assert!(!uc.check_permission(qb, &requester, PermissionType::Delete).await.unwrap());
        assert!(!uc.check_permission(qb, &requester, PermissionType::Execute).await.unwrap());
    }

    #[tokio::test]
    async fn test_explicit_user_deny_wins() {
        let mut perm = MockQueryBuilderPermissionRepository::new();
        perm.expect_find_for_user()
            .returning(|qb, user, t| Ok(Some(QueryBuilderPermission::for_user(qb, user, t, false))));
        perm.expect_find_for_roles().never();

        let uc = make_uc(MockQueryBuilderRepository::new(), perm);
        let requester = Requester::new(Uuid::new_v4(), vec!["sys_admin".to_string()]);
        assert!(!uc
            .check_permission(Uuid::new_v4(), &requester, PermissionType::View)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_role_fallback() {
        let mut perm = MockQueryBuilderPermissionRepository::new();
        perm.expect_find_for_user().returning(|_, _, _| Ok(None));
        perm.expect_find_for_roles()
            .withf(|_, roles, t| roles.len() == 1 && roles[0] == "sys_operator" && *t == PermissionType::Edit)
            .returning(|qb, _, t| Ok(vec![QueryBuilderPermission::for_role(qb, "sys_operator", t, true)]));

        let uc = make_uc(MockQueryBuilderRepository::new(), perm);
        let requester = Requester::new(Uuid::new_v4(), vec!["sys_operator".to_string()]);
        assert!(uc
            .check_permission(Uuid::new_v4(), &requester, PermissionType::Edit)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_add_permission_requires_exactly_one_subject() {
        let uc = make_uc(
            MockQueryBuilderRepository::new(),
            MockQueryBuilderPermissionRepository::new(),
        );
        let both = AddPermissionInput {
            query_builder_id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
            role_id: Some("sys_admin".to_string()),
            permission_type: PermissionType::View,
            is_allowed: true,
        };
        assert!(matches!(
            uc.add_permission(both.clone()).await,
            Err(PermissionError::Validation(_))
        ));

        let neither = AddPermissionInput {
            user_id: None,
            role_id: None,
            ..both
        };
        assert!(matches!(
            uc.add_permission(neither).await,
            Err(PermissionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_add_permission_unknown_query_builder() {
        let mut qb_repo = MockQueryBuilderRepository::new();
        qb_repo.expect_find_by_id().returning(|_| Ok(None));
        let mut perm = MockQueryBuilderPermissionRepository::new();
        perm.expect_upsert().never();

        let uc = make_uc(qb_repo, perm);
        let result = uc
            .add_permission(AddPermissionInput {
                query_builder_id: Uuid::new_v4(),
                user_id: Some(Uuid::new_v4()),
                role_id: None,
                permission_type: PermissionType::Edit,
                is_allowed: true,
            })
            .await;
        assert!(matches!(result, Err(PermissionError::QueryBuilderNotFound(_))));
    }

    #[tokio::test]
    async fn test_add_permission_upserts() {
        let qb_id = Uuid::new_v4();
        let mut qb_repo = MockQueryBuilderRepository::new();
        qb_repo
            .expect_find_by_id()
            .returning(|id| Ok(Some(sample_query_builder(id))));
        let mut perm = MockQueryBuilderPermissionRepository::new();
        perm.expect_upsert()
            .withf(move |p| p.query_builder_id == qb_id && p.role_id.as_deref() == Some("sys_auditor"))
            .times(1)
            .returning(|p| Ok(p.clone()));

        let uc = make_uc(qb_repo, perm);
        let saved = uc
            .add_permission(AddPermissionInput {
                query_builder_id: qb_id,
                user_id: None,
                role_id: Some("sys_auditor".to_string()),
                permission_type: PermissionType::Execute,
                is_allowed: true,
            })
            .await
            .unwrap();
        assert_eq!(saved.permission_type, PermissionType::Execute);
        assert!(saved.user_id.is_none());
    }

    #[tokio::test]
    async fn test_remove_and_update_not_found() {
        let mut perm = MockQueryBuilderPermissionRepository::new();
        perm.expect_delete().returning(|_| Ok(false));
        perm.expect_update_allowed().returning(|_, _| Ok(None));

        let uc = make_uc(MockQueryBuilderRepository::new(), perm);
        assert!(matches!(
            uc.remove_permission(Uuid::new_v4()).await,
            Err(PermissionError::NotFound(_))
        ));
        assert!(matches!(
            uc.update_permission(Uuid::new_v4(), false).await,
            Err(PermissionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_permission_flips_flag() {
        let mut perm = MockQueryBuilderPermissionRepository::new();
        perm.expect_update_allowed().returning(|id, allowed| {
            let mut p = QueryBuilderPermission::for_user(Uuid::new_v4(), Uuid::new_v4(), PermissionType::View, allowed);
            p.id = id;
            Ok(Some(p))
        });

        let uc = make_uc(MockQueryBuilderRepository::new(), perm);
        let id = Uuid::new_v4();
        let updated = uc.update_permission(id, false).await.unwrap();
        assert_eq!(updated.id, id);
        assert!(!updated.is_allowed);
    }
}
