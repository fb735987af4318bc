use uuid::Uuid;

/// 操作の要求者。認証済みユーザー ID とロール一覧、所属テナントを持つ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub roles: Vec<String>,
    /// テナント分離カラムと照合する値。未所属の場合は None。
    pub tenant_id: Option<String>,
}

impl Requester {
    pub fn new(user_id: Uuid, roles: Vec<String>) -> Self {
        Self {
            user_id,
            roles,
            tenant_id: None,
        }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self::new(user_id, Vec::new())
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id.filter(|t| !t.trim().is_empty());
        self
    }
}
