use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    View,
    Edit,
    Delete,
    Execute,
}

impl PermissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionType::View => "view",
            PermissionType::Edit => "edit",
            PermissionType::Delete => "delete",
            PermissionType::Execute => "execute",
        }
    }

    /// 明示的なレコードが存在しない場合の既定値。view のみ許可する。
    pub fn default_allowed(&self) -> bool {
        matches!(self, PermissionType::View)
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(PermissionType::View),
            "edit" => Ok(PermissionType::Edit),
            "delete" => Ok(PermissionType::Delete),
            "execute" => Ok(PermissionType::Execute),
            other => anyhow::bail!("invalid permission type: {}", other),
        }
    }
}

/// 権限レコード。user_id と role_id はどちらか一方のみ設定される。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryBuilderPermission {
    pub id: Uuid,
    pub query_builder_id: Uuid,
    pub user_id: Option<Uuid>,
    pub role_id: Option<String>,
    pub permission_type: PermissionType,
    pub is_allowed: bool,
    pub created_at: DateTime<Utc>,
}

impl QueryBuilderPermission {
    pub fn for_user(
        query_builder_id: Uuid,
        user_id: Uuid,
        permission_type: PermissionType,
        is_allowed: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            query_builder_id,
            user_id: Some(user_id),
            role_id: None,
            permission_type,
            is_allowed,
            created_at: Utc::now(),
        }
    }

    pub fn for_role(
        query_builder_id: Uuid,
        role_id: impl Into<String>,
        permission_type: PermissionType,
        is_allowed: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            query_builder_id,
            user_id: None,
            role_id: Some(role_id.into()),
            permission_type,
            is_allowed,
            created_at: Utc::now(),
        }
    }

    /// 一意キー (定義, 主体, 種別) が同じかどうか。
    pub fn same_subject(&self, other: &QueryBuilderPermission) -> bool {
        self.query_builder_id == other.query_builder_id
            && self.user_id == other.user_id
            && self.role_id == other.role_id
            && self.permission_type == other.permission_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_type_round_trip_str() {
        for t in [
            PermissionType::View,
            PermissionType::Edit,
            PermissionType::Delete,
            PermissionType::Execute,
        ] {
            assert_eq!(t.as_str().parse::<PermissionType>().unwrap(), t);
        }
        assert!("admin".parse::<PermissionType>().is_err());
    }

    #[test]
    fn test_default_allowed_only_view() {
        assert!(PermissionType::View.default_allowed());
        assert!(!PermissionType::Edit.default_allowed());
        assert!(!PermissionType::Delete.default_allowed());
        assert!(!PermissionType::Execute.default_allowed());
    }

    #[test]
    fn test_same_subject() {
        let qb = Uuid::new_v4();
        let user = Uuid::new_v4();
        let a = QueryBuilderPermission::for_user(qb, user, PermissionType::View, true);
        let b = QueryBuilderPermission::for_user(qb, user, PermissionType::View, false);
        let c = QueryBuilderPermission::for_role(qb, "sys_operator", PermissionType::View, true);
        assert!(a.same_subject(&b));
        assert!(!a.same_subject(&c));
    }
}
