use crate::domain::entity::QueryBuilderPermission;

/// 明示的な権限レコードから許可/拒否を決定する。
///
/// 1. ユーザー個別レコードがあればその値をそのまま採用する。
/// 2. 要求者のロールに対するレコードがあれば、1 件でも拒否があれば拒否、それ以外は許可。
/// 3. どちらもなければ `None` (呼び出し側で既定値を適用する)。
pub fn resolve_explicit(
    user_record: Option<&QueryBuilderPermission>,
    role_records: &[QueryBuilderPermission],
) -> Option<bool> {
    if let Some(record) = user_record {
        return Some(record.is_allowed);
    }
    if role_records.is_empty() {
        return None;
    }
    Some(role_records.iter().all(|r| r.is_allowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::PermissionType;
    use uuid::Uuid;

    #[test]
    fn test_user_record_wins_over_roles() {
        let qb = Uuid::new_v4();
        let user = QueryBuilderPermission::for_user(qb, Uuid::new_v4(), PermissionType::Edit, false);
        let roles = vec![QueryBuilderPermission::for_role(qb, "sys_admin", PermissionType::Edit, true)];
        assert_eq!(resolve_explicit(Some(&user), &roles), Some(false));
    }

    #[test]
    fn test_role_deny_wins_among_roles() {
        let qb = Uuid::new_v4();
        let roles = vec![
            QueryBuilderPermission::for_role(qb, "sys_admin", PermissionType::View, true),
            QueryBuilderPermission::for_role(qb, "guest", PermissionType::View, false),
        ];
        assert_eq!(resolve_explicit(None, &roles), Some(false));
        assert_eq!(resolve_explicit(None, &roles[..1]), Some(true));
    }

    #[test]
    fn test_no_records() {
        assert_eq!(resolve_explicit(None, &[]), None);
    }
}
